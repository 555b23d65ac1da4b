// Infrastructure layer modules
pub mod config_cache;
pub mod guest_notification;
pub mod lambda_config;
pub mod logging;
pub mod metrics;
pub mod parameter_store;

// Re-exports
pub use config_cache::{ConfigCache, ConfigCacheError, ConfigListener, DEFAULT_EXPIRY};
pub use guest_notification::{
    GuestNotificationClient, GuestNotificationConfig, GuestNotificationError, GuestNotifier,
    HttpNotifierFactory, NotifierFactory,
};
pub use lambda_config::{
    LambdaConfigError, LambdaEnvConfig, function_name_from_env, stage_env_from_env,
};
pub use logging::{LoggingError, init_logging, set_log_level};
pub use metrics::{AwsCloudWatchMetrics, ErrorMetricDatum, ErrorMetrics, MetricsError, MetricsSink};
pub use parameter_store::{AwsParameterStore, ParameterStore, ParameterStoreError};
