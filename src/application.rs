// アプリケーション層モジュール
pub mod invocation;
pub mod order_stream_handler;
pub mod service_error;

// 再エクスポート
pub use invocation::{
    GUEST_API_KEY_ALIAS, GUEST_API_URL_ALIAS, InvocationContext, InvocationPipeline,
    LOG_LEVEL_ALIAS, SUCCESS_RESPONSE, notifier_config_items, report_setup_failure,
};
pub use order_stream_handler::{OrderStreamHandler, OrderStreamResult};
pub use service_error::ServiceError;
