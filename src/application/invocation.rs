//! Lambda呼び出しパイプライン
//!
//! 1回の呼び出しで次の順に処理する。
//! 1. 受信イベントをorderPayloadを除いてログ出力
//! 2. 設定キャッシュの環境を設定し、期限切れなら更新
//! 3. LogLevel設定をログサブスクライバーに反映
//! 4. 通知クライアントを生成してストリームを処理
//!
//! 失敗時はエラーコードと種別をログに出力し、エラーメトリクスに記録する。
//! メトリクスは成功・失敗のどちらでも呼び出し終了時に送信する。

use std::sync::{Mutex, PoisonError};

use aws_lambda_events::event::dynamodb::Event;
use serde_json::Value;
use tracing::{Instrument, Span, error, info, info_span, warn};

use super::order_stream_handler::OrderStreamHandler;
use super::service_error::ServiceError;
use crate::domain::{ConfigItem, redact};
use crate::infrastructure::{
    ConfigCache, ErrorMetrics, GuestNotificationConfig, LambdaEnvConfig, MetricsSink,
    NotifierFactory, ParameterStore, set_log_level,
};

/// ログレベル設定のエイリアス
pub const LOG_LEVEL_ALIAS: &str = "LogLevel";

/// ゲスト通知APIエンドポイントのエイリアス
pub const GUEST_API_URL_ALIAS: &str = "GuestApiUrl";

/// ゲスト通知APIキーのエイリアス
pub const GUEST_API_KEY_ALIAS: &str = "GuestApiKey";

/// 正常終了時の応答
pub const SUCCESS_RESPONSE: &str = "SUCCESS";

/// 受信イベントのログから除外するパス
const REDACTED_PATHS: &[&str] = &[
    "Records.dynamodb.NewImage.orderPayload",
    "Records.dynamodb.OldImage.orderPayload",
];

/// 通知処理が使用する設定項目
pub fn notifier_config_items() -> Vec<ConfigItem> {
    vec![
        ConfigItem::new("/order-notifier/logLevel", LOG_LEVEL_ALIAS),
        ConfigItem::new("/order-notifier/guestApiUrl", GUEST_API_URL_ALIAS),
        ConfigItem::new("/order-notifier/guestApiKey", GUEST_API_KEY_ALIAS),
    ]
}

/// 失敗した呼び出しをエラーコードと種別付きでログ出力
fn log_failure(err: &ServiceError) {
    error!(
        code = err.code(),
        name = err.name(),
        retryable = err.is_retryable(),
        error = %err,
        "呼び出しに失敗"
    );
}

/// パイプラインを構築できなかった呼び出しを記録する
///
/// ServiceError以外の失敗は不明なエラーとして扱い、
/// 通常の失敗と同じくログとエラーメトリクスに残す。
pub async fn report_setup_failure<E, M>(
    err: E,
    function_name: &str,
    environment: Option<&str>,
    sink: &M,
) -> ServiceError
where
    E: std::fmt::Display,
    M: MetricsSink + ?Sized,
{
    let err = ServiceError::unknown(err);
    log_failure(&err);

    let metrics = ErrorMetrics::new(function_name);
    metrics.add_sample(err.name());
    metrics.report(sink, environment).await;
    err
}

/// 呼び出しごとのコンテキスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    /// 相関ID（X-RayトレースID、なければリクエストID）
    pub correlation_id: String,
    /// LambdaリクエストID
    pub request_id: String,
    /// Lambda関数名
    pub function_name: String,
}

impl InvocationContext {
    /// 新しいコンテキストを作成
    pub fn new(
        request_id: impl Into<String>,
        xray_trace_id: Option<String>,
        function_name: impl Into<String>,
    ) -> Self {
        let request_id = request_id.into();
        let correlation_id = xray_trace_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| request_id.clone());
        Self {
            correlation_id,
            request_id,
            function_name: function_name.into(),
        }
    }

    /// Lambdaランタイムのコンテキストから作成
    pub fn from_lambda(context: &lambda_runtime::Context, function_name: &str) -> Self {
        Self::new(
            context.request_id.clone(),
            context.xray_trace_id.clone(),
            function_name,
        )
    }

    /// 呼び出し全体を囲むspan
    pub fn span(&self) -> Span {
        info_span!(
            "invocation",
            correlation_id = %self.correlation_id,
            request_id = %self.request_id,
            function_name = %self.function_name,
        )
    }
}

/// 呼び出しパイプライン
///
/// ウォームスタート間で共有され、設定キャッシュとメトリクス集計器を保持する。
pub struct InvocationPipeline<S, M, F> {
    cache: ConfigCache<S>,
    metrics: ErrorMetrics,
    sink: M,
    factory: F,
    stage_env: Option<String>,
    function_name: String,
    applied_log_level: Mutex<Option<String>>,
}

impl<S, M, F> InvocationPipeline<S, M, F>
where
    S: ParameterStore,
    M: MetricsSink,
    F: NotifierFactory,
{
    /// 新しいパイプラインを作成
    pub fn new(env: &LambdaEnvConfig, store: S, sink: M, factory: F) -> Self {
        let items = notifier_config_items();
        let cache = match env.cache_ttl() {
            Some(ttl) => ConfigCache::with_expiry(store, items, ttl),
            None => ConfigCache::new(store, items),
        };

        cache.on_initialize(|aliases| info!(aliases = ?aliases, "設定を初期化"));
        cache.on_change(|aliases| info!(aliases = ?aliases, "設定が変更された"));

        Self {
            cache,
            metrics: ErrorMetrics::new(env.function_name()),
            sink,
            factory,
            stage_env: env.stage_env().map(str::to_string),
            function_name: env.function_name().to_string(),
            applied_log_level: Mutex::new(None),
        }
    }

    /// Lambda関数名
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// 設定キャッシュへの参照
    pub fn cache(&self) -> &ConfigCache<S> {
        &self.cache
    }

    /// ストリームイベントを処理する
    pub async fn handle(
        &self,
        ctx: &InvocationContext,
        event: &Event,
    ) -> Result<Value, ServiceError> {
        async {
            let result = self.run(event).await;

            if let Err(err) = &result {
                log_failure(err);
                self.metrics.add_sample(err.name());
            }

            self.metrics
                .report(&self.sink, self.stage_env.as_deref())
                .await;

            result
        }
        .instrument(ctx.span())
        .await
    }

    async fn run(&self, event: &Event) -> Result<Value, ServiceError> {
        let raw = serde_json::to_value(event).map_err(|e| ServiceError::Internal(e.to_string()))?;
        info!(event = %redact(&raw, REDACTED_PATHS), "ストリームイベントを受信");

        let env = self.stage_env.as_deref().ok_or(ServiceError::NoEnvProvided)?;
        self.select_environment(env)?;

        self.cache.refresh_if_stale().await?;
        self.apply_log_level()?;

        let notifier = self.build_notifier()?;
        let result = OrderStreamHandler::new(notifier).handle(event).await?;
        info!(
            notified_count = result.notified_count,
            skip_count = result.skip_count,
            failure_count = result.failure_count,
            "呼び出し完了"
        );

        Ok(Value::String(SUCCESS_RESPONSE.to_string()))
    }

    fn select_environment(&self, env: &str) -> Result<(), ServiceError> {
        match self.cache.environment() {
            None => info!(environment = env, "設定キャッシュの環境を設定"),
            Some(previous) if previous != env => warn!(
                previous = %previous,
                environment = env,
                "設定キャッシュの環境が変更された"
            ),
            Some(_) => {}
        }

        self.cache
            .set_environment(env)
            .map_err(|e| ServiceError::Internal(e.to_string()))
    }

    /// LogLevel設定が変わっていればログサブスクライバーに反映する
    fn apply_log_level(&self) -> Result<(), ServiceError> {
        let Some(level) = self.cache.get_value(LOG_LEVEL_ALIAS)? else {
            return Ok(());
        };

        let mut applied = self
            .applied_log_level
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if applied.as_deref() == Some(level.as_str()) {
            return Ok(());
        }

        match set_log_level(&level) {
            Ok(()) => info!(level = %level, "ログレベルを変更"),
            Err(err) => warn!(level = %level, error = %err, "ログレベルを変更できません"),
        }
        *applied = Some(level);
        Ok(())
    }

    fn build_notifier(&self) -> Result<F::Notifier, ServiceError> {
        let endpoint = self.required_value(GUEST_API_URL_ALIAS)?;
        let api_key = self.required_value(GUEST_API_KEY_ALIAS)?;

        self.factory
            .create(&GuestNotificationConfig::new(endpoint, api_key))
            .map_err(|e| ServiceError::Internal(e.to_string()))
    }

    fn required_value(&self, alias: &str) -> Result<String, ServiceError> {
        self.cache
            .get_value(alias)?
            .ok_or_else(|| ServiceError::Internal(format!("設定値がありません: {}", alias)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::GuestNotificationError;
    use crate::infrastructure::guest_notification::mock::MockNotifierFactory;
    use crate::infrastructure::metrics::mock::MockMetricsSink;
    use crate::infrastructure::parameter_store::mock::MockParameterStore;
    use aws_lambda_events::event::dynamodb::{EventRecord, StreamRecord};
    use serde_dynamo::{AttributeValue, Item};
    use std::collections::HashMap;
    use std::time::Duration;

    // ==================== ヘルパー関数 ====================

    fn seeded_store(env: &str) -> MockParameterStore {
        let store = MockParameterStore::new();
        store.set(&format!("/{}/order-notifier/logLevel", env), "debug");
        store.set(
            &format!("/{}/order-notifier/guestApiUrl", env),
            "https://guest.example.com",
        );
        store.set(&format!("/{}/order-notifier/guestApiKey", env), "secret");
        store
    }

    fn env_config(stage: Option<&str>) -> LambdaEnvConfig {
        LambdaEnvConfig::new(stage.map(str::to_string), "order-notifier-handler", None)
    }

    fn context() -> InvocationContext {
        InvocationContext::new("req-1", Some("1-abc-def".to_string()), "order-notifier-handler")
    }

    fn completed_event() -> Event {
        use chrono::{TimeZone, Utc};

        let image = |status: &str| {
            let mut map: HashMap<String, AttributeValue> = HashMap::new();
            map.insert("inboundProvider".to_string(), AttributeValue::S("DigitalOrder".to_string()));
            map.insert("orderStatus".to_string(), AttributeValue::S(status.to_string()));
            map.insert(
                "orderPayload".to_string(),
                AttributeValue::S(r#"{"customer":{"customerId":"cust-1"}}"#.to_string()),
            );
            Item::from(map)
        };

        Event {
            records: vec![EventRecord {
                aws_region: String::new(),
                change: StreamRecord {
                    approximate_creation_date_time: Utc.timestamp_opt(0, 0).unwrap(),
                    keys: Item::from(HashMap::new()),
                    new_image: image("Completed"),
                    old_image: image("InProgress"),
                    sequence_number: None,
                    size_bytes: 0,
                    stream_view_type: None,
                },
                event_id: "evt-1".to_string(),
                event_name: "MODIFY".to_string(),
                event_source: None,
                event_source_arn: None,
                event_version: None,
                user_identity: None,
                record_format: None,
                table_name: None,
            }],
        }
    }

    type TestPipeline = InvocationPipeline<MockParameterStore, MockMetricsSink, MockNotifierFactory>;

    fn pipeline(
        stage: Option<&str>,
        store: &MockParameterStore,
        sink: &MockMetricsSink,
        factory: &MockNotifierFactory,
    ) -> TestPipeline {
        InvocationPipeline::new(&env_config(stage), store.clone(), sink.clone(), factory.clone())
    }

    // ==================== 設定項目・コンテキスト テスト ====================

    #[test]
    fn test_notifier_config_items() {
        let items = notifier_config_items();
        let aliases: Vec<&str> = items.iter().map(|i| i.alias()).collect();
        assert_eq!(aliases, vec!["LogLevel", "GuestApiUrl", "GuestApiKey"]);
        assert_eq!(items[1].qualified_key("PROD"), "/PROD/order-notifier/guestApiUrl");
    }

    #[test]
    fn test_correlation_id_prefers_trace_id() {
        let ctx = context();
        assert_eq!(ctx.correlation_id, "1-abc-def");
        assert_eq!(ctx.request_id, "req-1");
    }

    #[test]
    fn test_correlation_id_falls_back_to_request_id() {
        let ctx = InvocationContext::new("req-2", None, "fn");
        assert_eq!(ctx.correlation_id, "req-2");

        let ctx = InvocationContext::new("req-3", Some(String::new()), "fn");
        assert_eq!(ctx.correlation_id, "req-3");
    }

    // ==================== 構築失敗 テスト ====================

    #[tokio::test]
    async fn test_setup_failure_is_reported_as_unknown() {
        let sink = MockMetricsSink::new();
        let cause = crate::infrastructure::LambdaConfigError::InvalidValue {
            name: "CONFIG_CACHE_TTL_SECS".to_string(),
            value: "soon".to_string(),
        };

        let err = report_setup_failure(cause, "order-notifier-handler", Some("DEV"), &sink).await;

        assert!(matches!(err, ServiceError::Unknown(_)));
        assert_eq!(err.code(), "SYST-9999");
        assert!(err.to_string().contains("CONFIG_CACHE_TTL_SECS=soon"));
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0].error_type, "UnknownError");
        assert_eq!(sent[0][0].function_name, "order-notifier-handler");
        assert_eq!(sent[0][0].environment.as_deref(), Some("DEV"));
    }

    // ==================== パイプライン テスト ====================

    #[tokio::test]
    async fn test_handle_success() {
        let store = seeded_store("DEV");
        let sink = MockMetricsSink::new();
        let factory = MockNotifierFactory::default();
        let pipeline = pipeline(Some("DEV"), &store, &sink, &factory);

        let response = pipeline.handle(&context(), &completed_event()).await.unwrap();

        assert_eq!(response, Value::String("SUCCESS".to_string()));
        assert_eq!(
            factory.configs(),
            vec![("https://guest.example.com".to_string(), "secret".to_string())]
        );
        assert_eq!(factory.notifier.notified().len(), 1);
        assert!(sink.sent().is_empty());
        assert_eq!(pipeline.cache().environment().as_deref(), Some("DEV"));
    }

    #[tokio::test]
    async fn test_warm_invocations_reuse_cache() {
        let store = seeded_store("DEV");
        let sink = MockMetricsSink::new();
        let factory = MockNotifierFactory::default();
        let pipeline = pipeline(Some("DEV"), &store, &sink, &factory);

        pipeline.handle(&context(), &completed_event()).await.unwrap();
        pipeline.handle(&context(), &completed_event()).await.unwrap();

        assert_eq!(store.call_count(), 1);
        assert_eq!(factory.notifier.notified().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_stage_env() {
        let store = seeded_store("DEV");
        let sink = MockMetricsSink::new();
        let factory = MockNotifierFactory::default();
        let pipeline = pipeline(None, &store, &sink, &factory);

        let err = pipeline.handle(&context(), &completed_event()).await.unwrap_err();

        assert!(matches!(err, ServiceError::NoEnvProvided));
        assert_eq!(store.call_count(), 0);
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0].error_type, "NoEnvProvidedError");
        assert_eq!(sent[0][0].environment, None);
    }

    #[tokio::test]
    async fn test_refresh_failure() {
        let store = seeded_store("DEV");
        store.set_fail(true);
        let sink = MockMetricsSink::new();
        let factory = MockNotifierFactory::default();
        let pipeline = pipeline(Some("DEV"), &store, &sink, &factory);

        let err = pipeline.handle(&context(), &completed_event()).await.unwrap_err();

        assert_eq!(err.name(), "RefreshConfigError");
        assert!(factory.configs().is_empty());
        let sent = sink.sent();
        assert_eq!(sent[0][0].error_type, "RefreshConfigError");
        assert_eq!(sent[0][0].environment.as_deref(), Some("DEV"));
    }

    #[tokio::test]
    async fn test_missing_parameter_fails_refresh() {
        let store = seeded_store("DEV");
        store.remove("/DEV/order-notifier/guestApiKey");
        let sink = MockMetricsSink::new();
        let factory = MockNotifierFactory::default();
        let pipeline = pipeline(Some("DEV"), &store, &sink, &factory);

        let err = pipeline.handle(&context(), &completed_event()).await.unwrap_err();

        assert_eq!(err.code(), "SYST-9004");
        assert!(err.to_string().contains("GuestApiKey"));
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_internal_error() {
        let store = seeded_store("DEV");
        store.set("/DEV/order-notifier/guestApiUrl", "not a url");
        let sink = MockMetricsSink::new();
        let factory = MockNotifierFactory::default();
        let pipeline = pipeline(Some("DEV"), &store, &sink, &factory);

        let err = pipeline.handle(&context(), &completed_event()).await.unwrap_err();
        assert_eq!(err.name(), "InternalError");
    }

    #[tokio::test]
    async fn test_webhook_server_error_is_reported() {
        let store = seeded_store("DEV");
        let sink = MockMetricsSink::new();
        let factory = MockNotifierFactory::default();
        factory.notifier.fail_next(GuestNotificationError::HttpError {
            status: 500,
            message: "boom".to_string(),
        });
        let pipeline = pipeline(Some("DEV"), &store, &sink, &factory);

        let err = pipeline.handle(&context(), &completed_event()).await.unwrap_err();

        assert_eq!(err.name(), "WebhookRequestError");
        assert_eq!(sink.sent()[0][0].error_type, "WebhookRequestError");

        // 次の呼び出しは成功し、メトリクスは送信されない
        pipeline.handle(&context(), &completed_event()).await.unwrap();
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_ttl_from_env_config() {
        let store = seeded_store("DEV");
        let sink = MockMetricsSink::new();
        let factory = MockNotifierFactory::default();
        let env = LambdaEnvConfig::new(Some("DEV".to_string()), "fn", Some(Duration::from_secs(60)));
        let pipeline = InvocationPipeline::new(&env, store.clone(), sink, factory);

        pipeline.handle(&context(), &completed_event()).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        pipeline.handle(&context(), &completed_event()).await.unwrap();

        assert_eq!(store.call_count(), 2);
    }
}
