//! エラーメトリクスモジュール
//!
//! 呼び出し中に発生したエラーを種別ごとに集計し、呼び出し終了時に
//! CloudWatchへ送信する。送信に失敗してもハンドラーの結果には影響しない。

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use aws_sdk_cloudwatch::Client as CloudWatchClient;
use aws_sdk_cloudwatch::primitives::DateTime;
use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};
use thiserror::Error;
use tracing::{debug, error, info};

/// メトリクスの名前空間
pub const METRIC_NAMESPACE: &str = "OrderNotifier/Lambda";

/// メトリクス名
pub const METRIC_NAME: &str = "Error";

/// メトリクス送信のエラー型
#[derive(Debug, Error)]
pub enum MetricsError {
    /// AWS SDK エラー
    #[error("AWS CloudWatch APIエラー: {0}")]
    AwsSdkError(String),
}

/// エラー種別ごとの集計値
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMetricDatum {
    /// エラー種別（Typeディメンション）
    pub error_type: String,
    /// 関数名（FunctionNameディメンション）
    pub function_name: String,
    /// 環境（Environmentディメンション）
    pub environment: Option<String>,
    /// 発生回数
    pub count: u64,
}

/// メトリクス送信トレイト（テスト用の抽象化）
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// 集計値を送信する
    async fn put_error_counts(&self, data: &[ErrorMetricDatum]) -> Result<(), MetricsError>;
}

/// エラーメトリクスの集計器
///
/// Lambdaのウォームスタート間で共有され、送信ごとにリセットされる。
#[derive(Debug)]
pub struct ErrorMetrics {
    function_name: String,
    samples: Mutex<BTreeMap<String, u64>>,
}

impl ErrorMetrics {
    /// 新しい集計器を作成
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            samples: Mutex::new(BTreeMap::new()),
        }
    }

    /// エラー発生を1件記録する
    pub fn add_sample(&self, error_type: &str) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        *samples.entry(error_type.to_string()).or_insert(0) += 1;
    }

    /// 現在の集計値を取り出してリセットする
    pub fn take(&self, environment: Option<&str>) -> Vec<ErrorMetricDatum> {
        let samples = std::mem::take(
            &mut *self.samples.lock().unwrap_or_else(PoisonError::into_inner),
        );
        samples
            .into_iter()
            .map(|(error_type, count)| ErrorMetricDatum {
                error_type,
                function_name: self.function_name.clone(),
                environment: environment.map(str::to_string),
                count,
            })
            .collect()
    }

    /// 集計値を送信してリセットする
    ///
    /// 記録がなければ何もしない。送信エラーはログのみ。
    pub async fn report<M: MetricsSink + ?Sized>(&self, sink: &M, environment: Option<&str>) {
        let data = self.take(environment);
        if data.is_empty() {
            return;
        }

        info!(metric_count = data.len(), "エラーメトリクスを送信");
        match sink.put_error_counts(&data).await {
            Ok(()) => debug!("エラーメトリクスの送信に成功"),
            Err(err) => error!(error = %err, "エラーメトリクスの送信に失敗"),
        }
    }
}

/// 実際のAWS CloudWatch SDKを使用したメトリクス送信実装
pub struct AwsCloudWatchMetrics {
    client: CloudWatchClient,
}

impl AwsCloudWatchMetrics {
    /// 新しいAwsCloudWatchMetricsを作成
    pub fn new(client: CloudWatchClient) -> Self {
        Self { client }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(CloudWatchClient::new(&config))
    }

    fn build_datum(datum: &ErrorMetricDatum, timestamp: DateTime) -> MetricDatum {
        let mut dimensions = vec![
            dimension("Type", &datum.error_type),
            dimension("FunctionName", &datum.function_name),
        ];
        if let Some(environment) = &datum.environment {
            dimensions.push(dimension("Environment", environment));
        }

        MetricDatum::builder()
            .metric_name(METRIC_NAME)
            .set_dimensions(Some(dimensions))
            .timestamp(timestamp)
            .unit(StandardUnit::Count)
            .value(datum.count as f64)
            .build()
    }
}

fn dimension(name: &str, value: &str) -> Dimension {
    Dimension::builder().name(name).value(value).build()
}

#[async_trait]
impl MetricsSink for AwsCloudWatchMetrics {
    async fn put_error_counts(&self, data: &[ErrorMetricDatum]) -> Result<(), MetricsError> {
        let timestamp = DateTime::from(SystemTime::now());
        let metric_data: Vec<MetricDatum> = data
            .iter()
            .map(|datum| Self::build_datum(datum, timestamp))
            .collect();

        self.client
            .put_metric_data()
            .namespace(METRIC_NAMESPACE)
            .set_metric_data(Some(metric_data))
            .send()
            .await
            .map_err(|err| MetricsError::AwsSdkError(err.to_string()))?;

        Ok(())
    }
}
