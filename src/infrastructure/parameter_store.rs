//! SSM Parameter Store操作モジュール
//!
//! 設定キャッシュが使用するパラメータの一括取得を提供する。
//! - GetParametersで最大10件を復号付きで取得
//! - SDKクライアントには1試行あたりのタイムアウトを設定

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ssm::Client as SsmClient;
use thiserror::Error;
use tracing::{debug, warn};

/// GetParametersの1回あたりの最大パラメータ数
pub const MAX_PARAMETERS_PER_CALL: usize = 10;

/// SSMリクエストのタイムアウト
pub const DEFAULT_SSM_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// パラメータ取得のエラー型
#[derive(Debug, Error)]
pub enum ParameterStoreError {
    /// AWS SDK エラー
    #[error("AWS SSM APIエラー: {0}")]
    AwsSdkError(String),
    /// 1回の呼び出しで扱えるパラメータ数を超えている
    #[error("パラメータ数が上限を超えています: {0}件（上限10件）")]
    TooManyNames(usize),
}

/// パラメータストア操作トレイト（テスト用の抽象化）
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// パラメータを一括取得する
    ///
    /// # 引数
    /// * `names` - 完全修飾パラメータ名（最大10件）
    /// * `with_decryption` - SecureStringを復号するかどうか
    ///
    /// # 戻り値
    /// * `Ok(HashMap)` - パラメータ名 → 値。存在しないパラメータは含まれない
    /// * `Err(ParameterStoreError)` - エラー
    async fn fetch_parameters(
        &self,
        names: &[String],
        with_decryption: bool,
    ) -> Result<HashMap<String, String>, ParameterStoreError>;
}

/// 実際のAWS SSM SDKを使用したパラメータストア実装
pub struct AwsParameterStore {
    client: SsmClient,
}

impl AwsParameterStore {
    /// 新しいAwsParameterStoreを作成
    pub fn new(client: SsmClient) -> Self {
        Self { client }
    }

    /// AWS設定からクライアントを作成（リクエストタイムアウト付き）
    pub async fn from_config() -> Self {
        let timeout_config = aws_config::timeout::TimeoutConfig::builder()
            .operation_attempt_timeout(DEFAULT_SSM_REQUEST_TIMEOUT)
            .build();
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .timeout_config(timeout_config)
            .load()
            .await;
        Self::new(SsmClient::new(&config))
    }
}

#[async_trait]
impl ParameterStore for AwsParameterStore {
    async fn fetch_parameters(
        &self,
        names: &[String],
        with_decryption: bool,
    ) -> Result<HashMap<String, String>, ParameterStoreError> {
        if names.len() > MAX_PARAMETERS_PER_CALL {
            return Err(ParameterStoreError::TooManyNames(names.len()));
        }

        debug!(names = ?names, "GetParameters呼び出し");

        let output = self
            .client
            .get_parameters()
            .set_names(Some(names.to_vec()))
            .with_decryption(with_decryption)
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "GetParametersエラー");
                ParameterStoreError::AwsSdkError(err.to_string())
            })?;

        let invalid = output.invalid_parameters();
        if !invalid.is_empty() {
            warn!(invalid_parameters = ?invalid, "存在しないパラメータがあります");
        }

        let parameters = output
            .parameters()
            .iter()
            .filter_map(|p| Some((p.name()?.to_string(), p.value()?.to_string())))
            .collect();

        Ok(parameters)
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockParameterStore;
    use super::*;

    // ==================== ParameterStoreError テスト ====================

    #[test]
    fn test_parameter_store_error_display() {
        let sdk_error = ParameterStoreError::AwsSdkError("throttled".to_string());
        assert_eq!(sdk_error.to_string(), "AWS SSM APIエラー: throttled");

        let too_many = ParameterStoreError::TooManyNames(11);
        assert!(too_many.to_string().contains("11件"));
        assert!(too_many.to_string().contains("上限10件"));
    }

    // ==================== MockParameterStore テスト ====================

    #[tokio::test]
    async fn test_mock_returns_only_known_keys() {
        let store = MockParameterStore::new();
        store.set("/DEV/dbHost", "10.0.0.1");

        let names = vec!["/DEV/dbHost".to_string(), "/DEV/unknown".to_string()];
        let result = store.fetch_parameters(&names, true).await.unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.get("/DEV/dbHost").map(String::as_str), Some("10.0.0.1"));
        assert_eq!(store.call_count(), 1);
        assert_eq!(store.requested(), vec![names]);
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let store = MockParameterStore::new();
        store.set_fail(true);

        let result = store.fetch_parameters(&["/DEV/a".to_string()], true).await;
        assert!(matches!(result, Err(ParameterStoreError::AwsSdkError(_))));
    }

    #[tokio::test]
    async fn test_mock_rejects_oversized_batch() {
        let store = MockParameterStore::new();
        let names: Vec<String> = (0..11).map(|i| format!("/DEV/p{}", i)).collect();

        let result = store.fetch_parameters(&names, true).await;
        assert!(matches!(result, Err(ParameterStoreError::TooManyNames(11))));
    }
}
