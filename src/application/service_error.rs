//! サービスエラー定義
//!
//! ハンドラーから返すエラーを安定したコード・種別名・再試行可否とともに定義する。
//! 種別名はエラーメトリクスのTypeディメンションに使用する。

use thiserror::Error;

use crate::domain::OrderImageError;
use crate::infrastructure::{ConfigCacheError, GuestNotificationError};

/// サービスエラー
#[derive(Debug, Error)]
pub enum ServiceError {
    /// 分類できないエラー
    #[error("不明なエラー: {0}")]
    Unknown(String),

    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),

    /// JSONの解析に失敗
    #[error("JSONの解析に失敗: {0}")]
    JsonParse(String),

    /// 環境名が指定されていない
    #[error("環境名（STAGE_ENV）が指定されていません")]
    NoEnvProvided,

    /// 設定の更新に失敗
    #[error("設定の更新に失敗: {0}")]
    RefreshConfig(String),

    /// イベントソースからのイベントが不正
    #[error("イベントソースからのイベントが不正です: {0}")]
    InvalidEventFromSource(String),

    /// 通知APIへのリクエストに失敗
    #[error("通知APIへのリクエストに失敗: {0}")]
    WebhookRequest(String),
}

impl ServiceError {
    /// 任意のエラーを不明なエラーとして包む
    pub fn unknown(err: impl std::fmt::Display) -> Self {
        ServiceError::Unknown(err.to_string())
    }

    /// エラーコード
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unknown(_) => "SYST-9999",
            ServiceError::Internal(_) => "SYST-9998",
            ServiceError::JsonParse(_) => "SYST-9002",
            ServiceError::NoEnvProvided => "SYST-9003",
            ServiceError::RefreshConfig(_) => "SYST-9004",
            ServiceError::InvalidEventFromSource(_) => "SYST-9007",
            ServiceError::WebhookRequest(_) => "SYST-9008",
        }
    }

    /// エラー種別名（メトリクスのTypeディメンション）
    pub fn name(&self) -> &'static str {
        match self {
            ServiceError::Unknown(_) => "UnknownError",
            ServiceError::Internal(_) => "InternalError",
            ServiceError::JsonParse(_) => "JSONParseError",
            ServiceError::NoEnvProvided => "NoEnvProvidedError",
            ServiceError::RefreshConfig(_) => "RefreshConfigError",
            ServiceError::InvalidEventFromSource(_) => "InvalidEventFromSourceError",
            ServiceError::WebhookRequest(_) => "WebhookRequestError",
        }
    }

    /// 再試行で回復しうるエラーか
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ServiceError::NoEnvProvided | ServiceError::RefreshConfig(_)
        )
    }
}

impl From<ConfigCacheError> for ServiceError {
    fn from(err: ConfigCacheError) -> Self {
        ServiceError::RefreshConfig(err.to_string())
    }
}

impl From<OrderImageError> for ServiceError {
    fn from(err: OrderImageError) -> Self {
        ServiceError::JsonParse(err.to_string())
    }
}

impl From<GuestNotificationError> for ServiceError {
    fn from(err: GuestNotificationError) -> Self {
        ServiceError::WebhookRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog() {
        let cases = [
            (ServiceError::Unknown("x".into()), "SYST-9999", "UnknownError", true),
            (ServiceError::Internal("x".into()), "SYST-9998", "InternalError", true),
            (ServiceError::JsonParse("x".into()), "SYST-9002", "JSONParseError", true),
            (ServiceError::NoEnvProvided, "SYST-9003", "NoEnvProvidedError", false),
            (ServiceError::RefreshConfig("x".into()), "SYST-9004", "RefreshConfigError", false),
            (
                ServiceError::InvalidEventFromSource("x".into()),
                "SYST-9007",
                "InvalidEventFromSourceError",
                true,
            ),
            (ServiceError::WebhookRequest("x".into()), "SYST-9008", "WebhookRequestError", true),
        ];

        for (error, code, name, retryable) in cases {
            assert_eq!(error.code(), code);
            assert_eq!(error.name(), name);
            assert_eq!(error.is_retryable(), retryable, "{}", name);
        }
    }

    #[test]
    fn test_unknown_wraps_display() {
        let err = ServiceError::unknown(std::io::Error::other("disk full"));
        assert!(matches!(err, ServiceError::Unknown(ref m) if m == "disk full"));
    }

    #[test]
    fn test_from_config_cache_error() {
        let err: ServiceError = ConfigCacheError::EnvironmentNotSet.into();
        assert_eq!(err.name(), "RefreshConfigError");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_order_image_error() {
        let err: ServiceError = OrderImageError::InvalidPayload("eof".to_string()).into();
        assert_eq!(err.code(), "SYST-9002");
    }

    #[test]
    fn test_from_guest_notification_error() {
        let err: ServiceError = GuestNotificationError::HttpError {
            status: 502,
            message: "bad gateway".to_string(),
        }
        .into();
        assert_eq!(err.name(), "WebhookRequestError");
        assert!(err.to_string().contains("502"));
    }
}
