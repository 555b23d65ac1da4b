// GuestNotificationClient - ゲスト通知API用HTTPクライアント
//
// 注文完了時に顧客へ通知するため、ゲスト通知APIに注文JSONを送信する。
// エンドポイントとAPIキーは設定キャッシュ（SSM Parameter Store）から取得する。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use url::Url;

/// 最大再試行回数
const MAX_RETRIES: u32 = 3;

/// リクエストタイムアウト（秒）
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// 接続タイムアウト（秒）
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// APIキーを付与するヘッダー名
const API_KEY_HEADER: &str = "x-api-key";

/// ゲスト通知APIのエラー型
#[derive(Debug, Error)]
pub enum GuestNotificationError {
    /// エンドポイントURLが不正
    #[error("通知APIエンドポイントが不正です: {0}")]
    InvalidEndpoint(String),

    /// HTTPエラー（ステータスコード付き）
    #[error("HTTPエラー: status={status}, message={message}")]
    HttpError {
        /// HTTPステータスコード
        status: u16,
        /// エラーメッセージ
        message: String,
    },

    /// ネットワークエラー
    #[error("ネットワークエラー: {0}")]
    NetworkError(String),

    /// シリアライズエラー
    #[error("シリアライズエラー: {0}")]
    SerializationError(String),
}

impl GuestNotificationError {
    /// 通知API側のサーバーエラー（5xx）かどうか
    pub fn is_server_error(&self) -> bool {
        matches!(self, GuestNotificationError::HttpError { status, .. } if *status >= 500)
    }
}

/// ゲスト通知APIの接続設定
#[derive(Clone)]
pub struct GuestNotificationConfig {
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for GuestNotificationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestNotificationConfig")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl GuestNotificationConfig {
    /// 新しい設定を作成
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// エンドポイントURLを取得
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// APIキーを取得
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// 通知エンドポイントURLを構築
    ///
    /// # 戻り値
    /// 例: "https://guest.example.com/notifications"
    pub fn notifications_url(&self) -> Result<Url, GuestNotificationError> {
        let url = format!("{}/notifications", self.endpoint.trim_end_matches('/'));
        Url::parse(&url).map_err(|e| GuestNotificationError::InvalidEndpoint(format!("{}: {}", url, e)))
    }
}

/// ゲスト通知トレイト（テスト用の抽象化）
#[async_trait]
pub trait GuestNotifier: Send + Sync {
    /// 注文完了を通知する
    ///
    /// # 引数
    /// * `order` - orderPayloadを展開済みの注文JSON
    async fn notify_order_completed(&self, order: &Value) -> Result<(), GuestNotificationError>;
}

/// 設定から通知クライアントを生成するトレイト
pub trait NotifierFactory: Send + Sync {
    /// 生成される通知クライアントの型
    type Notifier: GuestNotifier;

    /// 現在の設定から通知クライアントを生成
    fn create(&self, config: &GuestNotificationConfig) -> Result<Self::Notifier, GuestNotificationError>;
}

/// GuestNotificationClient - ゲスト通知APIクライアント
///
/// 指数バックオフによる再試行機能を持つ。
#[derive(Clone)]
pub struct GuestNotificationClient {
    /// HTTPクライアント（再試行ミドルウェア付き）
    client: ClientWithMiddleware,
    /// 通知エンドポイントURL
    url: Url,
    /// APIキー
    api_key: String,
}

impl std::fmt::Debug for GuestNotificationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestNotificationClient")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl GuestNotificationClient {
    /// 設定からGuestNotificationClientを作成
    pub fn new(config: &GuestNotificationConfig) -> Result<Self, GuestNotificationError> {
        let url = config.notifications_url()?;
        info!(url = %url, "GuestNotificationClientを初期化");

        // 基本HTTPクライアントを作成
        let base_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| GuestNotificationError::NetworkError(e.to_string()))?;

        // 指数バックオフ再試行ポリシー
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);

        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            url,
            api_key: config.api_key().to_string(),
        })
    }
}

#[async_trait]
impl GuestNotifier for GuestNotificationClient {
    #[instrument(skip(self, order))]
    async fn notify_order_completed(&self, order: &Value) -> Result<(), GuestNotificationError> {
        debug!(url = %self.url, "ゲスト通知を送信");

        let body = serde_json::to_string(order).map_err(|e| {
            error!(error = %e, "注文のシリアライズに失敗");
            GuestNotificationError::SerializationError(e.to_string())
        })?;

        let response = self
            .client
            .post(self.url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "ゲスト通知リクエスト失敗");
                GuestNotificationError::NetworkError(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            info!(status = %status, "ゲスト通知に成功");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "ゲスト通知エラー");

        Err(GuestNotificationError::HttpError {
            status: status.as_u16(),
            message: body,
        })
    }
}

/// HTTPクライアントを生成するファクトリ
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpNotifierFactory;

impl NotifierFactory for HttpNotifierFactory {
    type Notifier = GuestNotificationClient;

    fn create(&self, config: &GuestNotificationConfig) -> Result<Self::Notifier, GuestNotificationError> {
        GuestNotificationClient::new(config)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    // ==================== GuestNotificationConfig テスト ====================

    #[test]
    fn test_notifications_url_without_trailing_slash() {
        let config = GuestNotificationConfig::new("https://guest.example.com", "key");
        assert_eq!(
            config.notifications_url().unwrap().as_str(),
            "https://guest.example.com/notifications"
        );
    }

    #[test]
    fn test_notifications_url_with_trailing_slash() {
        let config = GuestNotificationConfig::new("https://guest.example.com/v1/", "key");
        assert_eq!(
            config.notifications_url().unwrap().as_str(),
            "https://guest.example.com/v1/notifications"
        );
    }

    #[test]
    fn test_notifications_url_invalid() {
        let config = GuestNotificationConfig::new("not a url", "key");
        assert!(matches!(
            config.notifications_url(),
            Err(GuestNotificationError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_config_debug_hides_api_key() {
        let config = GuestNotificationConfig::new("https://guest.example.com", "super-secret");
        let debug = format!("{:?}", config);
        assert!(debug.contains("guest.example.com"));
        assert!(!debug.contains("super-secret"));
    }

    // ==================== GuestNotificationClient テスト ====================

    #[test]
    fn test_client_new_with_invalid_endpoint() {
        let config = GuestNotificationConfig::new("::::", "key");
        assert!(GuestNotificationClient::new(&config).is_err());
    }

    #[test]
    fn test_factory_creates_client() {
        let config = GuestNotificationConfig::new("https://guest.example.com", "secret-key");
        let client = HttpNotifierFactory.create(&config).unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("https://guest.example.com/notifications"));
        assert!(!debug.contains("secret-key"));
    }

    // ==================== エラー型テスト ====================

    #[test]
    fn test_is_server_error() {
        let server = GuestNotificationError::HttpError {
            status: 503,
            message: "unavailable".to_string(),
        };
        let client = GuestNotificationError::HttpError {
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(server.is_server_error());
        assert!(!client.is_server_error());
        assert!(!GuestNotificationError::NetworkError("timeout".to_string()).is_server_error());
    }

    #[test]
    fn test_error_display() {
        let error = GuestNotificationError::HttpError {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(error.to_string(), "HTTPエラー: status=500, message=boom");
    }
}
