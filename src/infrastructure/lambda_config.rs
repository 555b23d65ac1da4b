//! Lambda実行環境の設定
//!
//! プロセスの環境変数から読み込む設定値を保持する。
//! SSMから取得する設定は`ConfigCache`が扱う。

use std::time::Duration;

use thiserror::Error;

/// 環境名を指定する環境変数
pub const STAGE_ENV_VAR: &str = "STAGE_ENV";

/// Lambda関数名（Lambdaランタイムが設定）
pub const FUNCTION_NAME_VAR: &str = "AWS_LAMBDA_FUNCTION_NAME";

/// 設定キャッシュの有効期間（秒）を指定する環境変数
pub const CACHE_TTL_VAR: &str = "CONFIG_CACHE_TTL_SECS";

/// 関数名が取得できない場合のデフォルト
pub const DEFAULT_FUNCTION_NAME: &str = "order-notifier-handler";

/// Lambda設定のエラー型
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LambdaConfigError {
    /// 環境変数の値が不正
    #[error("環境変数の値が不正です: {name}={value}")]
    InvalidValue {
        /// 環境変数名
        name: String,
        /// 設定されていた値
        value: String,
    },
}

/// 環境変数から読み込んだLambda設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaEnvConfig {
    /// 環境名（未設定または空の場合はNone）
    stage_env: Option<String>,
    /// Lambda関数名
    function_name: String,
    /// 設定キャッシュの有効期間（未指定ならデフォルト）
    cache_ttl: Option<Duration>,
}

impl LambdaEnvConfig {
    /// 環境変数から設定を読み込む
    ///
    /// 環境変数:
    /// - STAGE_ENV: 環境名（任意。未設定時は呼び出しごとにNoEnvProvidedとなる）
    /// - AWS_LAMBDA_FUNCTION_NAME: 関数名（任意）
    /// - CONFIG_CACHE_TTL_SECS: 設定キャッシュの有効期間（任意）
    pub fn from_env() -> Result<Self, LambdaConfigError> {
        let stage_env = stage_env_from_env();
        let function_name = function_name_from_env();

        let cache_ttl = match std::env::var(CACHE_TTL_VAR) {
            Ok(value) => Some(parse_ttl(&value)?),
            Err(_) => None,
        };

        Ok(Self::new(stage_env, function_name, cache_ttl))
    }

    /// 明示的な値で設定を作成（テスト用）
    pub fn new(
        stage_env: Option<String>,
        function_name: impl Into<String>,
        cache_ttl: Option<Duration>,
    ) -> Self {
        Self {
            stage_env: stage_env.filter(|env| !env.trim().is_empty()),
            function_name: function_name.into(),
            cache_ttl,
        }
    }

    /// 環境名を取得
    pub fn stage_env(&self) -> Option<&str> {
        self.stage_env.as_deref()
    }

    /// 関数名を取得
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// 設定キャッシュの有効期間を取得
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }
}

/// 環境名を環境変数から取得（空の場合はNone）
pub fn stage_env_from_env() -> Option<String> {
    std::env::var(STAGE_ENV_VAR)
        .ok()
        .filter(|env| !env.trim().is_empty())
}

/// 関数名を環境変数から取得（未設定ならデフォルト）
pub fn function_name_from_env() -> String {
    std::env::var(FUNCTION_NAME_VAR)
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_FUNCTION_NAME.to_string())
}

fn parse_ttl(value: &str) -> Result<Duration, LambdaConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| LambdaConfigError::InvalidValue {
            name: CACHE_TTL_VAR.to_string(),
            value: value.to_string(),
        })
}
