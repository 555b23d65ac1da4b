//! ログ基盤モジュール
//!
//! Lambda環境向けの構造化ログ設定を提供する。
//! tracingクレートを使用し、JSON形式で出力する。
//! ログレベルはParameter Storeの設定値で実行中に切り替えられる。

use std::sync::{Once, OnceLock};

use thiserror::Error;
use tracing_subscriber::{
    EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// ログサブスクライバー初期化用の同期プリミティブ
static INIT: Once = Once::new();

/// フィルターの差し替え用ハンドル
static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// ログ設定のエラー型
#[derive(Debug, Error)]
pub enum LoggingError {
    /// 不明なログレベル
    #[error("不明なログレベルです: {0}")]
    InvalidLevel(String),
    /// サブスクライバーが未初期化
    #[error("ログサブスクライバーが初期化されていません")]
    NotInitialized,
    /// フィルターの差し替えに失敗
    #[error("ログレベルの変更に失敗: {0}")]
    ReloadFailed(String),
}

/// Lambda環境向けのログサブスクライバーを初期化する
///
/// 環境変数`RUST_LOG`またはデフォルト（info）でフィルタリングを行う。
/// 複数回呼び出しても最初の呼び出しのみ初期化を実行する。
pub fn init_logging() {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let (filter_layer, handle) = reload::Layer::new(env_filter);

        // JSON形式のログレイヤー（Lambda/CloudWatch向け）
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .flatten_event(true)
            .with_current_span(true);

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(json_layer)
            .init();

        let _ = FILTER_HANDLE.set(handle);
    });
}

/// ログレベル名をフィルター指定に変換する
///
/// 運用側の設定値（error/warn/info/http/verbose/debug/silly）を
/// tracingのレベルに対応付ける。大文字小文字は区別しない。
pub fn level_directive(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "error" => Ok("error"),
        "warn" | "warning" => Ok("warn"),
        "info" => Ok("info"),
        "http" | "verbose" | "debug" => Ok("debug"),
        "silly" | "trace" => Ok("trace"),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}

/// 実行中のログレベルを変更する
pub fn set_log_level(level: &str) -> Result<(), LoggingError> {
    let directive = level_directive(level)?;
    let handle = FILTER_HANDLE.get().ok_or(LoggingError::NotInitialized)?;
    handle
        .reload(EnvFilter::new(directive))
        .map_err(|e| LoggingError::ReloadFailed(e.to_string()))
}

/// テスト用のログサブスクライバーを初期化する（人間が読みやすい形式）
#[cfg(test)]
pub fn init_test_logging() {
    static TEST_INIT: Once = Once::new();

    TEST_INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let (filter_layer, handle) = reload::Layer::new(env_filter);

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        if tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init()
            .is_ok()
        {
            let _ = FILTER_HANDLE.set(handle);
        }
    });
}
