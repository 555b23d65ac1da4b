//! 設定キャッシュ
//!
//! SSM Parameter Storeから取得した設定値をプロセス内にキャッシュする。
//! - 環境（DEV/PRODなど）ごとにパラメータ名へプレフィックスを付与
//! - 有効期限（デフォルト30分）を過ぎた場合のみリモートから再取得
//! - 最大10件ずつのバッチを並列に取得
//! - 値が初めて設定された時（initialize）と変化した時（change）にリスナーへ通知
//!
//! Lambdaのウォームスタート間でインスタンスを共有する想定のため、
//! すべての操作は`&self`で行う。

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::parameter_store::{ParameterStore, ParameterStoreError};
use crate::domain::{ConfigBatch, ConfigItem, ConfigItemError, KeyMap};

/// デフォルトのキャッシュ有効期間（30分）
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(30 * 60);

/// 環境変更による更新のやり直し回数の上限
const MAX_REFRESH_ATTEMPTS: u32 = 3;

/// 設定変更リスナー。影響を受けたエイリアスのリストを受け取る
pub type ConfigListener = Box<dyn Fn(&[String]) + Send + Sync>;

/// 設定キャッシュのエラー型
#[derive(Debug, Error)]
pub enum ConfigCacheError {
    /// 有効期間やパラメータ定義の不備
    #[error("設定キャッシュの構成エラー: {0}")]
    Configuration(String),
    /// 環境が設定される前に更新・参照された
    #[error("環境が設定される前に設定を更新・参照しようとしました")]
    EnvironmentNotSet,
    /// パラメータストアから一部のキーが返らなかった
    #[error("パラメータが不足しています: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
    /// パラメータストアのエラー
    #[error(transparent)]
    RemoteFetch(#[from] ParameterStoreError),
    /// 一度も更新に成功していない状態で値を参照した
    #[error("設定は参照前に更新する必要があります")]
    NotYetRefreshed,
    /// 更新中に環境が変更され続けた
    #[error("更新中に環境が変更されたため設定を確定できません（{0}回試行）")]
    EnvironmentChanged(u32),
}

impl From<ConfigItemError> for ConfigCacheError {
    fn from(err: ConfigItemError) -> Self {
        ConfigCacheError::Configuration(err.to_string())
    }
}

/// キャッシュの可変状態
#[derive(Debug, Default)]
struct CacheState {
    /// 現在の環境
    environment: Option<String>,
    /// 現在の環境に対応するキーマッピングとバッチ計画
    key_map: Option<KeyMap>,
    /// 有効期限。Noneはエポック（常に期限切れ）を表す
    expiration: Option<Instant>,
    /// 一度でも全バッチの更新に成功したか
    refreshed: bool,
    /// 環境変更ごとに増える世代番号
    generation: u64,
    /// エイリアス → 値
    items: HashMap<String, String>,
}

/// 設定キャッシュ
///
/// # 使用例
/// ```ignore
/// let cache = ConfigCache::new(store, vec![ConfigItem::new("/dbHost", "DB_HOST")]);
/// cache.set_environment("DEV")?;
/// cache.refresh_if_stale().await?;
/// let host = cache.get_value("DB_HOST")?;
/// ```
pub struct ConfigCache<S> {
    store: S,
    items: Vec<ConfigItem>,
    aliases: Vec<String>,
    expiry: Duration,
    state: RwLock<CacheState>,
    /// 同時に1つの更新だけを実行するためのゲート
    refresh_gate: Mutex<()>,
    initialize_listeners: RwLock<Vec<ConfigListener>>,
    change_listeners: RwLock<Vec<ConfigListener>>,
}

impl<S: ParameterStore> ConfigCache<S> {
    /// デフォルトの有効期間（30分）で作成
    pub fn new(store: S, items: Vec<ConfigItem>) -> Self {
        Self::with_expiry(store, items, DEFAULT_EXPIRY)
    }

    /// 有効期間を指定して作成
    ///
    /// 有効期間の検証は`set_environment`で行う。
    pub fn with_expiry(store: S, items: Vec<ConfigItem>, expiry: Duration) -> Self {
        let aliases = items.iter().map(|item| item.alias().to_string()).collect();
        Self {
            store,
            items,
            aliases,
            expiry,
            state: RwLock::new(CacheState::default()),
            refresh_gate: Mutex::new(()),
            initialize_listeners: RwLock::new(Vec::new()),
            change_listeners: RwLock::new(Vec::new()),
        }
    }

    /// 管理対象のエイリアス
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// 現在の環境
    pub fn environment(&self) -> Option<String> {
        self.read_state().environment.clone()
    }

    /// 環境を設定する
    ///
    /// 同じ環境の場合は何もしない。環境が変わった場合はキーマッピングと
    /// バッチ計画を再構築し、有効期限をエポックに戻す。
    /// 既存の値は保持するため、次回の更新では変化した値だけが
    /// changeとして通知される。
    pub fn set_environment(&self, env: &str) -> Result<(), ConfigCacheError> {
        let mut state = self.write_state();
        if state.environment.as_deref() == Some(env) {
            return Ok(());
        }

        if self.expiry.is_zero() {
            return Err(ConfigCacheError::Configuration(
                "有効期間は0より大きい値を指定してください".to_string(),
            ));
        }
        let key_map = KeyMap::build(env, &self.items)?;

        debug!(
            env = env,
            keys = ?key_map.keys().collect::<Vec<_>>(),
            key_count = key_map.len(),
            batch_count = key_map.batches().len(),
            "キーマッピングを構築"
        );

        state.environment = Some(env.to_string());
        state.key_map = Some(key_map);
        state.expiration = None;
        state.generation += 1;
        Ok(())
    }

    /// 有効期限切れかどうか
    pub fn is_stale(&self) -> bool {
        match self.read_state().expiration {
            Some(expiration) => Instant::now() > expiration,
            None => true,
        }
    }

    /// 有効期限切れの場合のみ設定を再取得する
    ///
    /// 同時に呼び出された場合は1つの更新に合流する。
    /// 更新中に環境が変更された場合は新しい環境で取得し直す。
    pub async fn refresh_if_stale(&self) -> Result<(), ConfigCacheError> {
        if self.aliases.is_empty() || !self.is_stale() {
            info!(key_count = self.aliases.len(), "キャッシュ済みの設定を使用");
            return Ok(());
        }

        let _gate = self.refresh_gate.lock().await;
        for attempt in 1..=MAX_REFRESH_ATTEMPTS {
            // 待機中に他の呼び出しが更新を終えていれば何もしない
            if !self.is_stale() {
                debug!("並行した更新が完了済み");
                return Ok(());
            }
            if self.refresh().await? {
                return Ok(());
            }
            warn!(attempt = attempt, "更新中に環境が変更されたため再取得");
        }

        Err(ConfigCacheError::EnvironmentChanged(MAX_REFRESH_ATTEMPTS))
    }

    /// エイリアスの値を取得する
    ///
    /// 値が一度も取得されていないエイリアスは`Ok(None)`を返す。
    pub fn get_value(&self, alias: &str) -> Result<Option<String>, ConfigCacheError> {
        let state = self.read_state();
        if state.environment.is_none() {
            return Err(ConfigCacheError::EnvironmentNotSet);
        }
        if !state.refreshed {
            return Err(ConfigCacheError::NotYetRefreshed);
        }
        Ok(state.items.get(alias).cloned())
    }

    /// 値が初めて設定された時のリスナーを登録する
    pub fn on_initialize<F>(&self, listener: F)
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        write_lock(&self.initialize_listeners).push(Box::new(listener));
    }

    /// 値が変化した時のリスナーを登録する
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        write_lock(&self.change_listeners).push(Box::new(listener));
    }

    /// 全バッチを並列に取得する
    ///
    /// 失敗したバッチがあっても全バッチの完了を待ち、最初のエラーを返す。
    /// 有効期限は全バッチ成功時のみ更新する。
    /// 取得中に環境が変更された場合は何も確定せず`Ok(false)`を返す。
    async fn refresh(&self) -> Result<bool, ConfigCacheError> {
        let (key_map, generation) = {
            let state = self.read_state();
            let key_map = state
                .key_map
                .clone()
                .ok_or(ConfigCacheError::EnvironmentNotSet)?;
            (key_map, state.generation)
        };

        let results = join_all(
            key_map
                .batches()
                .iter()
                .map(|batch| self.refresh_batch(&key_map, batch, generation)),
        )
        .await;

        if self.read_state().generation != generation {
            debug!(env = key_map.env(), "更新中に環境が変更されたため結果を破棄");
            return Ok(false);
        }

        let mut first_error = None;
        for result in results {
            if let Err(err) = result {
                error!(error = %err, "設定バッチの読み込みに失敗");
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let mut state = self.write_state();
        if state.generation != generation {
            return Ok(false);
        }
        state.expiration = Some(Instant::now() + self.expiry);
        state.refreshed = true;
        debug!(
            env = key_map.env(),
            item_count = state.items.len(),
            "設定を更新"
        );
        Ok(true)
    }

    /// 1バッチ分を取得してキャッシュにマージする
    async fn refresh_batch(
        &self,
        key_map: &KeyMap,
        batch: &ConfigBatch,
        generation: u64,
    ) -> Result<(), ConfigCacheError> {
        debug!(keys = ?batch.keys(), "設定を読み込み中");

        let params = self.store.fetch_parameters(batch.keys(), true).await?;

        let mut fetched = HashMap::with_capacity(params.len());
        for (key, value) in params {
            if let Some(alias) = key_map.alias_for(&key) {
                fetched.insert(alias.to_string(), value);
            }
        }

        let missing: Vec<String> = batch
            .aliases()
            .iter()
            .filter(|alias| !fetched.contains_key(*alias))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ConfigCacheError::MissingKeys(missing));
        }

        let (initialized, changed) = {
            let mut state = self.write_state();
            if state.generation != generation {
                debug!(keys = ?batch.keys(), "環境が変更されたためバッチ結果を破棄");
                return Ok(());
            }

            let mut initialized = Vec::new();
            let mut changed = Vec::new();
            for alias in batch.aliases() {
                match (state.items.get(alias), fetched.get(alias)) {
                    (None, _) => initialized.push(alias.clone()),
                    (Some(previous), Some(value)) if previous != value => {
                        changed.push(alias.clone())
                    }
                    _ => {}
                }
            }
            state.items.extend(fetched);
            (initialized, changed)
        };

        debug!(keys = ?batch.keys(), "設定の読み込みに成功");

        // 状態ロックを解放してから通知する（リスナーからget_valueを呼べるように）
        if !initialized.is_empty() {
            emit(&self.initialize_listeners, &initialized);
        }
        if !changed.is_empty() {
            emit(&self.change_listeners, &changed);
        }
        Ok(())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn emit(listeners: &RwLock<Vec<ConfigListener>>, aliases: &[String]) {
    let listeners = listeners.read().unwrap_or_else(PoisonError::into_inner);
    for listener in listeners.iter() {
        listener(aliases);
    }
}
