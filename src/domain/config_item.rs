//! 設定項目とキーマッピング
//!
//! SSM Parameter Storeのパラメータ名（環境プレフィックス付き）と
//! ローカルで参照するエイリアスとの対応を表す。
//! GetParametersは1回の呼び出しで最大10件までしか取得できないため、
//! キーマッピング構築時にバッチ分割も行う。

use std::collections::HashMap;

use thiserror::Error;

/// 1回のリモート取得で扱える最大キー数
pub const MAX_BATCH_SIZE: usize = 10;

/// キーマッピング構築のエラー型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigItemError {
    /// 完全修飾キーが重複している
    #[error("パラメータ名が重複しています: {0}")]
    DuplicateKey(String),
}

/// 設定項目の静的な定義
///
/// `name`は環境プレフィックスを除いたパラメータ名（例: "/dbHost"）、
/// `alias`は利用側が値を参照するための名前（例: "DB_HOST"）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigItem {
    name: String,
    alias: String,
}

impl ConfigItem {
    /// 新しい設定項目を作成
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
        }
    }

    /// パラメータ名を取得
    pub fn name(&self) -> &str {
        &self.name
    }

    /// エイリアスを取得
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// 環境プレフィックスを付与した完全修飾キーを構築
    ///
    /// 例: 環境 "DEV"、名前 "/dbHost" → "/DEV/dbHost"
    pub fn qualified_key(&self, env: &str) -> String {
        format!("/{}{}", env, self.name)
    }
}

/// 1回のリモート取得で扱うキーとエイリアスの組
///
/// `keys[i]`のエイリアスは常に`aliases[i]`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBatch {
    keys: Vec<String>,
    aliases: Vec<String>,
}

impl ConfigBatch {
    /// 完全修飾キーのリスト
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// キーと同順のエイリアスのリスト
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }
}

/// 環境に紐づいた完全修飾キー → エイリアスの対応表
///
/// 環境が変わるたびに再構築される。構築後は読み取り専用。
#[derive(Debug, Clone)]
pub struct KeyMap {
    env: String,
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
    batches: Vec<ConfigBatch>,
}

impl KeyMap {
    /// 環境と設定項目からキーマッピングとバッチ計画を構築
    ///
    /// キーの順序は設定項目の順序を保持する。
    pub fn build(env: &str, items: &[ConfigItem]) -> Result<Self, ConfigItemError> {
        let mut entries = Vec::with_capacity(items.len());
        let mut index = HashMap::with_capacity(items.len());

        for item in items {
            let key = item.qualified_key(env);
            if index.contains_key(&key) {
                return Err(ConfigItemError::DuplicateKey(key));
            }
            index.insert(key.clone(), entries.len());
            entries.push((key, item.alias().to_string()));
        }

        let batches = entries
            .chunks(MAX_BATCH_SIZE)
            .map(|chunk| ConfigBatch {
                keys: chunk.iter().map(|(key, _)| key.clone()).collect(),
                aliases: chunk.iter().map(|(_, alias)| alias.clone()).collect(),
            })
            .collect();

        Ok(Self {
            env: env.to_string(),
            entries,
            index,
            batches,
        })
    }

    /// 構築に使用した環境
    pub fn env(&self) -> &str {
        &self.env
    }

    /// 完全修飾キーを設定項目の順で返す
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// 完全修飾キーに対応するエイリアスを取得
    pub fn alias_for(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .map(|&i| self.entries[i].1.as_str())
    }

    /// 最大10件ごとに分割されたバッチ計画
    pub fn batches(&self) -> &[ConfigBatch] {
        &self.batches
    }

    /// キー数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// キーが1件もないかどうか
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(count: usize) -> Vec<ConfigItem> {
        (0..count)
            .map(|i| ConfigItem::new(format!("/param{}", i), format!("ALIAS_{}", i)))
            .collect()
    }

    // ==================== ConfigItem テスト ====================

    #[test]
    fn test_qualified_key_prefixes_env() {
        let item = ConfigItem::new("/dbHost", "DB_HOST");
        assert_eq!(item.qualified_key("DEV"), "/DEV/dbHost");
        assert_eq!(item.qualified_key("PROD"), "/PROD/dbHost");
    }

    // ==================== KeyMap テスト ====================

    #[test]
    fn test_build_maps_keys_to_aliases() {
        let key_map = KeyMap::build(
            "DEV",
            &[
                ConfigItem::new("/dbHost", "DB_HOST"),
                ConfigItem::new("/dbPort", "DB_PORT"),
            ],
        )
        .unwrap();

        assert_eq!(key_map.env(), "DEV");
        assert_eq!(key_map.len(), 2);
        assert_eq!(key_map.alias_for("/DEV/dbHost"), Some("DB_HOST"));
        assert_eq!(key_map.alias_for("/DEV/dbPort"), Some("DB_PORT"));
        assert_eq!(key_map.alias_for("/PROD/dbHost"), None);
        assert_eq!(
            key_map.keys().collect::<Vec<_>>(),
            vec!["/DEV/dbHost", "/DEV/dbPort"]
        );
    }

    #[test]
    fn test_build_rejects_duplicate_keys() {
        let result = KeyMap::build(
            "DEV",
            &[
                ConfigItem::new("/dbHost", "DB_HOST"),
                ConfigItem::new("/dbHost", "DB_HOST_AGAIN"),
            ],
        );

        assert_eq!(
            result.unwrap_err(),
            ConfigItemError::DuplicateKey("/DEV/dbHost".to_string())
        );
    }

    #[test]
    fn test_empty_items_produce_no_batches() {
        let key_map = KeyMap::build("DEV", &[]).unwrap();
        assert!(key_map.is_empty());
        assert!(key_map.batches().is_empty());
    }

    // ==================== バッチ計画テスト ====================

    #[test]
    fn test_batches_split_at_ten() {
        let key_map = KeyMap::build("DEV", &items(23)).unwrap();
        let sizes: Vec<usize> = key_map.batches().iter().map(|b| b.keys().len()).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
    }

    #[test]
    fn test_exactly_ten_items_is_one_batch() {
        let key_map = KeyMap::build("DEV", &items(10)).unwrap();
        assert_eq!(key_map.batches().len(), 1);
    }

    #[test]
    fn test_batch_aliases_follow_key_order() {
        let key_map = KeyMap::build("PROD", &items(12)).unwrap();
        let second = &key_map.batches()[1];

        assert_eq!(second.keys(), &["/PROD/param10", "/PROD/param11"]);
        assert_eq!(second.aliases(), &["ALIAS_10", "ALIAS_11"]);
    }
}
