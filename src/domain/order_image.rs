//! 注文テーブルのストリームイメージ評価
//!
//! DynamoDB StreamsのNewImage/OldImageをプレーンJSONに変換したものを扱い、
//! ゲスト通知APIを呼び出すべきかを判定する。

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// 通知対象となるストリームイベント名
pub const MODIFY_EVENT: &str = "MODIFY";

/// 通知対象の受注経路
pub const DIGITAL_ORDER_PROVIDER: &str = "DigitalOrder";

/// 通知対象の注文ステータス
pub const COMPLETED_STATUS: &str = "Completed";

/// 注文イメージのエラー型
#[derive(Debug, Error)]
pub enum OrderImageError {
    /// orderPayloadがJSONとして解釈できない
    #[error("orderPayloadの解析に失敗: {0}")]
    InvalidPayload(String),
}

/// 通知をスキップする理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// MODIFY以外のイベント
    NotModify,
    /// DigitalOrder以外の受注経路
    NotDigitalOrder,
    /// 注文が完了していない
    NotCompleted,
    /// 顧客が登録されていない
    CustomerNotRegistered,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NotModify => "event type is not MODIFY",
            SkipReason::NotDigitalOrder => "inbound provider is not DigitalOrder",
            SkipReason::NotCompleted => "orderStatus is not completed",
            SkipReason::CustomerNotRegistered => "customer is not registered",
        };
        f.write_str(reason)
    }
}

/// 通知判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDecision {
    /// 通知する
    Notify,
    /// スキップする
    Skip(SkipReason),
}

/// ストリームイメージのプレーンJSON表現
#[derive(Debug, Clone, PartialEq)]
pub struct OrderImage(Value);

impl OrderImage {
    /// プレーンJSONから作成
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// 受注経路（inboundProvider）
    pub fn inbound_provider(&self) -> Option<&str> {
        self.0.get("inboundProvider").and_then(Value::as_str)
    }

    /// 注文ステータス（orderStatus）
    pub fn order_status(&self) -> Option<&str> {
        self.0.get("orderStatus").and_then(Value::as_str)
    }

    /// orderPayload.customer.customerId
    ///
    /// 空文字列、null、falseは未登録として扱う。
    /// orderPayloadが文字列のままの場合は`parse_order_payload`を先に呼ぶこと。
    pub fn customer_id(&self) -> Option<String> {
        let id = self
            .0
            .get("orderPayload")?
            .get("customer")?
            .get("customerId")?;

        match id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(true) => Some("true".to_string()),
            _ => None,
        }
    }

    /// 文字列で格納されたorderPayloadをJSONとして展開する
    ///
    /// オブジェクト済み、または存在しない場合は何もしない。
    pub fn parse_order_payload(&mut self) -> Result<(), OrderImageError> {
        let Some(payload) = self.0.get_mut("orderPayload") else {
            return Ok(());
        };

        let parsed: Value = match &*payload {
            Value::String(raw) => serde_json::from_str(raw)
                .map_err(|e| OrderImageError::InvalidPayload(e.to_string()))?,
            Value::Object(_) | Value::Null => return Ok(()),
            other => {
                return Err(OrderImageError::InvalidPayload(format!(
                    "想定外の型です: {}",
                    other
                )));
            }
        };
        *payload = parsed;
        Ok(())
    }

    /// JSON値への参照
    pub fn as_json(&self) -> &Value {
        &self.0
    }
}

/// ストリームレコードが通知対象かを判定
///
/// 判定順: イベント名 → 受注経路 → ステータス → 顧客ID
pub fn evaluate(event_name: &str, new_image: &OrderImage) -> NotificationDecision {
    if event_name != MODIFY_EVENT {
        return NotificationDecision::Skip(SkipReason::NotModify);
    }
    if new_image.inbound_provider() != Some(DIGITAL_ORDER_PROVIDER) {
        return NotificationDecision::Skip(SkipReason::NotDigitalOrder);
    }
    if new_image.order_status() != Some(COMPLETED_STATUS) {
        return NotificationDecision::Skip(SkipReason::NotCompleted);
    }
    if new_image.customer_id().is_none() {
        return NotificationDecision::Skip(SkipReason::CustomerNotRegistered);
    }
    NotificationDecision::Notify
}
