// OrderStreamHandler - 注文テーブルのストリーム処理
//
// DynamoDB Streamsのレコードを順に評価し、DigitalOrder経由で完了した
// 登録顧客の注文についてゲスト通知APIを呼び出す。

use aws_lambda_events::event::dynamodb::{Event, EventRecord};
use serde_dynamo::Item;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::service_error::ServiceError;
use crate::domain::order_image::MODIFY_EVENT;
use crate::domain::{NotificationDecision, OrderImage, SkipReason, evaluate};
use crate::infrastructure::GuestNotifier;

/// ストリーム処理の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderStreamResult {
    /// 通知に成功したレコード数
    pub notified_count: usize,
    /// スキップしたレコード数
    pub skip_count: usize,
    /// 通知に失敗したレコード数（再試行しないもの）
    pub failure_count: usize,
}

/// 単一レコードの処理結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Notified,
    Skipped(SkipReason),
    Failed,
}

/// 注文ストリームハンドラー
pub struct OrderStreamHandler<N> {
    notifier: N,
}

impl<N: GuestNotifier> OrderStreamHandler<N> {
    /// 新しいハンドラーを作成
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }

    /// DynamoDB Streamsイベントを処理
    ///
    /// レコードは受信順に処理する。通知APIの5xxエラーは呼び出し全体を失敗させ、
    /// ストリームのバッチを再試行させる。
    pub async fn handle(&self, event: &Event) -> Result<OrderStreamResult, ServiceError> {
        info!(record_count = event.records.len(), "注文ストリームの処理開始");

        let mut result = OrderStreamResult::default();

        for record in &event.records {
            match self.process_record(record).await? {
                RecordOutcome::Notified => result.notified_count += 1,
                RecordOutcome::Skipped(reason) => {
                    info!(event_id = %record.event_id, reason = %reason, "イベントをスキップ");
                    result.skip_count += 1;
                }
                RecordOutcome::Failed => result.failure_count += 1,
            }
        }

        info!(
            notified_count = result.notified_count,
            skip_count = result.skip_count,
            failure_count = result.failure_count,
            "注文ストリームの処理完了"
        );

        Ok(result)
    }

    async fn process_record(&self, record: &EventRecord) -> Result<RecordOutcome, ServiceError> {
        if record.event_name != MODIFY_EVENT {
            return Ok(RecordOutcome::Skipped(SkipReason::NotModify));
        }

        let mut new_image = to_order_image(&record.change.new_image)?;
        let mut old_image = to_order_image(&record.change.old_image)?;

        // orderPayloadの展開は受注経路とステータスが一致した場合のみ
        if let NotificationDecision::Skip(reason) = evaluate(&record.event_name, &new_image) {
            if reason != SkipReason::CustomerNotRegistered {
                return Ok(RecordOutcome::Skipped(reason));
            }
        }

        new_image.parse_order_payload()?;
        old_image.parse_order_payload()?;
        debug!(
            event_id = %record.event_id,
            previous_status = ?old_image.order_status(),
            "注文が完了状態に更新"
        );

        match evaluate(&record.event_name, &new_image) {
            NotificationDecision::Skip(reason) => Ok(RecordOutcome::Skipped(reason)),
            NotificationDecision::Notify => self.notify(record, &new_image).await,
        }
    }

    async fn notify(
        &self,
        record: &EventRecord,
        new_image: &OrderImage,
    ) -> Result<RecordOutcome, ServiceError> {
        match self.notifier.notify_order_completed(new_image.as_json()).await {
            Ok(()) => {
                debug!(event_id = %record.event_id, "ゲスト通知を送信");
                Ok(RecordOutcome::Notified)
            }
            Err(err) if err.is_server_error() => {
                error!(event_id = %record.event_id, error = %err, "ゲスト通知APIがサーバーエラーを返却");
                Err(err.into())
            }
            Err(err) => {
                warn!(event_id = %record.event_id, error = %err, "ゲスト通知に失敗");
                Ok(RecordOutcome::Failed)
            }
        }
    }
}

/// DynamoDB JSONのイメージをプレーンJSONに変換
fn to_order_image(image: &Item) -> Result<OrderImage, ServiceError> {
    let value: Value = serde_dynamo::from_item(image.clone())
        .map_err(|e| ServiceError::InvalidEventFromSource(e.to_string()))?;
    Ok(OrderImage::new(value))
}
