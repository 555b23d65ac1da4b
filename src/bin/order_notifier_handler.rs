//! 注文完了通知Lambda関数
//!
//! 注文テーブルのDynamoDB Streamsイベントを受け取り、DigitalOrder経由で
//! 完了した注文をゲスト通知APIに送信する。

use aws_lambda_events::event::dynamodb::Event;
use lambda_runtime::{Error, LambdaEvent, service_fn};
use order_notifier::application::{InvocationContext, InvocationPipeline, report_setup_failure};
use order_notifier::infrastructure::{
    AwsCloudWatchMetrics, AwsParameterStore, HttpNotifierFactory, LambdaConfigError,
    LambdaEnvConfig, function_name_from_env, init_logging, stage_env_from_env,
};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::info;

type Pipeline = InvocationPipeline<AwsParameterStore, AwsCloudWatchMetrics, HttpNotifierFactory>;

/// パイプラインの静的インスタンス
///
/// Lambda warm start時に設定キャッシュとSDKクライアントを再利用する。
static PIPELINE: OnceCell<Pipeline> = OnceCell::const_new();

/// パイプラインを取得（初期化されていなければ初期化）
async fn get_pipeline() -> Result<&'static Pipeline, LambdaConfigError> {
    PIPELINE
        .get_or_try_init(|| async {
            let env = LambdaEnvConfig::from_env()?;
            info!(
                stage_env = ?env.stage_env(),
                function_name = env.function_name(),
                "パイプラインを初期化"
            );
            let store = AwsParameterStore::from_config().await;
            let metrics = AwsCloudWatchMetrics::from_config().await;
            Ok(InvocationPipeline::new(&env, store, metrics, HttpNotifierFactory))
        })
        .await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    // Lambda関数を初期化して実行
    let func = service_fn(handler);
    lambda_runtime::run(func).await?;
    Ok(())
}

/// Lambda関数のメインハンドラー
async fn handler(event: LambdaEvent<Event>) -> Result<Value, Error> {
    let pipeline = match get_pipeline().await {
        Ok(pipeline) => pipeline,
        Err(err) => {
            let sink = AwsCloudWatchMetrics::from_config().await;
            let stage_env = stage_env_from_env();
            let err = report_setup_failure(
                err,
                &function_name_from_env(),
                stage_env.as_deref(),
                &sink,
            )
            .await;
            return Err(err.into());
        }
    };

    let ctx = InvocationContext::from_lambda(&event.context, pipeline.function_name());

    Ok(pipeline.handle(&ctx, &event.payload).await?)
}
