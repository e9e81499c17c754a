/// タスク配送デーモン。
///
/// `run_at` を過ぎたタスクを取得し、自サービスの内部エンドポイントへ
/// HTTP POSTで配送します。配送の成否はHTTPステータスだけで判断します:
///
/// - 2xx: ACK（delivered）
/// - 429: NotReady。試行回数を消費せず固定遅延で再スケジュール
/// - その他4xx: 再配送しても改善しないためdead
/// - 5xx/ネットワーク障害: バックオフ付き再配送、上限超過でdead
///
/// ハンドラ側が冪等であることを前提に、重複配送は許容します。
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::PgTaskQueueStore;
use super::types::QueuedTask;
use crate::observability::Telemetry;
use crate::util::retry::RetryConfig;

const PICKUP_BATCH_SIZE: i64 = 16;

/// 配送結果の判定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryDecision {
    Ack,
    Dead,
    RetryWithBackoff,
    RescheduleNotReady,
}

/// HTTPステータス（ネットワーク障害は `None`）から配送判定を導く。
#[must_use]
pub(crate) fn decide(status: Option<StatusCode>) -> DeliveryDecision {
    match status {
        None => DeliveryDecision::RetryWithBackoff,
        Some(status) if status.is_success() => DeliveryDecision::Ack,
        Some(StatusCode::TOO_MANY_REQUESTS) => DeliveryDecision::RescheduleNotReady,
        Some(status) if status.is_client_error() => DeliveryDecision::Dead,
        Some(_) => DeliveryDecision::RetryWithBackoff,
    }
}

pub(crate) struct DeliveryWorker {
    store: PgTaskQueueStore,
    client: Client,
    self_base_url: Url,
    poll_interval: Duration,
    backoff: RetryConfig,
    not_ready_wait: Duration,
    telemetry: Arc<Telemetry>,
}

impl DeliveryWorker {
    pub(crate) fn new(
        store: PgTaskQueueStore,
        self_base_url: impl Into<String>,
        poll_interval: Duration,
        backoff: RetryConfig,
        not_ready_wait: Duration,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("failed to build delivery client")?;
        let self_base_url =
            Url::parse(&self_base_url.into()).context("invalid self base URL")?;
        Ok(Self {
            store,
            client,
            self_base_url,
            poll_interval,
            backoff,
            not_ready_wait,
            telemetry,
        })
    }

    /// デーモンループを起動する。
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                poll_interval_ms = self.poll_interval.as_millis() as u64,
                "task delivery daemon started"
            );
            loop {
                if let Err(error) = self.deliver_due().await {
                    warn!(%error, "task delivery tick failed");
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        })
    }

    async fn deliver_due(&self) -> Result<()> {
        let tasks = self.store.due_tasks(PICKUP_BATCH_SIZE).await?;
        for task in tasks {
            self.deliver(&task).await?;
        }
        Ok(())
    }

    async fn deliver(&self, task: &QueuedTask) -> Result<()> {
        let url = self
            .self_base_url
            .join(&format!("internal/tasks/{}", task.kind.as_str()))
            .context("failed to build task delivery URL")?;

        debug!(task_id = task.id, kind = task.kind.as_str(), "delivering task");

        let response = self.client.post(url).json(&task.payload).send().await;
        let status = match &response {
            Ok(response) => Some(response.status()),
            Err(error) => {
                warn!(task_id = task.id, %error, "task delivery request failed");
                None
            }
        };

        match decide(status) {
            DeliveryDecision::Ack => {
                self.telemetry.metrics().tasks_delivered_total.inc();
                self.store.mark_delivered(task.id).await?;
            }
            DeliveryDecision::Dead => {
                let detail = format!("handler returned permanent failure: {status:?}");
                warn!(task_id = task.id, kind = task.kind.as_str(), %detail, "task is dead");
                self.telemetry.metrics().tasks_dead_total.inc();
                self.store.mark_dead(task.id, &detail).await?;
            }
            DeliveryDecision::RescheduleNotReady => {
                // NotReadyはハンドラの正常な応答であり、試行回数を消費しない
                let run_at = Utc::now()
                    + chrono::Duration::from_std(self.not_ready_wait)
                        .unwrap_or_else(|_| chrono::Duration::seconds(30));
                debug!(task_id = task.id, "task not ready, rescheduling");
                self.store.reschedule_without_attempt(task.id, run_at).await?;
            }
            DeliveryDecision::RetryWithBackoff => {
                let next_attempt = usize::try_from(task.attempts).unwrap_or(0) + 1;
                if next_attempt >= usize::try_from(task.max_attempts).unwrap_or(0) {
                    let detail = format!("delivery attempts exhausted: {status:?}");
                    warn!(task_id = task.id, kind = task.kind.as_str(), "task attempts exhausted");
                    self.telemetry.metrics().tasks_dead_total.inc();
                    self.store.mark_dead(task.id, &detail).await?;
                } else {
                    let wait = self.backoff.delay_for_attempt(next_attempt);
                    let run_at = Utc::now()
                        + chrono::Duration::from_std(wait)
                            .unwrap_or_else(|_| chrono::Duration::seconds(1));
                    let detail = format!("transient delivery failure: {status:?}");
                    self.store
                        .reschedule_with_attempt(task.id, run_at, &detail)
                        .await?;
                }
            }
        }
        Ok(())
    }
}
