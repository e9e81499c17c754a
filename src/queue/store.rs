/// 耐久タスクキュー。
///
/// PostgreSQLの `task_queue` テーブルを使い、`run_at` で配送時刻を
/// ゲートするat-least-onceキューを実装します。取得は
/// `FOR UPDATE SKIP LOCKED` で行い、複数の配送デーモンが同じ行を
/// 同時に掴まないようにします。
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

use super::types::{NewTask, QueuedTask, TaskKind, TaskStatus};

/// タスク投入の seam。オーケストレータはこのトレイト越しに積む。
#[async_trait]
pub(crate) trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: NewTask) -> Result<()>;
}

#[derive(Debug, Clone)]
pub(crate) struct PgTaskQueueStore {
    pool: PgPool,
    max_delivery_attempts: i32,
}

impl PgTaskQueueStore {
    pub(crate) fn new(pool: PgPool, max_delivery_attempts: i32) -> Self {
        Self {
            pool,
            max_delivery_attempts,
        }
    }

    /// `run_at` を過ぎたpendingタスクを古い順に取得する。
    pub(crate) async fn due_tasks(&self, limit: i64) -> Result<Vec<QueuedTask>> {
        let rows = sqlx::query(
            r"
            SELECT id, kind, payload, run_at, attempts, max_attempts, status, created_at
            FROM task_queue
            WHERE status = 'pending'
              AND run_at <= NOW()
            ORDER BY run_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch due tasks")?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            tasks.push(Self::row_to_task(row)?);
        }
        Ok(tasks)
    }

    /// 配送成功（ハンドラACK）としてマークする。
    pub(crate) async fn mark_delivered(&self, task_id: i64) -> Result<()> {
        sqlx::query(
            r"
            UPDATE task_queue
            SET status = 'delivered',
                delivered_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("failed to mark task as delivered")?;
        Ok(())
    }

    /// 恒久失敗としてマークする。
    pub(crate) async fn mark_dead(&self, task_id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE task_queue
            SET status = 'dead',
                last_error = $2
            WHERE id = $1
            ",
        )
        .bind(task_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("failed to mark task as dead")?;
        Ok(())
    }

    /// 試行回数を消費して再スケジュールする（一時障害時）。
    pub(crate) async fn reschedule_with_attempt(
        &self,
        task_id: i64,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE task_queue
            SET run_at = $2,
                attempts = attempts + 1,
                last_error = $3
            WHERE id = $1
            ",
        )
        .bind(task_id)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("failed to reschedule task")?;
        Ok(())
    }

    /// 試行回数を消費せずに再スケジュールする（NotReady=429時）。
    pub(crate) async fn reschedule_without_attempt(
        &self,
        task_id: i64,
        run_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE task_queue
            SET run_at = $2
            WHERE id = $1
            ",
        )
        .bind(task_id)
        .bind(run_at)
        .execute(&self.pool)
        .await
        .context("failed to reschedule not-ready task")?;
        Ok(())
    }

    fn row_to_task(row: sqlx::postgres::PgRow) -> Result<QueuedTask> {
        let id: i64 = row.try_get("id").context("failed to get task id")?;
        let kind_str: String = row.try_get("kind").context("failed to get task kind")?;
        let payload_json: Value = row.try_get("payload").context("failed to get payload")?;
        let run_at: DateTime<Utc> = row.try_get("run_at").context("failed to get run_at")?;
        let attempts: i32 = row.try_get("attempts").unwrap_or(0);
        let max_attempts: i32 = row.try_get("max_attempts").unwrap_or(5);
        let status_str: String = row.try_get("status").context("failed to get status")?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .context("failed to get created_at")?;

        let kind = TaskKind::from_str(&kind_str)
            .with_context(|| format!("invalid task kind: {kind_str}"))?;
        let status = TaskStatus::from_str(&status_str)
            .with_context(|| format!("invalid task status: {status_str}"))?;
        let payload =
            serde_json::from_value(payload_json).context("failed to deserialize task payload")?;

        Ok(QueuedTask {
            id,
            kind,
            payload,
            run_at,
            attempts,
            max_attempts,
            status,
            created_at,
        })
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueueStore {
    async fn enqueue(&self, task: NewTask) -> Result<()> {
        let payload_json =
            serde_json::to_value(&task.payload).context("failed to serialize task payload")?;
        sqlx::query(
            r"
            INSERT INTO task_queue (kind, payload, run_at, attempts, max_attempts, status)
            VALUES ($1, $2, $3, 0, $4, 'pending')
            ",
        )
        .bind(task.kind.as_str())
        .bind(payload_json)
        .bind(task.run_at)
        .bind(self.max_delivery_attempts)
        .execute(&self.pool)
        .await
        .context("failed to enqueue task")?;
        Ok(())
    }
}

/// インメモリキュー。DBなしのローカル実行とテストで使用する。
/// 配送デーモンは持たず、積まれた内容の検査のみができる。
#[derive(Debug, Default)]
pub(crate) struct MemoryTaskQueue {
    pub(crate) tasks: tokio::sync::Mutex<Vec<NewTask>>,
}

impl MemoryTaskQueue {
    pub(crate) fn shared() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task: NewTask) -> Result<()> {
        self.tasks.lock().await.push(task);
        Ok(())
    }
}
