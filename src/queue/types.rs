use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// タスク種別。配送先の内部エンドポイント名に一致する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TaskKind {
    Prepare,
    Chapter,
    Finalize,
}

impl TaskKind {
    #[must_use]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TaskKind::Prepare => "prepare",
            TaskKind::Chapter => "chapter",
            TaskKind::Finalize => "finalize",
        }
    }

    pub(crate) fn from_str(s: &str) -> Option<Self> {
        match s {
            "prepare" => Some(TaskKind::Prepare),
            "chapter" => Some(TaskKind::Chapter),
            "finalize" => Some(TaskKind::Finalize),
            _ => None,
        }
    }
}

/// タスクペイロード。章本文などの実データはBlobストア経由で受け渡し、
/// ここには参照と要約時のコンテキストだけを載せる。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TaskPayload {
    pub(crate) job_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) chapter_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) chapter_title: Option<String>,
    /// 要約プロンプトに渡す既知概念のスナップショット（prepare時点、上限付き）。
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) known_concepts: Vec<String>,
}

impl TaskPayload {
    #[must_use]
    pub(crate) fn for_job(job_id: Uuid) -> Self {
        Self {
            job_id,
            chapter_index: None,
            chapter_title: None,
            known_concepts: Vec::new(),
        }
    }

    #[must_use]
    pub(crate) fn for_chapter(
        job_id: Uuid,
        chapter_index: usize,
        chapter_title: String,
        known_concepts: Vec<String>,
    ) -> Self {
        Self {
            job_id,
            chapter_index: Some(chapter_index),
            chapter_title: Some(chapter_title),
            known_concepts,
        }
    }
}

/// キュー上のタスクの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskStatus {
    /// 配送待ち（`run_at` 以降に配送可能）
    Pending,
    /// ハンドラが2xxを返した（これ以上配送しない）
    Delivered,
    /// 恒久失敗または試行回数超過
    Dead,
}

impl TaskStatus {
    #[must_use]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Delivered => "delivered",
            TaskStatus::Dead => "dead",
        }
    }

    pub(crate) fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "delivered" => Some(TaskStatus::Delivered),
            "dead" => Some(TaskStatus::Dead),
            _ => None,
        }
    }
}

/// キューに積む新規タスク。
#[derive(Debug, Clone)]
pub(crate) struct NewTask {
    pub(crate) kind: TaskKind,
    pub(crate) payload: TaskPayload,
    /// この時刻より前には配送しない。
    pub(crate) run_at: DateTime<Utc>,
}

/// キュー上のタスク行。
#[derive(Debug, Clone)]
pub(crate) struct QueuedTask {
    pub(crate) id: i64,
    pub(crate) kind: TaskKind,
    pub(crate) payload: TaskPayload,
    pub(crate) run_at: DateTime<Utc>,
    pub(crate) attempts: i32,
    pub(crate) max_attempts: i32,
    #[allow(dead_code)]
    pub(crate) status: TaskStatus,
    #[allow(dead_code)]
    pub(crate) created_at: DateTime<Utc>,
}
