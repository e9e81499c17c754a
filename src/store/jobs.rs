/// ジョブ状態ストア。
///
/// ジョブごとの永続レコード（ステータス・章数・エラー履歴）と、
/// 章入力・章アーティファクトの読み書きを担当します。ロジックは
/// read-modify-writeのみで、完了判定などの判断はオーケストレータ側が行います。
///
/// Blobキー配置:
/// - `jobs/{id}/metadata.json`       ジョブレコード
/// - `jobs/{id}/input_chapters.json` 章入力の配列（prepareで一度だけ生成、以後不変）
/// - `jobs/{id}/chapter_{n}.json`    章アーティファクト（存在そのものが完了シグナル）
/// - `jobs/{id}/errors.json`         診断用エラー履歴（追記、無関係フィールドは保持）
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::blob::{BlobStore, get_json, put_json};

/// ジョブのライフサイクルステータス。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum JobStatus {
    Queued,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub(crate) fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "complete" => Some(JobStatus::Complete),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// 直近の致命的エラー（発生ステージ付き）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JobError {
    pub(crate) stage: String,
    pub(crate) message: String,
}

/// ジョブの永続レコード。
///
/// `completed_chapters` は進捗表示用の参考値であり、完了判定には使わない。
/// 信頼できる完了シグナルは章アーティファクトBlobの存在のみ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JobRecord {
    pub(crate) job_id: Uuid,
    pub(crate) document_ref: String,
    pub(crate) book_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) book_author: Option<String>,
    pub(crate) category: String,
    pub(crate) total_chapters: usize,
    #[serde(default)]
    pub(crate) completed_chapters: Vec<usize>,
    pub(crate) status: JobStatus,
    pub(crate) created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) completed_at: Option<DateTime<Utc>>,
    /// 全章タスクの完了が見込まれる時刻（prepareが設定）。
    /// finalizeはこの時刻を過ぎてもアーティファクトが無い章を
    /// 恒久的に喪失したものとして扱う。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) chapters_expected_by: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) output_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) last_error: Option<JobError>,
}

impl JobRecord {
    pub(crate) fn new(job_id: Uuid, document_ref: String, category: String) -> Self {
        Self {
            job_id,
            document_ref,
            book_title: String::new(),
            book_author: None,
            category,
            total_chapters: 0,
            completed_chapters: Vec::new(),
            status: JobStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
            chapters_expected_by: None,
            output_key: None,
            last_error: None,
        }
    }
}

/// 章入力。prepareで一度だけ生成され、以後は不変。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChapterInput {
    pub(crate) index: usize,
    pub(crate) title: String,
    pub(crate) content: String,
}

/// 章アーティファクト。(job, index)ごとに章タスクが生成する。
///
/// `title` は常に対応する [`ChapterInput`] のタイトルであり、
/// 要約モデルが返したタイトルで上書きしてはならない。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChapterArtifact {
    pub(crate) index: usize,
    pub(crate) title: String,
    pub(crate) summary: String,
    #[serde(default)]
    pub(crate) key_concepts: Vec<String>,
}

impl ChapterArtifact {
    /// 要約生成に失敗した章のプレースホルダ。章数の勘定を満たすために
    /// タスク自体は成功として完了させる。
    pub(crate) fn placeholder(index: usize, title: String) -> Self {
        Self {
            index,
            title,
            summary: "(要約の生成に失敗しました)".to_string(),
            key_concepts: Vec::new(),
        }
    }

    /// 期限超過後も存在しない章のプレースホルダ。
    pub(crate) fn lost(index: usize) -> Self {
        Self {
            index,
            title: format!("Chapter {index}"),
            summary: "(結果が見つかりませんでした)".to_string(),
            key_concepts: Vec::new(),
        }
    }
}

pub(crate) fn metadata_key(job_id: Uuid) -> String {
    format!("jobs/{job_id}/metadata.json")
}

pub(crate) fn chapters_key(job_id: Uuid) -> String {
    format!("jobs/{job_id}/input_chapters.json")
}

pub(crate) fn artifact_key(job_id: Uuid, index: usize) -> String {
    format!("jobs/{job_id}/chapter_{index}.json")
}

pub(crate) fn errors_key(job_id: Uuid) -> String {
    format!("jobs/{job_id}/errors.json")
}

/// ジョブ状態ストア。
#[derive(Clone)]
pub(crate) struct JobStateStore {
    blobs: Arc<dyn BlobStore>,
}

impl JobStateStore {
    pub(crate) fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub(crate) fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub(crate) async fn read(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        get_json(self.blobs.as_ref(), &metadata_key(job_id)).await
    }

    pub(crate) async fn write(&self, record: &JobRecord) -> Result<()> {
        put_json(self.blobs.as_ref(), &metadata_key(record.job_id), record).await
    }

    /// ジョブを恒久的に失敗としてマークする。
    pub(crate) async fn mark_failed(&self, job_id: Uuid, stage: &str, message: &str) -> Result<()> {
        let mut record = self
            .read(job_id)
            .await?
            .with_context(|| format!("job {job_id} not found while marking failed"))?;
        record.status = JobStatus::Failed;
        record.last_error = Some(JobError {
            stage: stage.to_string(),
            message: message.to_string(),
        });
        self.write(&record).await
    }

    /// ジョブを完了としてマークする。
    pub(crate) async fn mark_complete(&self, job_id: Uuid, output_key: &str) -> Result<()> {
        let mut record = self
            .read(job_id)
            .await?
            .with_context(|| format!("job {job_id} not found while marking complete"))?;
        record.status = JobStatus::Complete;
        record.completed_at = Some(Utc::now());
        record.output_key = Some(output_key.to_string());
        self.write(&record).await
    }

    /// 進捗表示用に完了章インデックスを追記する（参考値、重複は無視）。
    pub(crate) async fn record_chapter_progress(&self, job_id: Uuid, index: usize) -> Result<()> {
        let Some(mut record) = self.read(job_id).await? else {
            return Ok(());
        };
        if !record.completed_chapters.contains(&index) {
            record.completed_chapters.push(index);
            record.completed_chapters.sort_unstable();
            self.write(&record).await?;
        }
        Ok(())
    }

    pub(crate) async fn put_chapter_inputs(
        &self,
        job_id: Uuid,
        chapters: &[ChapterInput],
    ) -> Result<()> {
        put_json(self.blobs.as_ref(), &chapters_key(job_id), chapters).await
    }

    pub(crate) async fn read_chapter_inputs(&self, job_id: Uuid) -> Result<Option<Vec<ChapterInput>>> {
        get_json(self.blobs.as_ref(), &chapters_key(job_id)).await
    }

    pub(crate) async fn put_artifact(&self, job_id: Uuid, artifact: &ChapterArtifact) -> Result<()> {
        put_json(
            self.blobs.as_ref(),
            &artifact_key(job_id, artifact.index),
            artifact,
        )
        .await
    }

    pub(crate) async fn read_artifact(
        &self,
        job_id: Uuid,
        index: usize,
    ) -> Result<Option<ChapterArtifact>> {
        get_json(self.blobs.as_ref(), &artifact_key(job_id, index)).await
    }

    /// `[0, total)` のうち存在するアーティファクトのインデックスを返す。
    ///
    /// at-least-once配送下ではカウンタが失われたり二重加算されたりするため、
    /// 完了判定はBlobの存在確認だけを信頼する。
    pub(crate) async fn present_artifacts(&self, job_id: Uuid, total: usize) -> Result<Vec<usize>> {
        let mut present = Vec::new();
        for index in 0..total {
            if self.blobs.exists(&artifact_key(job_id, index)).await? {
                present.push(index);
            }
        }
        Ok(present)
    }

    /// 診断用エラー履歴に1エントリを追記する。
    ///
    /// 既存の無関係なエントリは上書きしない。履歴の書き込み失敗で
    /// 呼び出し元のステージを失敗させてはならないため、呼び出し側は
    /// 結果をログに落とすだけにすること。
    pub(crate) async fn append_error(&self, job_id: Uuid, kind: &str, detail: Value) -> Result<()> {
        let key = errors_key(job_id);
        let mut trail: Map<String, Value> = get_json(self.blobs.as_ref(), &key)
            .await?
            .unwrap_or_default();
        trail.insert(kind.to_string(), detail);
        put_json(self.blobs.as_ref(), &key, &trail).await
    }

    /// 指定ステータスのジョブを列挙する（運用スキャン用）。
    pub(crate) async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>> {
        let keys = self.blobs.list("jobs/").await?;
        let mut records = Vec::new();
        for key in keys {
            if !key.ends_with("/metadata.json") {
                continue;
            }
            let record: Option<JobRecord> = get_json(self.blobs.as_ref(), &key).await?;
            let Some(record) = record else {
                continue;
            };
            if record.status == status {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::blob::MemoryBlobStore;

    fn store() -> JobStateStore {
        JobStateStore::new(MemoryBlobStore::shared())
    }

    #[tokio::test]
    async fn job_record_round_trips() {
        let jobs = store();
        let job_id = Uuid::new_v4();
        let record = JobRecord::new(job_id, "doc-abcdef1234".to_string(), "Business".to_string());
        jobs.write(&record).await.unwrap();

        let loaded = jobs.read(job_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.document_ref, "doc-abcdef1234");
    }

    #[tokio::test]
    async fn present_artifacts_counts_only_existing_blobs() {
        let jobs = store();
        let job_id = Uuid::new_v4();

        let artifact = ChapterArtifact {
            index: 0,
            title: "Chapter 1".to_string(),
            summary: "- point".to_string(),
            key_concepts: vec![],
        };
        jobs.put_artifact(job_id, &artifact).await.unwrap();
        jobs.put_artifact(
            job_id,
            &ChapterArtifact {
                index: 2,
                ..artifact.clone()
            },
        )
        .await
        .unwrap();

        let present = jobs.present_artifacts(job_id, 3).await.unwrap();
        assert_eq!(present, vec![0, 2]);
    }

    #[tokio::test]
    async fn mark_failed_records_stage_and_message() {
        let jobs = store();
        let job_id = Uuid::new_v4();
        jobs.write(&JobRecord::new(
            job_id,
            "doc-abcdef1234".to_string(),
            "Business".to_string(),
        ))
        .await
        .unwrap();

        jobs.mark_failed(job_id, "prepare", "document not found")
            .await
            .unwrap();

        let loaded = jobs.read(job_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        let error = loaded.last_error.unwrap();
        assert_eq!(error.stage, "prepare");
        assert_eq!(error.message, "document not found");
    }

    #[tokio::test]
    async fn append_error_preserves_unrelated_entries() {
        let jobs = store();
        let job_id = Uuid::new_v4();

        jobs.append_error(job_id, "toc_extraction", serde_json::json!({"error": "none"}))
            .await
            .unwrap();
        jobs.append_error(job_id, "runaway", serde_json::json!({"count": 150}))
            .await
            .unwrap();

        let trail: Map<String, Value> =
            get_json(jobs.blobs().as_ref(), &errors_key(job_id))
                .await
                .unwrap()
                .unwrap();
        assert!(trail.contains_key("toc_extraction"));
        assert!(trail.contains_key("runaway"));
    }

    #[tokio::test]
    async fn record_chapter_progress_is_idempotent() {
        let jobs = store();
        let job_id = Uuid::new_v4();
        jobs.write(&JobRecord::new(
            job_id,
            "doc-abcdef1234".to_string(),
            "Business".to_string(),
        ))
        .await
        .unwrap();

        jobs.record_chapter_progress(job_id, 1).await.unwrap();
        jobs.record_chapter_progress(job_id, 1).await.unwrap();

        let loaded = jobs.read(job_id).await.unwrap().unwrap();
        assert_eq!(loaded.completed_chapters, vec![1]);
    }

    #[tokio::test]
    async fn list_by_status_filters_records() {
        let jobs = store();
        let processing = Uuid::new_v4();
        let failed = Uuid::new_v4();

        let mut a = JobRecord::new(processing, "doc-abcdef1234".to_string(), "技術".to_string());
        a.status = JobStatus::Processing;
        jobs.write(&a).await.unwrap();

        let mut b = JobRecord::new(failed, "doc-1234abcdef".to_string(), "技術".to_string());
        b.status = JobStatus::Failed;
        jobs.write(&b).await.unwrap();

        let listed = jobs.list_by_status(JobStatus::Processing).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].job_id, processing);
    }
}
