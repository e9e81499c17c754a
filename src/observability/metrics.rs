/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Histogram, Registry, register_counter_with_registry,
    register_histogram_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub jobs_submitted_total: Counter,
    pub jobs_completed_total: Counter,
    pub jobs_failed_total: Counter,
    pub tasks_delivered_total: Counter,
    pub tasks_dead_total: Counter,
    pub chapter_placeholders_total: Counter,
    pub finalize_not_ready_total: Counter,
    pub model_retries_total: Counter,
    pub concepts_created_total: Counter,

    // ヒストグラム
    pub chapter_duration: Histogram,
    pub finalize_duration: Histogram,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    pub fn new(registry: &Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            jobs_submitted_total: register_counter_with_registry!(
                "digest_jobs_submitted_total",
                "Total number of digest jobs submitted",
                registry
            )?,
            jobs_completed_total: register_counter_with_registry!(
                "digest_jobs_completed_total",
                "Total number of digest jobs completed",
                registry
            )?,
            jobs_failed_total: register_counter_with_registry!(
                "digest_jobs_failed_total",
                "Total number of digest jobs failed",
                registry
            )?,
            tasks_delivered_total: register_counter_with_registry!(
                "digest_tasks_delivered_total",
                "Total number of queue tasks acknowledged by handlers",
                registry
            )?,
            tasks_dead_total: register_counter_with_registry!(
                "digest_tasks_dead_total",
                "Total number of queue tasks marked dead",
                registry
            )?,
            chapter_placeholders_total: register_counter_with_registry!(
                "digest_chapter_placeholders_total",
                "Total number of chapter artifacts written as placeholders",
                registry
            )?,
            finalize_not_ready_total: register_counter_with_registry!(
                "digest_finalize_not_ready_total",
                "Total number of finalize invocations answered with not-ready",
                registry
            )?,
            model_retries_total: register_counter_with_registry!(
                "digest_model_retries_total",
                "Total number of model gateway call retries",
                registry
            )?,
            concepts_created_total: register_counter_with_registry!(
                "digest_concepts_created_total",
                "Total number of new master concepts registered",
                registry
            )?,
            chapter_duration: register_histogram_with_registry!(
                "digest_chapter_duration_seconds",
                "Duration of chapter summary tasks in seconds",
                vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0],
                registry
            )?,
            finalize_duration: register_histogram_with_registry!(
                "digest_finalize_duration_seconds",
                "Duration of finalize tasks in seconds",
                vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0],
                registry
            )?,
        })
    }
}
