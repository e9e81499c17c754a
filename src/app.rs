use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::{
    api,
    clients::{DocumentSourceClient, ModelGatewayClient},
    concepts::{categories::CategoryNormalizer, resolver::ConceptResolver, store::ConceptStore},
    config::Config,
    observability::Telemetry,
    pipeline::{
        orchestrator::{OrchestratorSettings, PipelineOrchestrator},
        segment::SegmentationEngine,
    },
    queue::{
        store::{MemoryTaskQueue, PgTaskQueueStore, TaskQueue},
        worker::DeliveryWorker,
    },
    store::{
        blob::{BlobStore, MemoryBlobStore, PgBlobStore},
        jobs::JobStateStore,
    },
    util::retry::{RetryConfig, WaitPolicy},
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Arc<Telemetry>,
    orchestrator: Arc<PipelineOrchestrator>,
    task_store: Option<PgTaskQueueStore>,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Arc<Telemetry> {
        &self.registry.telemetry
    }

    pub(crate) fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        &self.registry.orchestrator
    }

    pub(crate) fn config(&self) -> &Config {
        &self.registry.config
    }
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、アプリケーションの共有レジストリを構築する。
    ///
    /// `DIGEST_DB_DSN` が設定されていればPostgreSQLをBlobストアと
    /// タスクキューに使う。未設定時はインメモリ構成になり、タスクは
    /// 内部エンドポイントの手動呼び出しでのみ処理される（開発用）。
    ///
    /// # Errors
    /// Telemetry の初期化や HTTP クライアント構築が失敗した場合はエラーを返す。
    pub async fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Arc::new(Telemetry::new()?);

        let (blobs, task_store, queue): (
            Arc<dyn BlobStore>,
            Option<PgTaskQueueStore>,
            Arc<dyn TaskQueue>,
        ) = match config.digest_db_dsn() {
            Some(dsn) => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.digest_db_max_connections())
                    .acquire_timeout(config.digest_db_acquire_timeout())
                    .test_before_acquire(true)
                    .connect_lazy(dsn)
                    .context("failed to configure digest_db connection pool")?;
                let delivery_store =
                    PgTaskQueueStore::new(pool.clone(), config.queue_max_delivery_attempts());
                let enqueue_store =
                    PgTaskQueueStore::new(pool.clone(), config.queue_max_delivery_attempts());
                (
                    Arc::new(PgBlobStore::new(pool)),
                    Some(delivery_store),
                    Arc::new(enqueue_store),
                )
            }
            None => {
                warn!("DIGEST_DB_DSN not set, using in-memory stores (non-durable)");
                (MemoryBlobStore::shared(), None, MemoryTaskQueue::shared())
            }
        };

        let policy = WaitPolicy::new(
            RetryConfig::new(
                config.http_max_retries().max(1),
                config.http_backoff_base_ms(),
                config.http_backoff_cap_ms(),
            ),
            config.rate_limit_wait(),
            config.malformed_response_wait(),
        );
        let gateway = ModelGatewayClient::new(
            config.model_gateway_base_url(),
            config.model_completion_timeout(),
            policy,
            Arc::clone(&telemetry),
        )?;
        let documents = DocumentSourceClient::new(
            config.document_source_base_url(),
            config.document_fetch_timeout(),
        )?;

        let concept_store = Arc::new(ConceptStore::new(
            Arc::clone(&blobs),
            config.vocab_cache_ttl(),
        ));
        let resolver = Arc::new(ConceptResolver::new(
            Arc::clone(&concept_store),
            Arc::new(gateway.clone()),
            config.similarity_threshold(),
        ));

        let settings = OrchestratorSettings {
            chapter_stagger: config.chapter_stagger(),
            finalize_buffer: config.finalize_buffer(),
            toc_scan_start: config.toc_scan_start(),
            toc_scan_end: config.toc_scan_end(),
            toc_scan_extended_end: config.toc_scan_extended_end(),
            chapter_content_max_chars: config.chapter_content_max_chars(),
            concept_context_limit: config.concept_context_limit(),
        };
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            JobStateStore::new(Arc::clone(&blobs)),
            queue,
            gateway,
            documents,
            resolver,
            concept_store,
            CategoryNormalizer::new(Arc::clone(&blobs)),
            SegmentationEngine::new(
                config.regex_runaway_limit(),
                config.dedup_candidate_threshold(),
            ),
            Arc::clone(&telemetry),
            settings,
        ));

        Ok(Self {
            config,
            telemetry,
            orchestrator,
            task_store,
        })
    }

    /// タスク配送デーモンを起動する。PostgreSQL構成時のみ意味を持ち、
    /// インメモリ構成では `None` を返す。
    pub fn spawn_delivery_worker(&self) -> Result<Option<JoinHandle<()>>> {
        let Some(store) = self.task_store.clone() else {
            return Ok(None);
        };
        let worker = DeliveryWorker::new(
            store,
            self.config.self_base_url(),
            self.config.queue_poll_interval(),
            RetryConfig::new(
                usize::try_from(self.config.queue_max_delivery_attempts()).unwrap_or(5),
                self.config.http_backoff_base_ms(),
                self.config.http_backoff_cap_ms(),
            ),
            self.config.not_ready_requeue_wait(),
            Arc::clone(&self.telemetry),
        )?;
        Ok(Some(worker.spawn()))
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}
