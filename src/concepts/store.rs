/// マスタ概念語彙ストア。
///
/// 語彙はBlobストア上の単一JSONドキュメントとして保持されます。
/// 読み出しはTTL付きキャッシュを経由し、書き込み時に必ず無効化します。
/// 同時書き込みはlast-writer-winsで、解決ロジック側が
/// 「読み出し→全件解決→一括書き込み」の形で書き込み回数を抑えます。
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::store::blob::{BlobStore, get_json, put_json};

pub(crate) const MASTER_CONCEPTS_KEY: &str = "vocab/master_concepts.json";
pub(crate) const PENDING_CONCEPTS_KEY: &str = "vocab/pending_concepts.json";

/// マスタ概念エントリ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MasterConcept {
    /// 正規名。表示・リンクには常にこの表記を使う。
    pub(crate) name: String,
    /// このエントリに解決された別表記。
    #[serde(default)]
    pub(crate) aliases: Vec<String>,
    /// このエントリに解決された回数（新規登録時は1）。
    #[serde(default)]
    pub(crate) usage_count: u64,
    /// 正規名の埋め込みベクトル。古いエントリには無いことがあり、
    /// 解決時に遅延バックフィルされる。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) embedding: Option<Vec<f32>>,
    pub(crate) source: String,
    pub(crate) first_seen: DateTime<Utc>,
}

/// マスタ語彙ドキュメント。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ConceptDocument {
    #[serde(default)]
    pub(crate) concepts: Vec<MasterConcept>,
}

/// レビュー待ち概念エントリ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PendingConcept {
    pub(crate) name: String,
    pub(crate) source: String,
    pub(crate) first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct PendingConceptsDocument {
    #[serde(default)]
    pub(crate) pending: Vec<PendingConcept>,
}

struct CachedDocument {
    document: ConceptDocument,
    fetched_at: Instant,
}

/// マスタ概念語彙ストア。
pub(crate) struct ConceptStore {
    blobs: Arc<dyn BlobStore>,
    cache_ttl: Duration,
    cache: Mutex<Option<CachedDocument>>,
}

impl ConceptStore {
    pub(crate) fn new(blobs: Arc<dyn BlobStore>, cache_ttl: Duration) -> Self {
        Self {
            blobs,
            cache_ttl,
            cache: Mutex::new(None),
        }
    }

    /// 語彙ドキュメントを読み出す（TTL内はキャッシュを返す）。
    ///
    /// 読み取り専用の利用（レポート、レンダリング）向け。
    /// read-modify-writeには [`Self::load_fresh`] を使うこと。
    pub(crate) async fn load(&self) -> Result<ConceptDocument> {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(cached.document.clone());
                }
            }
        }
        self.load_fresh().await
    }

    /// キャッシュを迂回して語彙ドキュメントを読み出し、キャッシュを更新する。
    pub(crate) async fn load_fresh(&self) -> Result<ConceptDocument> {
        let document: ConceptDocument = get_json(self.blobs.as_ref(), MASTER_CONCEPTS_KEY)
            .await?
            .unwrap_or_default();
        let mut cache = self.cache.lock().await;
        *cache = Some(CachedDocument {
            document: document.clone(),
            fetched_at: Instant::now(),
        });
        Ok(document)
    }

    /// 語彙ドキュメントを書き戻す。キャッシュは書いた内容で置き換える。
    pub(crate) async fn save(&self, document: &ConceptDocument) -> Result<()> {
        put_json(self.blobs.as_ref(), MASTER_CONCEPTS_KEY, document).await?;
        let mut cache = self.cache.lock().await;
        *cache = Some(CachedDocument {
            document: document.clone(),
            fetched_at: Instant::now(),
        });
        Ok(())
    }

    /// レビュー待ちドキュメントに新規概念を追記する。
    pub(crate) async fn append_pending(&self, entries: Vec<PendingConcept>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut document: PendingConceptsDocument =
            get_json(self.blobs.as_ref(), PENDING_CONCEPTS_KEY)
                .await?
                .unwrap_or_default();
        document.pending.extend(entries);
        put_json(self.blobs.as_ref(), PENDING_CONCEPTS_KEY, &document).await
    }

    pub(crate) async fn load_pending(&self) -> Result<PendingConceptsDocument> {
        Ok(get_json(self.blobs.as_ref(), PENDING_CONCEPTS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub(crate) fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }
}
