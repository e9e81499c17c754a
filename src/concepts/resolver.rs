/// 概念アイデンティティ解決。
///
/// 生の概念名をマスタ語彙の正規エントリへ解決します。優先順:
/// 1. 正規化キーの完全一致（正規名・別表記の両方）
/// 2. 埋め込みコサイン類似度が閾値以上の既存エントリ
/// 3. 新規エントリとして登録し、レビュー待ちキューへ追記
///
/// 1回の呼び出しにつき語彙の読み出しと書き込みは各1回
/// （読み出し→全件解決→一括書き込み）。同時呼び出し同士の競合は
/// last-writer-winsとして許容します。
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::store::{ConceptStore, MasterConcept, PendingConcept};
use crate::util::text::concept_key;

/// テキスト埋め込みの供給元。
///
/// `Ok(None)` は「埋め込みが得られなかった」ことを表し、呼び出し側は
/// 類似度マッチングを諦めてフォールバックする。
#[async_trait]
pub(crate) trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>>;
}

/// 解決結果。`canonical` をリンク・表示に使う。
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedConcept {
    pub(crate) original: String,
    pub(crate) canonical: String,
    pub(crate) is_new: bool,
}

/// コサイン類似度。次元不一致またはゼロベクトルは0.0。
#[must_use]
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub(crate) struct ConceptResolver {
    store: Arc<ConceptStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    similarity_threshold: f64,
}

impl ConceptResolver {
    pub(crate) fn new(
        store: Arc<ConceptStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        similarity_threshold: f64,
    ) -> Self {
        Self {
            store,
            embedder,
            similarity_threshold,
        }
    }

    /// 生の概念名の一覧をマスタ語彙へ解決する。
    ///
    /// `source` は新規エントリの由来ラベル（例: `book: タイトル`）。
    /// 入力1件につき必ず1件返す。空白のみの名前は語彙に触れず
    /// そのまま返す（canonical = original）。出力は入力順を保つ。
    pub(crate) async fn normalize(
        &self,
        raw_names: &[String],
        source: &str,
    ) -> Result<Vec<ResolvedConcept>> {
        if raw_names.is_empty() {
            return Ok(Vec::new());
        }

        let mut document = self.store.load_fresh().await?;
        let mut key_index: HashMap<String, usize> = HashMap::new();
        for (idx, concept) in document.concepts.iter().enumerate() {
            key_index.entry(concept_key(&concept.name)).or_insert(idx);
            for alias in &concept.aliases {
                key_index.entry(concept_key(alias)).or_insert(idx);
            }
        }

        let mut resolved = Vec::with_capacity(raw_names.len());
        let mut pending = Vec::new();
        let mut dirty = false;

        for raw in raw_names {
            let key = concept_key(raw);
            if key.is_empty() {
                resolved.push(ResolvedConcept {
                    original: raw.clone(),
                    canonical: raw.clone(),
                    is_new: false,
                });
                continue;
            }

            if let Some(&idx) = key_index.get(&key) {
                document.concepts[idx].usage_count += 1;
                record_alias(&mut document.concepts[idx], raw);
                dirty = true;
                resolved.push(ResolvedConcept {
                    original: raw.clone(),
                    canonical: document.concepts[idx].name.clone(),
                    is_new: false,
                });
                continue;
            }

            match self.match_by_similarity(raw, &mut document.concepts, &mut dirty).await? {
                Some(idx) => {
                    info!(
                        concept = %raw,
                        canonical = %document.concepts[idx].name,
                        "concept resolved by embedding similarity"
                    );
                    document.concepts[idx].usage_count += 1;
                    record_alias(&mut document.concepts[idx], raw);
                    dirty = true;
                    key_index.insert(key, idx);
                    resolved.push(ResolvedConcept {
                        original: raw.clone(),
                        canonical: document.concepts[idx].name.clone(),
                        is_new: false,
                    });
                }
                None => {
                    let now = Utc::now();
                    let embedding = self.embed_or_none(raw).await;
                    document.concepts.push(MasterConcept {
                        name: raw.clone(),
                        aliases: Vec::new(),
                        usage_count: 1,
                        embedding,
                        source: source.to_string(),
                        first_seen: now,
                    });
                    key_index.insert(key, document.concepts.len() - 1);
                    pending.push(PendingConcept {
                        name: raw.clone(),
                        source: source.to_string(),
                        first_seen: now,
                    });
                    dirty = true;
                    debug!(concept = %raw, "registered new master concept");
                    resolved.push(ResolvedConcept {
                        original: raw.clone(),
                        canonical: raw.clone(),
                        is_new: true,
                    });
                }
            }
        }

        if dirty {
            self.store.save(&document).await?;
        }
        self.store.append_pending(pending).await?;

        Ok(resolved)
    }

    /// 埋め込み類似度で既存エントリを探す。
    ///
    /// 埋め込みを持たない既存エントリはこのパスでバックフィルする
    /// （語彙の自己修復）。
    async fn match_by_similarity(
        &self,
        raw: &str,
        concepts: &mut [MasterConcept],
        dirty: &mut bool,
    ) -> Result<Option<usize>> {
        let Some(query) = self.embed_or_none(raw).await else {
            return Ok(None);
        };

        let mut best: Option<(usize, f64)> = None;
        for (idx, concept) in concepts.iter_mut().enumerate() {
            if concept.embedding.is_none() {
                if let Some(backfilled) = self.embed_or_none(&concept.name).await {
                    concept.embedding = Some(backfilled);
                    *dirty = true;
                }
            }
            let Some(embedding) = concept.embedding.as_ref() else {
                continue;
            };
            let similarity = cosine_similarity(&query, embedding);
            if similarity >= self.similarity_threshold
                && best.map_or(true, |(_, score)| similarity > score)
            {
                best = Some((idx, similarity));
            }
        }
        Ok(best.map(|(idx, _)| idx))
    }

    async fn embed_or_none(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(text).await {
            Ok(embedding) => embedding,
            Err(error) => {
                warn!(%error, "embedding request failed, skipping similarity match");
                None
            }
        }
    }
}

/// 表記が新しい別表記なら追記する。変更があればtrue。
fn record_alias(concept: &mut MasterConcept, raw: &str) -> bool {
    if concept.name == raw || concept.aliases.iter().any(|alias| alias == raw) {
        return false;
    }
    concept.aliases.push(raw.to_string());
    true
}
