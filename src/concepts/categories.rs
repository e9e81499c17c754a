/// カテゴリ分類の正規化。
///
/// 書籍要約モデルが提案するサブカテゴリを、Blobストア上の
/// タクソノミドキュメントに照らして正規化します。未知の値は
/// 親カテゴリの `allow_new` フラグに応じて、レビュー待ちに積むか
/// 既定サブカテゴリへ丸めます。
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::blob::{BlobStore, get_json, put_json};
use crate::util::text::fold_width;

pub(crate) const MASTER_CATEGORIES_KEY: &str = "vocab/master_categories.json";
pub(crate) const PENDING_CATEGORIES_KEY: &str = "vocab/pending_categories.json";

const DEFAULT_SUBCATEGORY: &str = "Other";

/// 親カテゴリとそのサブカテゴリ一覧。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CategoryEntry {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) subcategories: Vec<String>,
    /// trueなら未知のサブカテゴリをそのまま受け入れ、レビュー待ちに積む。
    #[serde(default)]
    pub(crate) allow_new: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct CategoryTaxonomy {
    #[serde(default)]
    pub(crate) categories: Vec<CategoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PendingCategory {
    pub(crate) parent: String,
    pub(crate) name: String,
    pub(crate) source: String,
    pub(crate) first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct PendingCategoriesDocument {
    #[serde(default)]
    pub(crate) pending: Vec<PendingCategory>,
}

pub(crate) struct CategoryNormalizer {
    blobs: Arc<dyn BlobStore>,
}

impl CategoryNormalizer {
    pub(crate) fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub(crate) async fn load_taxonomy(&self) -> Result<CategoryTaxonomy> {
        Ok(get_json(self.blobs.as_ref(), MASTER_CATEGORIES_KEY)
            .await?
            .unwrap_or_default())
    }

    /// 提案されたサブカテゴリを正規化する。
    ///
    /// 一致判定は幅正規化＋小文字化後の比較。一致した場合はタクソノミ側の
    /// 表記を返す。親カテゴリ自体が未知の場合は既定値に丸める。
    pub(crate) async fn normalize(
        &self,
        parent: &str,
        suggested: Option<&str>,
        source: &str,
    ) -> Result<String> {
        let taxonomy = self.load_taxonomy().await?;
        let Some(entry) = taxonomy
            .categories
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(parent))
        else {
            warn!(%parent, "unknown parent category, using default subcategory");
            return Ok(DEFAULT_SUBCATEGORY.to_string());
        };

        let fallback = entry
            .subcategories
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_SUBCATEGORY.to_string());

        let Some(suggested) = suggested.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(fallback);
        };

        let wanted = fold_width(suggested).to_lowercase();
        if let Some(known) = entry
            .subcategories
            .iter()
            .find(|sub| fold_width(sub).to_lowercase() == wanted)
        {
            return Ok(known.clone());
        }

        if entry.allow_new {
            debug!(%parent, subcategory = %suggested, "accepting new subcategory for review");
            self.append_pending(PendingCategory {
                parent: entry.name.clone(),
                name: suggested.to_string(),
                source: source.to_string(),
                first_seen: Utc::now(),
            })
            .await?;
            return Ok(suggested.to_string());
        }

        debug!(%parent, subcategory = %suggested, "unknown subcategory, falling back");
        Ok(fallback)
    }

    async fn append_pending(&self, entry: PendingCategory) -> Result<()> {
        let mut document: PendingCategoriesDocument =
            get_json(self.blobs.as_ref(), PENDING_CATEGORIES_KEY)
                .await?
                .unwrap_or_default();
        let exists = document
            .pending
            .iter()
            .any(|pending| pending.parent == entry.parent && pending.name == entry.name);
        if !exists {
            document.pending.push(entry);
            put_json(self.blobs.as_ref(), PENDING_CATEGORIES_KEY, &document).await?;
        }
        Ok(())
    }
}
