/// ドキュメントソースクライアント。
///
/// アップロード済み書籍ドキュメントのメタデータ、ページテキスト、
/// ページ画像（PNG）を取得します。存在しないドキュメントは `Ok(None)` で
/// 表現し、呼び出し側がジョブを恒久失敗させます。
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

/// ドキュメントメタデータ。
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DocumentMetadata {
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) author: Option<String>,
    pub(crate) page_count: usize,
}

/// 1ページ分の抽出テキスト。
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PageText {
    pub(crate) page: usize,
    pub(crate) text: String,
}

#[derive(Debug, Deserialize)]
struct PagesResponse {
    pages: Vec<PageText>,
}

#[derive(Debug, Clone)]
pub(crate) struct DocumentSourceClient {
    client: Client,
    base_url: Url,
    fetch_timeout: Duration,
}

impl DocumentSourceClient {
    pub(crate) fn new(base_url: impl Into<String>, fetch_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("failed to build document-source client")?;
        let base_url = Url::parse(&base_url.into()).context("invalid document-source base URL")?;
        Ok(Self {
            client,
            base_url,
            fetch_timeout,
        })
    }

    /// メタデータを取得する。404は `Ok(None)`。
    pub(crate) async fn metadata(&self, document_ref: &str) -> Result<Option<DocumentMetadata>> {
        let url = self
            .base_url
            .join(&format!("v1/documents/{document_ref}"))
            .context("failed to build document metadata URL")?;

        let response = self
            .client
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .context("document metadata request failed")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .context("document metadata endpoint returned error status")?;

        let metadata = response
            .json::<DocumentMetadata>()
            .await
            .context("failed to deserialize document metadata")?;
        Ok(Some(metadata))
    }

    /// `[start, end]` ページ（1始まり、両端含む）の抽出テキストを取得する。
    pub(crate) async fn page_texts(
        &self,
        document_ref: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<PageText>> {
        let mut url = self
            .base_url
            .join(&format!("v1/documents/{document_ref}/pages"))
            .context("failed to build page text URL")?;
        url.query_pairs_mut()
            .append_pair("start", &start.to_string())
            .append_pair("end", &end.to_string());

        debug!(%document_ref, start, end, "fetching page texts");

        let response = self
            .client
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .context("page text request failed")?
            .error_for_status()
            .context("page text endpoint returned error status")?;

        let body = response
            .json::<PagesResponse>()
            .await
            .context("failed to deserialize page texts")?;
        Ok(body.pages)
    }

    /// 1ページをPNG画像としてレンダリングする。404は `Ok(None)`。
    pub(crate) async fn render_page_png(
        &self,
        document_ref: &str,
        page: usize,
    ) -> Result<Option<Vec<u8>>> {
        let url = self
            .base_url
            .join(&format!("v1/documents/{document_ref}/pages/{page}/image"))
            .context("failed to build page image URL")?;

        let response = self
            .client
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .context("page image request failed")?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .context("failed to read page image body")?;
                Ok(Some(bytes.to_vec()))
            }
            status => Err(anyhow!("page image endpoint returned error status {status}")),
        }
    }
}
