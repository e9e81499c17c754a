/// モデルゲートウェイクライアント。
///
/// JSONモード補完（テキスト・画像入力）と埋め込みを提供します。
/// レスポンスはデシリアライズ前にJSON Schema 2020-12で検証され、
/// エラーは種別（ネットワーク/レート制限/不正JSON）ごとの待機ポリシーで
/// 有限回再試行されます。再試行を使い切った呼び出しは `Ok(None)` を返し、
/// 呼び出し側がプレースホルダ等へ縮退します。
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::concepts::resolver::EmbeddingProvider;
use crate::observability::Telemetry;
use crate::schema::validate_json;
use crate::util::error::{ModelErrorClass, classify_http_error, classify_status};
use crate::util::retry::WaitPolicy;

/// 補完リクエストの1パート。
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum ContentPart {
    Text { text: String },
    Image { media_type: String, data: String },
}

impl ContentPart {
    pub(crate) fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// 生バイト列の画像をbase64エンコードしてパート化する。
    pub(crate) fn png_image(bytes: &[u8]) -> Self {
        ContentPart::Image {
            media_type: "image/png".to_string(),
            data: BASE64.encode(bytes),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    parts: &'a [ContentPart],
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Clone)]
pub(crate) struct ModelGatewayClient {
    client: Client,
    base_url: Url,
    completion_timeout: Duration,
    policy: WaitPolicy,
    telemetry: Arc<Telemetry>,
}

impl ModelGatewayClient {
    pub(crate) fn new(
        base_url: impl Into<String>,
        completion_timeout: Duration,
        policy: WaitPolicy,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("failed to build model-gateway client")?;
        let base_url = Url::parse(&base_url.into()).context("invalid model-gateway base URL")?;
        Ok(Self {
            client,
            base_url,
            completion_timeout,
            policy,
            telemetry,
        })
    }

    /// JSONモードで補完を実行し、スキーマ検証済みの値を返す。
    ///
    /// 再試行を使い切った場合は `Ok(None)`。`Err` はURL構築など
    /// 再試行しても意味のない失敗に限る。
    pub(crate) async fn complete_json(
        &self,
        parts: &[ContentPart],
        schema: &Value,
        operation: &str,
    ) -> Result<Option<Value>> {
        let url = self
            .base_url
            .join("v1/complete")
            .context("failed to build completion URL")?;

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.try_complete(&url, parts, schema).await {
                Ok(value) => return Ok(Some(value)),
                Err(class) => {
                    if !self.policy.can_retry(attempt) {
                        warn!(
                            %operation,
                            attempts = attempt,
                            "model completion failed after final attempt, giving up"
                        );
                        return Ok(None);
                    }
                    let wait = self.policy.wait_for(class, attempt);
                    self.telemetry.metrics().model_retries_total.inc();
                    warn!(
                        %operation,
                        attempt,
                        class = ?class,
                        wait_ms = wait.as_millis() as u64,
                        "model completion failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn try_complete(
        &self,
        url: &Url,
        parts: &[ContentPart],
        schema: &Value,
    ) -> std::result::Result<Value, ModelErrorClass> {
        let request = CompletionRequest {
            parts,
            response_format: "json",
        };

        let response = self
            .client
            .post(url.clone())
            .json(&request)
            .timeout(self.completion_timeout)
            .send()
            .await
            .map_err(|error| classify_http_error(&error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|_| ModelErrorClass::MalformedResponse)?;

        let value: Value = serde_json::from_str(&completion.content).map_err(|error| {
            warn!(%error, "model returned non-JSON content");
            ModelErrorClass::MalformedResponse
        })?;

        let validation = validate_json(schema, &value);
        if !validation.valid {
            warn!(errors = ?validation.errors, "model response failed JSON Schema validation");
            return Err(ModelErrorClass::MalformedResponse);
        }

        debug!("model response passed JSON Schema validation");
        Ok(value)
    }

    /// テキストの埋め込みベクトルを取得する。失敗時は `Ok(None)`。
    pub(crate) async fn embed_text(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let url = self
            .base_url
            .join("v1/embed")
            .context("failed to build embed URL")?;

        let response = self
            .client
            .post(url)
            .json(&EmbedRequest { text })
            .timeout(Duration::from_secs(30))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "embedding request failed");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "embedding endpoint returned error status");
            return Ok(None);
        }

        match response.json::<EmbedResponse>().await {
            Ok(body) => Ok(Some(body.embedding)),
            Err(error) => {
                warn!(%error, "failed to deserialize embedding response");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ModelGatewayClient {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        self.embed_text(text).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::util::retry::RetryConfig;

    fn test_policy() -> WaitPolicy {
        WaitPolicy::new(
            RetryConfig::new(3, 1, 5),
            Duration::from_millis(1),
            Duration::from_millis(1),
        )
    }

    fn client_for(server: &MockServer) -> ModelGatewayClient {
        ModelGatewayClient::new(
            server.uri(),
            Duration::from_secs(5),
            test_policy(),
            Arc::new(Telemetry::new().unwrap()),
        )
        .unwrap()
    }

    fn summary_schema() -> Value {
        json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "properties": { "summary": { "type": "string" } },
            "required": ["summary"]
        })
    }

    #[tokio::test]
    async fn complete_json_returns_validated_value() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": "{\"summary\": \"- 要点\"}"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client
            .complete_json(
                &[ContentPart::text("summarize this")],
                &summary_schema(),
                "chapter_summary",
            )
            .await
            .unwrap();

        assert_eq!(result, Some(json!({ "summary": "- 要点" })));
    }

    #[tokio::test]
    async fn complete_json_retries_malformed_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": "not json at all"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": "{\"summary\": \"ok\"}"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client
            .complete_json(
                &[ContentPart::text("summarize")],
                &summary_schema(),
                "chapter_summary",
            )
            .await
            .unwrap();

        assert!(result.is_some());
    }

    #[tokio::test]
    async fn complete_json_gives_up_after_bounded_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/complete"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client
            .complete_json(
                &[ContentPart::text("summarize")],
                &summary_schema(),
                "chapter_summary",
            )
            .await
            .unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn complete_json_rejects_schema_violations() {
        let server = MockServer::start().await;
        // JSONとしては正しいがスキーマを満たさないレスポンス
        Mock::given(method("POST"))
            .and(path("/v1/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": "{\"other\": 1}"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client
            .complete_json(
                &[ContentPart::text("summarize")],
                &summary_schema(),
                "chapter_summary",
            )
            .await
            .unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn embed_text_returns_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embedding": [0.1, 0.2, 0.3]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let embedding = client.embed_text("機械学習").await.unwrap();
        assert_eq!(embedding, Some(vec![0.1, 0.2, 0.3]));
    }

    #[tokio::test]
    async fn embed_text_degrades_to_none_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let embedding = client.embed_text("機械学習").await.unwrap();
        assert!(embedding.is_none());
    }

    #[test]
    fn png_image_part_is_base64_encoded() {
        let part = ContentPart::png_image(&[0x89, 0x50, 0x4e, 0x47]);
        match part {
            ContentPart::Image { media_type, data } => {
                assert_eq!(media_type, "image/png");
                assert_eq!(data, BASE64.encode([0x89, 0x50, 0x4e, 0x47]));
            }
            ContentPart::Text { .. } => panic!("expected image part"),
        }
    }
}
