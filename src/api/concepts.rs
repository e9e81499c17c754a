use axum::{Json, extract::State, response::{IntoResponse, Response}};
use serde::Serialize;
use tracing::{error, info};

use super::{internal_error, stage_error_response};
use crate::app::AppState;
use crate::concepts::analysis;

/// 重複疑い閾値は解決閾値よりやや低く取り、「マージ寸前」のペアを拾う。
const DUPLICATE_REPORT_MARGIN: f64 = 0.07;

/// マスター語彙の健全性レポート。
pub(crate) async fn report(State(state): State<AppState>) -> Response {
    let document = match state.orchestrator().concept_store().load().await {
        Ok(document) => document,
        Err(error) => {
            error!(%error, "failed to load concept vocabulary");
            return internal_error(&error);
        }
    };

    let threshold = (state.config().similarity_threshold() - DUPLICATE_REPORT_MARGIN).max(0.0);
    Json(analysis::build_report(&document, threshold)).into_response()
}

#[derive(Debug, Serialize)]
struct InboxResponse {
    processed: usize,
}

/// 受信箱のクリップをまとめて処理する。
pub(crate) async fn process_inbox(State(state): State<AppState>) -> Response {
    match state.orchestrator().process_inbox().await {
        Ok(processed) => {
            info!(processed, "inbox processing finished");
            Json(InboxResponse { processed }).into_response()
        }
        Err(error) => {
            error!(%error, "inbox processing failed");
            stage_error_response(&error)
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;
    use wiremock::MockServer;

    use crate::{
        app::{ComponentRegistry, build_router},
        config::Config,
    };

    async fn test_router() -> axum::Router {
        let gateway = MockServer::start().await;
        let documents = MockServer::start().await;
        let registry = ComponentRegistry::build(Config::for_tests(gateway.uri(), documents.uri()))
            .await
            .expect("registry builds");
        build_router(registry)
    }

    #[tokio::test]
    async fn report_on_empty_vocabulary_is_ok() {
        let app = test_router().await;
        let request = Request::get("/v1/concepts/report")
            .body(Body::empty())
            .expect("request builds");

        let response = app.oneshot(request).await.expect("request succeeds");
        assert_eq!(response.status(), StatusCode::OK);

        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let payload: serde_json::Value = serde_json::from_slice(&body_bytes).expect("valid json");
        assert_eq!(payload["total_concepts"], 0);
    }

    #[tokio::test]
    async fn empty_inbox_processes_zero_clips() {
        let app = test_router().await;
        let request = Request::post("/v1/inbox/process")
            .body(Body::empty())
            .expect("request builds");

        let response = app.oneshot(request).await.expect("request succeeds");
        assert_eq!(response.status(), StatusCode::OK);

        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let payload: serde_json::Value = serde_json::from_slice(&body_bytes).expect("valid json");
        assert_eq!(payload["processed"], 0);
    }
}
