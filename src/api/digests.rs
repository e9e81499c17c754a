use axum::{Json, extract::State, http::StatusCode, response::IntoResponse, response::Response};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::stage_error_response;
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitDigestRequest {
    document_ref: String,
    category: String,
}

#[derive(Debug, Serialize)]
struct SubmitDigestResponse {
    job_id: Uuid,
    status: &'static str,
}

/// ジョブ受付。ドキュメント参照の形式検証のみ同期で行い、
/// 処理本体はprepareタスクに委ねて即座に202を返す。
pub(crate) async fn submit(
    State(state): State<AppState>,
    Json(payload): Json<SubmitDigestRequest>,
) -> Response {
    match state
        .orchestrator()
        .submit(&payload.document_ref, &payload.category)
        .await
    {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(SubmitDigestResponse {
                job_id,
                status: "accepted",
            }),
        )
            .into_response(),
        Err(error) => {
            warn!(%error, document_ref = %payload.document_ref, "digest submission rejected");
            stage_error_response(&error)
        }
    }
}
