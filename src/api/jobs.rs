use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use super::{ErrorResponse, internal_error};
use crate::app::AppState;
use crate::store::jobs::{JobRecord, JobStatus};

pub(crate) async fn fetch(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Response {
    match state.orchestrator().jobs().read(job_id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("job {job_id} not found"),
            }),
        )
            .into_response(),
        Err(error) => {
            error!(%job_id, %error, "failed to read job record");
            internal_error(&error)
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    status: String,
}

#[derive(Debug, Serialize)]
struct JobListResponse {
    jobs: Vec<JobRecord>,
}

/// ステータス指定でジョブを列挙する（運用スキャン用）。
pub(crate) async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let Some(status) = JobStatus::from_str(&query.status) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("unknown job status: {}", query.status),
            }),
        )
            .into_response();
    };

    match state.orchestrator().jobs().list_by_status(status).await {
        Ok(jobs) => Json(JobListResponse { jobs }).into_response(),
        Err(error) => {
            error!(%error, "failed to list jobs");
            internal_error(&error)
        }
    }
}
