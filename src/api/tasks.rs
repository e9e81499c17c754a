use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use super::{ErrorResponse, stage_error_response};
use crate::app::AppState;
use crate::queue::types::{TaskKind, TaskPayload};

#[derive(Debug, Serialize)]
struct TaskAck {
    status: &'static str,
}

/// タスク配送の受け口。
///
/// 配送デーモンはこのエンドポイントのHTTPステータスだけで
/// 再配送の要否を判断する。429はNotReady（試行回数を消費しない
/// スケジュール再試行）、それ以外の4xxは恒久失敗、5xxは
/// バックオフ付き再配送。
pub(crate) async fn handle(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(payload): Json<TaskPayload>,
) -> Response {
    let Some(kind) = TaskKind::from_str(&kind) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("unknown task kind: {kind}"),
            }),
        )
            .into_response();
    };

    let orchestrator = state.orchestrator();
    let result = match kind {
        TaskKind::Prepare => orchestrator.prepare(payload.job_id).await,
        TaskKind::Chapter => orchestrator.process_chapter(&payload).await,
        TaskKind::Finalize => orchestrator.finalize(payload.job_id).await,
    };

    match result {
        Ok(()) => (StatusCode::OK, Json(TaskAck { status: "ok" })).into_response(),
        Err(error) => {
            warn!(
                job_id = %payload.job_id,
                kind = kind.as_str(),
                %error,
                "task handler returned error"
            );
            stage_error_response(&error)
        }
    }
}
