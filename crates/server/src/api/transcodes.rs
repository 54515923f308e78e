//! Transcoding job inspection handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use warden_core::JobSnapshot;

use crate::state::AppState;

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct TranscodeListResponse {
    pub jobs: Vec<JobSnapshot>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct TranscodeErrorResponse {
    pub error: String,
}

/// GET /api/v1/transcodes
pub async fn list_transcodes(State(state): State<Arc<AppState>>) -> Json<TranscodeListResponse> {
    let mut jobs = state.registry().snapshots();
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let total = jobs.len();
    Json(TranscodeListResponse { jobs, total })
}

/// GET /api/v1/transcodes/{id}
pub async fn get_transcode(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, impl IntoResponse> {
    match state.registry().find_by_id(&id) {
        Some(job) => Ok(Json(job.snapshot())),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(TranscodeErrorResponse {
                error: format!("Transcoding job not found: {}", id),
            }),
        )),
    }
}
