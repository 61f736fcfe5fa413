use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::candidate_dto::{RegisterCandidatePayload, UpdateStatusPayload};
use crate::models::candidate::{CandidateSnapshot, CandidateStatus};
use crate::utils::time::Clock;
use crate::{error::Result, AppState};

pub async fn register_candidate(
    State(state): State<AppState>,
    Json(payload): Json<RegisterCandidatePayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let snapshot = CandidateSnapshot {
        id: payload.id.unwrap_or_else(Uuid::new_v4),
        name: payload.name,
        status: payload.status.unwrap_or(CandidateStatus::ForReview),
        scores: payload.scores,
        skills: payload.skills,
        job_id: payload.job_id,
        profile: payload.profile,
        last_status_change_at: state.clock.now(),
    };
    let record = state.automation.register_candidate(&snapshot).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": snapshot.id, "status": record.to_status })),
    ))
}

/// Manual transition: goes through the ledger and dispatches the resulting
/// status-change event like any automated one.
pub async fn update_candidate_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusPayload>,
) -> Result<impl IntoResponse> {
    let (record, summary) = state
        .automation
        .transition_candidate(id, payload.status, payload.changed_by, payload.reason)
        .await?;
    Ok(Json(json!({ "transition": record, "dispatch": summary })))
}

pub async fn get_candidate_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let status = state.automation.ledger().current_status(id).await?;
    let in_status = state.automation.time_in_status(id).await?;
    Ok(Json(json!({
        "candidate_id": id,
        "status": status,
        "seconds_in_status": in_status.num_seconds(),
    })))
}

pub async fn get_candidate_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let history = state.automation.ledger().history_of(id).await?;
    Ok(Json(history))
}
