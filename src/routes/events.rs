use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::dto::event_dto::{FailuresQuery, SubmitEventPayload};
use crate::models::event::PipelineEvent;
use crate::store::{CandidateStore, FailureStore};
use crate::{error::Result, AppState};

/// Entry point for triggers observed outside the core (test platforms,
/// résumé intake, interview tooling).
pub async fn submit_event(
    State(state): State<AppState>,
    Json(payload): Json<SubmitEventPayload>,
) -> Result<impl IntoResponse> {
    let event = match payload {
        SubmitEventPayload::ScoreUpdated {
            candidate_id,
            score_type,
            value,
        } => {
            if let Some(value) = value {
                state.store.set_score(candidate_id, &score_type, value).await?;
            }
            PipelineEvent::ScoreUpdated {
                candidate_id,
                score_type,
            }
        }
        SubmitEventPayload::InterviewCompleted {
            candidate_id,
            interview_type,
        } => PipelineEvent::InterviewCompleted {
            candidate_id,
            interview_type,
        },
        SubmitEventPayload::ResumeUploaded { candidate_id } => {
            PipelineEvent::ResumeUploaded { candidate_id }
        }
    };

    let summary = state.automation.submit_event(event).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "dispatch": summary }))))
}

/// Operator-facing log of automated actions that could not be completed.
pub async fn list_failures(
    State(state): State<AppState>,
    Query(query): Query<FailuresQuery>,
) -> Result<impl IntoResponse> {
    let failures = state.store.list_failures(query.limit).await?;
    Ok(Json(failures))
}
