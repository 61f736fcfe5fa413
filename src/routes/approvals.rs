use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::approval_dto::{
    CancelApprovalPayload, CreateApprovalPayload, CreateFlowPayload, PendingApprovalsQuery,
    ResolveStepPayload,
};
use crate::{error::Result, AppState};

pub async fn create_flow(
    State(state): State<AppState>,
    Json(payload): Json<CreateFlowPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let flow = state
        .automation
        .approvals()
        .create_flow(
            payload.name,
            payload.request_type,
            payload.steps,
            payload.escalation,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(flow)))
}

pub async fn list_flows(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let flows = state.automation.approvals().list_flows().await?;
    Ok(Json(flows))
}

pub async fn create_approval(
    State(state): State<AppState>,
    Json(payload): Json<CreateApprovalPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let request = state
        .automation
        .approvals()
        .create_request(
            payload.candidate_id,
            &payload.flow,
            &payload.requested_value,
            &payload.requested_by,
            payload.priority,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_pending_approvals(
    State(state): State<AppState>,
    Query(query): Query<PendingApprovalsQuery>,
) -> Result<impl IntoResponse> {
    let requests = state
        .automation
        .approvals()
        .list_pending(&query.user_id, &query.role)
        .await?;
    Ok(Json(requests))
}

pub async fn get_approval(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let request = state.automation.approvals().get(id).await?;
    Ok(Json(request))
}

#[utoipa::path(
    post,
    path = "/api/approvals/{id}/steps/{step_id}/resolve",
    params(
        ("id" = Uuid, Path, description = "Approval request ID"),
        ("step_id" = Uuid, Path, description = "Step ID, must be the active step"),
    ),
    responses(
        (status = 200, description = "Step resolved"),
        (status = 401, description = "Caller does not satisfy the step's approver"),
        (status = 409, description = "Step resolved out of order or request already terminal"),
    ),
)]
pub async fn resolve_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ResolveStepPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let request = state
        .automation
        .resolve_approval(
            id,
            step_id,
            payload.decision,
            &payload.approver_id,
            &payload.approver_role,
            payload.comments,
        )
        .await?;
    Ok(Json(request))
}

pub async fn cancel_approval(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelApprovalPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let request = state
        .automation
        .approvals()
        .cancel(id, &payload.cancelled_by, payload.comments)
        .await?;
    Ok(Json(request))
}
