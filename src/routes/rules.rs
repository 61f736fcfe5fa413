use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::rule_dto::{CreateRulePayload, ToggleRulePayload, UpdateRulePayload};
use crate::{error::Result, AppState};

pub async fn list_rules(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let rules = state.rule_service.list_rules().await?;
    Ok(Json(rules))
}

#[utoipa::path(
    post,
    path = "/api/rules",
    responses(
        (status = 201, description = "Automation rule created"),
        (status = 400, description = "Invalid rule payload"),
    ),
)]
pub async fn create_rule(
    State(state): State<AppState>,
    Json(payload): Json<CreateRulePayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let rule = state.rule_service.create_rule(payload).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let rule = state.rule_service.get_rule(id).await?;
    Ok(Json(rule))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRulePayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let rule = state.rule_service.update_rule(id, payload).await?;
    Ok(Json(rule))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.rule_service.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/rules/{id}/toggle",
    params(
        ("id" = Uuid, Path, description = "Rule ID")
    ),
    responses(
        (status = 200, description = "Rule activation toggled"),
        (status = 404, description = "Rule not found"),
    ),
)]
pub async fn toggle_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ToggleRulePayload>,
) -> Result<impl IntoResponse> {
    let rule = state
        .rule_service
        .toggle_rule(id, payload.is_active)
        .await?;
    Ok(Json(rule))
}
