use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::approval::{
    ApprovalDecision, ApprovalPriority, ApprovalRequestType, EscalationRule, StepDefinition,
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFlowPayload {
    #[validate(length(min = 1))]
    pub name: String,
    pub request_type: ApprovalRequestType,
    #[validate(length(min = 1))]
    pub steps: Vec<StepDefinition>,
    pub escalation: Option<EscalationRule>,
}

fn default_priority() -> ApprovalPriority {
    ApprovalPriority::Normal
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApprovalPayload {
    pub candidate_id: Uuid,
    #[validate(length(min = 1))]
    pub flow: String,
    #[validate(length(min = 1))]
    pub requested_value: String,
    #[validate(length(min = 1))]
    pub requested_by: String,
    #[serde(default = "default_priority")]
    pub priority: ApprovalPriority,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveStepPayload {
    pub decision: ApprovalDecision,
    #[validate(length(min = 1))]
    pub approver_id: String,
    #[serde(default)]
    pub approver_role: String,
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelApprovalPayload {
    #[validate(length(min = 1))]
    pub cancelled_by: String,
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PendingApprovalsQuery {
    pub user_id: String,
    #[serde(default)]
    pub role: String,
}
