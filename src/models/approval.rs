use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl ApprovalPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalPriority::Low => "low",
            ApprovalPriority::Normal => "normal",
            ApprovalPriority::High => "high",
            ApprovalPriority::Urgent => "urgent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(ApprovalPriority::Low),
            "normal" => Some(ApprovalPriority::Normal),
            "high" => Some(ApprovalPriority::High),
            "urgent" => Some(ApprovalPriority::Urgent),
            _ => None,
        }
    }
}

/// Who may resolve a step: an exact user, anyone holding a role, or any one
/// member of a fixed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApproverSpec {
    User { id: String },
    Role { role: String },
    AnyOf { users: Vec<String> },
}

impl ApproverSpec {
    pub fn allows(&self, user_id: &str, role: &str) -> bool {
        match self {
            ApproverSpec::User { id } => id == user_id,
            ApproverSpec::Role { role: required } => required == role,
            ApproverSpec::AnyOf { users } => users.iter().any(|u| u == user_id),
        }
    }
}

impl fmt::Display for ApproverSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApproverSpec::User { id } => write!(f, "user {}", id),
            ApproverSpec::Role { role } => write!(f, "role {}", role),
            ApproverSpec::AnyOf { users } => write!(f, "any of {}", users.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "cancelled" => Some(ApprovalStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRequestType {
    StatusChange,
    SalaryOffer,
}

impl ApprovalRequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalRequestType::StatusChange => "status_change",
            ApprovalRequestType::SalaryOffer => "salary_offer",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "status_change" => Some(ApprovalRequestType::StatusChange),
            "salary_offer" => Some(ApprovalRequestType::SalaryOffer),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Step template inside a flow definition; instantiated per request in
/// declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub approver: ApproverSpec,
    #[serde(default = "default_true")]
    pub is_required: bool,
}

/// One ordered gate of a request. `entered_at` starts the escalation clock
/// when the step becomes the active one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: Uuid,
    pub order: i32,
    pub approver: ApproverSpec,
    pub is_required: bool,
    pub status: StepStatus,
    pub approved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    pub entered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalComment {
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    AutoApprove,
    EscalateToManager,
    Reject,
    NotifyAdmin,
}

/// Applied by the escalation scan when the active step has been pending
/// longer than `timeout_hours`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    pub timeout_hours: i64,
    pub action: EscalationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_to_role: Option<String>,
}

/// Reusable sign-off sequence definition, referenced by name from
/// `request_approval` actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalFlow {
    pub id: Uuid,
    pub name: String,
    pub request_type: ApprovalRequestType,
    pub steps: Vec<StepDefinition>,
    pub escalation: Option<EscalationRule>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub flow_id: Uuid,
    pub request_type: ApprovalRequestType,
    pub requested_value: String,
    pub requested_by: String,
    pub priority: ApprovalPriority,
    pub steps: Vec<ApprovalStep>,
    pub current_step_index: i32,
    pub status: ApprovalStatus,
    pub comments: Vec<ApprovalComment>,
    pub escalation: Option<EscalationRule>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.steps.get(self.current_step_index as usize)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
