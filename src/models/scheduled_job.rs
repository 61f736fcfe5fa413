use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::candidate::CandidateStatus;
use super::event::ActionInvocation;
use super::rule::Action;

/// Cancellation key for a durable timer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobKey {
    pub rule_id: Uuid,
    pub candidate_id: Uuid,
    pub action_index: i32,
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "cancelled" => Some(JobStatus::Cancelled),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Durable timer row. `guard_status` is the candidate's status when the job
/// was scheduled; the drain loop re-validates it at fire time and cancels the
/// job instead of executing if the candidate has moved on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub candidate_id: Uuid,
    pub action_index: i32,
    pub triggered_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub guard_status: Option<CandidateStatus>,
    pub action: Action,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn key(&self) -> JobKey {
        JobKey {
            rule_id: self.rule_id,
            candidate_id: self.candidate_id,
            action_index: self.action_index,
            triggered_at: self.triggered_at,
        }
    }

    pub fn invocation(&self) -> ActionInvocation {
        ActionInvocation {
            rule_id: self.rule_id,
            candidate_id: self.candidate_id,
            action_index: self.action_index as usize,
            action: self.action.clone(),
            triggered_at: self.triggered_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(DeliveryStatus::Pending),
            "success" => Some(DeliveryStatus::Success),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// Outbox row for a collaborator call. Delivery retries with backoff until
/// `attempts` reaches `max_attempts`, then the row is marked failed and the
/// failure surfaces to the operator log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub id: Uuid,
    pub kind: String,
    pub payload: JsonValue,
    pub target_url: String,
    pub http_status: Option<i32>,
    pub response_body: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operator-facing record of an automated action that could not be completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub id: Uuid,
    pub rule_id: Option<Uuid>,
    pub candidate_id: Uuid,
    pub action_index: i32,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}
