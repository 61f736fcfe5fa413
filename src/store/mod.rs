pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::approval::{ApprovalFlow, ApprovalRequest};
use crate::models::candidate::{CandidateSnapshot, CandidateStatus, StatusTransition};
use crate::models::rule::AutomationRule;
use crate::models::scheduled_job::{
    DeliveryJob, ExecutionFailure, JobKey, JobStatus, ScheduledJob,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Rules table. Mutated only through the rules API; the engine reads
/// `active_rules` per dispatch.
#[async_trait]
pub trait RuleStore {
    async fn insert_rule(&self, rule: &AutomationRule) -> Result<()>;
    async fn update_rule(&self, rule: &AutomationRule) -> Result<bool>;
    async fn delete_rule(&self, id: Uuid) -> Result<bool>;
    async fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>>;
    async fn list_rules(&self) -> Result<Vec<AutomationRule>>;
    async fn active_rules(&self) -> Result<Vec<AutomationRule>>;
}

/// Candidate snapshot seam. In a full deployment the candidate record lives
/// with the candidate store collaborator; this is the slice the automation
/// core needs.
#[async_trait]
pub trait CandidateStore {
    async fn insert_candidate(&self, snapshot: &CandidateSnapshot) -> Result<()>;
    async fn snapshot(&self, id: Uuid) -> Result<Option<CandidateSnapshot>>;
    async fn set_status(&self, id: Uuid, status: CandidateStatus, at: DateTime<Utc>) -> Result<()>;
    async fn set_score(&self, id: Uuid, score_type: &str, value: f64) -> Result<()>;
    async fn candidate_ids(&self) -> Result<Vec<Uuid>>;
}

/// Append-only status history.
#[async_trait]
pub trait LedgerStore {
    async fn append_transition(&self, transition: &StatusTransition) -> Result<()>;
    async fn history(&self, candidate_id: Uuid) -> Result<Vec<StatusTransition>>;
    async fn latest_transition(&self, candidate_id: Uuid) -> Result<Option<StatusTransition>>;
}

#[async_trait]
pub trait ApprovalStore {
    async fn insert_flow(&self, flow: &ApprovalFlow) -> Result<()>;
    async fn flow_by_name(&self, name: &str) -> Result<Option<ApprovalFlow>>;
    async fn list_flows(&self) -> Result<Vec<ApprovalFlow>>;
    async fn insert_request(&self, request: &ApprovalRequest) -> Result<()>;
    async fn get_request(&self, id: Uuid) -> Result<Option<ApprovalRequest>>;
    async fn update_request(&self, request: &ApprovalRequest) -> Result<()>;
    async fn pending_requests(&self) -> Result<Vec<ApprovalRequest>>;
}

/// Durable timers plus the elapsed-trigger dedup marks.
#[async_trait]
pub trait JobStore {
    async fn insert_job(&self, job: &ScheduledJob) -> Result<()>;
    async fn cancel_job(&self, key: &JobKey) -> Result<bool>;
    /// Marks due pending jobs running and returns them; each pending job is
    /// claimed at most once.
    async fn claim_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledJob>>;
    async fn finish_job(&self, id: Uuid, status: JobStatus) -> Result<()>;
    /// Returns true the first time a `(rule, candidate, baseline)` tuple is
    /// seen; the elapsed scan only emits an event on a fresh mark.
    async fn try_mark_elapsed(
        &self,
        rule_id: Uuid,
        candidate_id: Uuid,
        baseline: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Collaborator-call outbox drained by the delivery worker.
#[async_trait]
pub trait OutboxStore {
    async fn enqueue_delivery(
        &self,
        kind: &str,
        payload: &JsonValue,
        target_url: &str,
        max_attempts: i32,
    ) -> Result<Uuid>;
    async fn claim_next_delivery(&self, now: DateTime<Utc>) -> Result<Option<DeliveryJob>>;
    async fn store_delivery_result(
        &self,
        id: Uuid,
        attempts: i32,
        http_status: Option<i32>,
        response_body: &str,
        success: bool,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Operator failure log.
#[async_trait]
pub trait FailureStore {
    async fn record_failure(&self, failure: &ExecutionFailure) -> Result<()>;
    async fn list_failures(&self, limit: i64) -> Result<Vec<ExecutionFailure>>;
}

pub trait Store:
    RuleStore
    + CandidateStore
    + LedgerStore
    + ApprovalStore
    + JobStore
    + OutboxStore
    + FailureStore
    + Send
    + Sync
    + 'static
{
}

impl<T> Store for T where
    T: RuleStore
        + CandidateStore
        + LedgerStore
        + ApprovalStore
        + JobStore
        + OutboxStore
        + FailureStore
        + Send
        + Sync
        + 'static
{
}
