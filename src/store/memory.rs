//! In-memory store used by the test suites and for running the service
//! without a database. Mirrors the PostgreSQL layout closely enough that the
//! services cannot tell them apart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::approval::{ApprovalFlow, ApprovalRequest, ApprovalStatus};
use crate::models::candidate::{CandidateSnapshot, CandidateStatus, StatusTransition};
use crate::models::rule::AutomationRule;
use crate::models::scheduled_job::{
    DeliveryJob, DeliveryStatus, ExecutionFailure, JobKey, JobStatus, ScheduledJob,
};

use super::{
    ApprovalStore, CandidateStore, FailureStore, JobStore, LedgerStore, OutboxStore, RuleStore,
};

#[derive(Default)]
struct Inner {
    rules: HashMap<Uuid, AutomationRule>,
    rule_order: Vec<Uuid>,
    candidates: HashMap<Uuid, CandidateSnapshot>,
    transitions: Vec<StatusTransition>,
    flows: HashMap<Uuid, ApprovalFlow>,
    flow_order: Vec<Uuid>,
    requests: HashMap<Uuid, ApprovalRequest>,
    request_order: Vec<Uuid>,
    jobs: HashMap<Uuid, ScheduledJob>,
    elapsed_marks: HashSet<(Uuid, Uuid, DateTime<Utc>)>,
    deliveries: HashMap<Uuid, DeliveryJob>,
    delivery_order: Vec<Uuid>,
    failures: Vec<ExecutionFailure>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("memory store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("memory store lock poisoned")
    }

    /// Test helper: pending scheduled jobs for one candidate.
    pub fn pending_jobs_for(&self, candidate_id: Uuid) -> Vec<ScheduledJob> {
        let inner = self.read();
        let mut jobs: Vec<_> = inner
            .jobs
            .values()
            .filter(|j| j.candidate_id == candidate_id && j.status == JobStatus::Pending)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.due_at);
        jobs
    }

    /// Test helper: every outbox row in enqueue order.
    pub fn deliveries(&self) -> Vec<DeliveryJob> {
        let inner = self.read();
        inner
            .delivery_order
            .iter()
            .filter_map(|id| inner.deliveries.get(id).cloned())
            .collect()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn insert_rule(&self, rule: &AutomationRule) -> Result<()> {
        let mut inner = self.write();
        inner.rule_order.push(rule.id);
        inner.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn update_rule(&self, rule: &AutomationRule) -> Result<bool> {
        let mut inner = self.write();
        match inner.rules.get_mut(&rule.id) {
            Some(existing) => {
                *existing = rule.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.write();
        inner.rule_order.retain(|r| *r != id);
        Ok(inner.rules.remove(&id).is_some())
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>> {
        Ok(self.read().rules.get(&id).cloned())
    }

    async fn list_rules(&self) -> Result<Vec<AutomationRule>> {
        let inner = self.read();
        Ok(inner
            .rule_order
            .iter()
            .filter_map(|id| inner.rules.get(id).cloned())
            .collect())
    }

    async fn active_rules(&self) -> Result<Vec<AutomationRule>> {
        let inner = self.read();
        Ok(inner
            .rule_order
            .iter()
            .filter_map(|id| inner.rules.get(id))
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CandidateStore for MemoryStore {
    async fn insert_candidate(&self, snapshot: &CandidateSnapshot) -> Result<()> {
        let mut inner = self.write();
        if inner.candidates.contains_key(&snapshot.id) {
            return Err(Error::BadRequest(format!(
                "candidate {} already exists",
                snapshot.id
            )));
        }
        inner.candidates.insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn snapshot(&self, id: Uuid) -> Result<Option<CandidateSnapshot>> {
        Ok(self.read().candidates.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: CandidateStatus, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.write();
        let candidate = inner
            .candidates
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("candidate {} not found", id)))?;
        candidate.status = status;
        candidate.last_status_change_at = at;
        Ok(())
    }

    async fn set_score(&self, id: Uuid, score_type: &str, value: f64) -> Result<()> {
        let mut inner = self.write();
        let candidate = inner
            .candidates
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("candidate {} not found", id)))?;
        candidate.scores.insert(score_type.to_string(), value);
        Ok(())
    }

    async fn candidate_ids(&self) -> Result<Vec<Uuid>> {
        let mut ids: Vec<_> = self.read().candidates.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append_transition(&self, transition: &StatusTransition) -> Result<()> {
        self.write().transitions.push(transition.clone());
        Ok(())
    }

    async fn history(&self, candidate_id: Uuid) -> Result<Vec<StatusTransition>> {
        let inner = self.read();
        let mut records: Vec<_> = inner
            .transitions
            .iter()
            .filter(|t| t.candidate_id == candidate_id)
            .cloned()
            .collect();
        records.sort_by_key(|t| t.changed_at);
        Ok(records)
    }

    async fn latest_transition(&self, candidate_id: Uuid) -> Result<Option<StatusTransition>> {
        Ok(self.history(candidate_id).await?.into_iter().next_back())
    }
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn insert_flow(&self, flow: &ApprovalFlow) -> Result<()> {
        let mut inner = self.write();
        inner.flow_order.push(flow.id);
        inner.flows.insert(flow.id, flow.clone());
        Ok(())
    }

    async fn flow_by_name(&self, name: &str) -> Result<Option<ApprovalFlow>> {
        Ok(self
            .read()
            .flows
            .values()
            .find(|f| f.name == name)
            .cloned())
    }

    async fn list_flows(&self) -> Result<Vec<ApprovalFlow>> {
        let inner = self.read();
        Ok(inner
            .flow_order
            .iter()
            .filter_map(|id| inner.flows.get(id).cloned())
            .collect())
    }

    async fn insert_request(&self, request: &ApprovalRequest) -> Result<()> {
        let mut inner = self.write();
        inner.request_order.push(request.id);
        inner.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<ApprovalRequest>> {
        Ok(self.read().requests.get(&id).cloned())
    }

    async fn update_request(&self, request: &ApprovalRequest) -> Result<()> {
        let mut inner = self.write();
        match inner.requests.get_mut(&request.id) {
            Some(existing) => {
                *existing = request.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "approval request {} not found",
                request.id
            ))),
        }
    }

    async fn pending_requests(&self) -> Result<Vec<ApprovalRequest>> {
        let inner = self.read();
        Ok(inner
            .request_order
            .iter()
            .filter_map(|id| inner.requests.get(id))
            .filter(|r| r.status == ApprovalStatus::Pending)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &ScheduledJob) -> Result<()> {
        self.write().jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn cancel_job(&self, key: &JobKey) -> Result<bool> {
        let mut inner = self.write();
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Pending && job.key() == *key {
                job.status = JobStatus::Cancelled;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn claim_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledJob>> {
        let mut inner = self.write();
        let mut due: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.due_at <= now)
            .map(|j| j.id)
            .collect();
        due.sort_by_key(|id| inner.jobs[id].due_at);
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(job) = inner.jobs.get_mut(&id) {
                job.status = JobStatus::Running;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn finish_job(&self, id: Uuid, status: JobStatus) -> Result<()> {
        let mut inner = self.write();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("scheduled job {} not found", id)))?;
        job.status = status;
        Ok(())
    }

    async fn try_mark_elapsed(
        &self,
        rule_id: Uuid,
        candidate_id: Uuid,
        baseline: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .write()
            .elapsed_marks
            .insert((rule_id, candidate_id, baseline)))
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn enqueue_delivery(
        &self,
        kind: &str,
        payload: &JsonValue,
        target_url: &str,
        max_attempts: i32,
    ) -> Result<Uuid> {
        let mut inner = self.write();
        let id = Uuid::new_v4();
        let now = Utc::now();
        inner.delivery_order.push(id);
        inner.deliveries.insert(
            id,
            DeliveryJob {
                id,
                kind: kind.to_string(),
                payload: payload.clone(),
                target_url: target_url.to_string(),
                http_status: None,
                response_body: None,
                attempts: 0,
                max_attempts,
                next_retry_at: None,
                status: DeliveryStatus::Pending,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn claim_next_delivery(&self, now: DateTime<Utc>) -> Result<Option<DeliveryJob>> {
        let inner = self.read();
        Ok(inner
            .delivery_order
            .iter()
            .filter_map(|id| inner.deliveries.get(id))
            .find(|d| {
                d.status == DeliveryStatus::Pending
                    && d.next_retry_at.map_or(true, |at| at <= now)
            })
            .cloned())
    }

    async fn store_delivery_result(
        &self,
        id: Uuid,
        attempts: i32,
        http_status: Option<i32>,
        response_body: &str,
        success: bool,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.write();
        let delivery = inner
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("delivery {} not found", id)))?;
        delivery.attempts = attempts;
        delivery.http_status = http_status;
        delivery.response_body = Some(response_body.to_string());
        delivery.next_retry_at = next_retry_at;
        delivery.status = if success {
            DeliveryStatus::Success
        } else if next_retry_at.is_some() {
            DeliveryStatus::Pending
        } else {
            DeliveryStatus::Failed
        };
        delivery.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl FailureStore for MemoryStore {
    async fn record_failure(&self, failure: &ExecutionFailure) -> Result<()> {
        self.write().failures.push(failure.clone());
        Ok(())
    }

    async fn list_failures(&self, limit: i64) -> Result<Vec<ExecutionFailure>> {
        let inner = self.read();
        Ok(inner
            .failures
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
