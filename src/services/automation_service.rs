//! Front door of the automation core. Serializes all event processing for a
//! candidate behind a per-candidate mutex (acquisitions queue FIFO, so events
//! apply in submission order), runs the bounded cascade loop, and drives the
//! scheduler drain plus the periodic scans from the background loops in
//! `main`.

use chrono::Duration;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::approval::{ApprovalDecision, ApprovalRequest, ApprovalRequestType, ApprovalStatus};
use crate::models::candidate::{CandidateSnapshot, CandidateStatus, StatusTransition, TransitionSource};
use crate::models::event::{ActionInvocation, PipelineEvent};
use crate::models::scheduled_job::{ExecutionFailure, JobStatus};
use crate::services::approval_service::{ApprovalWorkflow, EscalationOutcome};
use crate::services::engine_service::RuleEngine;
use crate::services::executor_service::{ActionExecutor, Executed, ExecutorConfig};
use crate::services::ledger_service::StatusLedger;
use crate::services::scheduler_service::Scheduler;
use crate::store::Store;
use crate::utils::time::Clock;
use crate::models::approval::EscalationAction;

#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Upper bound on cascaded events processed per submitted event.
    pub max_cascade_depth: usize,
    /// Jobs drained per scheduler tick.
    pub scheduler_batch: i64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 8,
            scheduler_batch: 10,
        }
    }
}

/// What one event dispatch did, returned to API callers for observability.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DispatchSummary {
    pub matched_actions: usize,
    pub executed: usize,
    pub scheduled: usize,
    pub failed: usize,
    pub cascades: usize,
}

pub struct AutomationService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    engine: RuleEngine,
    executor: ActionExecutor,
    scheduler: Scheduler,
    ledger: StatusLedger,
    approvals: ApprovalWorkflow,
    config: AutomationConfig,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl AutomationService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        executor_config: ExecutorConfig,
        config: AutomationConfig,
    ) -> Self {
        let ledger = StatusLedger::new(store.clone(), clock.clone());
        let approvals = ApprovalWorkflow::new(store.clone(), clock.clone());
        let engine = RuleEngine::new(store.clone());
        let executor = ActionExecutor::new(
            store.clone(),
            ledger.clone(),
            approvals.clone(),
            executor_config,
        );
        let scheduler = Scheduler::new(store.clone(), clock.clone());
        Self {
            store,
            clock,
            engine,
            executor,
            scheduler,
            ledger,
            approvals,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &StatusLedger {
        &self.ledger
    }

    pub fn approvals(&self) -> &ApprovalWorkflow {
        &self.approvals
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    async fn candidate_lock(&self, candidate_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(candidate_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Registers a candidate and opens their ledger history. Registration is
    /// not an event; automation starts reacting from the first transition or
    /// external signal.
    pub async fn register_candidate(&self, snapshot: &CandidateSnapshot) -> Result<StatusTransition> {
        self.ledger.register(snapshot).await
    }

    /// Entry point for every event. Processing for the candidate is
    /// serialized; cross-candidate events run in parallel.
    pub async fn submit_event(&self, event: PipelineEvent) -> Result<DispatchSummary> {
        let lock = self.candidate_lock(event.candidate_id()).await;
        let _guard = lock.lock().await;
        self.process_locked(event).await
    }

    /// A manual transition through the exposed API: ledger write plus the
    /// resulting dispatch, both under the candidate lock so a concurrent
    /// automated cascade cannot interleave.
    pub async fn transition_candidate(
        &self,
        candidate_id: Uuid,
        to: CandidateStatus,
        changed_by: Option<String>,
        reason: Option<String>,
    ) -> Result<(StatusTransition, DispatchSummary)> {
        let lock = self.candidate_lock(candidate_id).await;
        let _guard = lock.lock().await;

        let record = self
            .ledger
            .transition(candidate_id, to, TransitionSource::Manual, changed_by, reason, None)
            .await?;
        let summary = self
            .process_locked(PipelineEvent::StatusChanged {
                candidate_id,
                from: record.from_status,
                to: record.to_status,
                source: TransitionSource::Manual,
            })
            .await?;
        Ok((record, summary))
    }

    /// Must hold the candidate lock. Drains the event plus any cascades it
    /// produces, up to the configured depth.
    async fn process_locked(&self, event: PipelineEvent) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();
        let mut queue = VecDeque::from([event]);
        let mut dispatched = 0usize;

        while let Some(event) = queue.pop_front() {
            if dispatched > self.config.max_cascade_depth {
                warn!(
                    candidate = %event.candidate_id(),
                    event = event.kind(),
                    depth = dispatched,
                    "cascade depth exceeded, dropping remaining events"
                );
                break;
            }
            dispatched += 1;
            if dispatched > 1 {
                summary.cascades += 1;
            }

            let triggered_at = self.clock.now();
            let invocations = self.engine.on_event(&event, triggered_at).await?;
            summary.matched_actions += invocations.len();

            let mut failed_rules: HashSet<Uuid> = HashSet::new();
            for invocation in invocations {
                // A non-retryable failure skips the rest of that rule's
                // actions; other rules from the same event still run.
                if failed_rules.contains(&invocation.rule_id) {
                    continue;
                }

                if let Some(delay) = invocation.action.delay_duration() {
                    let guard_status = self
                        .store
                        .snapshot(invocation.candidate_id)
                        .await?
                        .map(|s| s.status);
                    self.scheduler
                        .schedule(&invocation, triggered_at + delay, guard_status)
                        .await?;
                    summary.scheduled += 1;
                    continue;
                }

                match self.executor.execute(&invocation).await {
                    Executed::Done => summary.executed += 1,
                    Executed::Cascade(next) => {
                        summary.executed += 1;
                        queue.push_back(next);
                    }
                    Executed::Failed { retryable, error } => {
                        summary.failed += 1;
                        self.record_failure(&invocation, &error).await;
                        if !retryable {
                            failed_rules.insert(invocation.rule_id);
                        }
                    }
                }
            }
        }
        Ok(summary)
    }

    /// One scheduler tick: claim due jobs, re-validate each guard at fire
    /// time, execute survivors. Returns whether anything was due, so the
    /// worker loop can idle.
    pub async fn run_scheduler_once(&self) -> Result<bool> {
        let jobs = self.scheduler.claim_due(self.config.scheduler_batch).await?;
        if jobs.is_empty() {
            return Ok(false);
        }

        for job in jobs {
            let lock = self.candidate_lock(job.candidate_id).await;
            let _guard = lock.lock().await;

            let current = self
                .store
                .snapshot(job.candidate_id)
                .await?
                .map(|s| s.status);
            if let Some(guard_status) = job.guard_status {
                if current != Some(guard_status) {
                    info!(
                        job = %job.id,
                        candidate = %job.candidate_id,
                        expected = %guard_status,
                        "guard no longer holds at fire time, scheduled action cancelled"
                    );
                    self.scheduler.finish(job.id, JobStatus::Cancelled).await?;
                    continue;
                }
            }

            let invocation = job.invocation();
            match self.executor.execute(&invocation).await {
                Executed::Done => {
                    self.scheduler.finish(job.id, JobStatus::Done).await?;
                }
                Executed::Cascade(event) => {
                    self.scheduler.finish(job.id, JobStatus::Done).await?;
                    self.process_locked(event).await?;
                }
                Executed::Failed { error, .. } => {
                    self.record_failure(&invocation, &error).await;
                    self.scheduler.finish(job.id, JobStatus::Failed).await?;
                }
            }
        }
        Ok(true)
    }

    /// Periodic time-elapsed scan; each hit is submitted as a first-class
    /// event.
    pub async fn run_elapsed_scan(&self) -> Result<usize> {
        let events = self.scheduler.scan_time_elapsed().await?;
        let fired = events.len();
        for event in events {
            self.submit_event(event).await?;
        }
        Ok(fired)
    }

    /// Periodic escalation scan; terminal outcomes feed back like any other
    /// approval resolution.
    pub async fn run_escalation_scan(&self) -> Result<usize> {
        let outcomes = self.approvals.escalate_overdue().await?;
        let count = outcomes.len();
        for EscalationOutcome { request, applied } in outcomes {
            if applied == EscalationAction::NotifyAdmin {
                let payload = serde_json::json!({
                    "request_id": request.id,
                    "candidate_id": request.candidate_id,
                    "requested_value": request.requested_value,
                    "priority": request.priority,
                    "pending_since": request.current_step().and_then(|s| s.entered_at),
                });
                self.store
                    .enqueue_delivery(
                        "approval_escalation",
                        &payload,
                        &self.executor.config().notification_url,
                        self.executor.config().delivery_max_attempts,
                    )
                    .await?;
            }
            if request.is_terminal() {
                self.apply_approval_outcome(&request).await?;
            }
        }
        Ok(count)
    }

    /// Resolves an approval step on behalf of an approver and, when that
    /// resolution is terminal, feeds the outcome back into the pipeline.
    pub async fn resolve_approval(
        &self,
        request_id: Uuid,
        step_id: Uuid,
        decision: ApprovalDecision,
        approver_id: &str,
        approver_role: &str,
        comments: Option<String>,
    ) -> Result<ApprovalRequest> {
        let request = self
            .approvals
            .resolve_step(request_id, step_id, decision, approver_id, approver_role, comments)
            .await?;
        if request.is_terminal() {
            self.apply_approval_outcome(&request).await?;
        }
        Ok(request)
    }

    /// An approved status-change request applies its transition through the
    /// ledger (cascading as usual); every terminal outcome then re-enters the
    /// engine as an `approval_resolved` event.
    async fn apply_approval_outcome(&self, request: &ApprovalRequest) -> Result<()> {
        let approved = request.status == ApprovalStatus::Approved;

        if approved && request.request_type == ApprovalRequestType::StatusChange {
            if let Some(target) = CandidateStatus::parse(&request.requested_value) {
                let lock = self.candidate_lock(request.candidate_id).await;
                let _guard = lock.lock().await;
                match self
                    .ledger
                    .transition(
                        request.candidate_id,
                        target,
                        TransitionSource::Automated,
                        Some(format!("approval:{}", request.id)),
                        None,
                        None,
                    )
                    .await
                {
                    Ok(record) => {
                        self.process_locked(PipelineEvent::StatusChanged {
                            candidate_id: request.candidate_id,
                            from: record.from_status,
                            to: record.to_status,
                            source: TransitionSource::Automated,
                        })
                        .await?;
                    }
                    Err(Error::InvalidTransition(message)) => {
                        warn!(
                            request = %request.id,
                            candidate = %request.candidate_id,
                            "approved transition no longer applies: {}",
                            message
                        );
                        let failure = ExecutionFailure {
                            id: Uuid::new_v4(),
                            rule_id: None,
                            candidate_id: request.candidate_id,
                            action_index: 0,
                            error: format!("approval {}: {}", request.id, message),
                            occurred_at: self.clock.now(),
                        };
                        if let Err(err) = self.store.record_failure(&failure).await {
                            error!(error = ?err, "failed to record approval failure");
                        }
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        self.submit_event(PipelineEvent::ApprovalResolved {
            candidate_id: request.candidate_id,
            request_id: request.id,
            approved,
        })
        .await?;
        Ok(())
    }

    async fn record_failure(&self, invocation: &ActionInvocation, message: &str) {
        error!(
            rule = %invocation.rule_id,
            candidate = %invocation.candidate_id,
            action = invocation.action.kind.kind(),
            "action failed: {}",
            message
        );
        let failure = ExecutionFailure {
            id: Uuid::new_v4(),
            rule_id: Some(invocation.rule_id),
            candidate_id: invocation.candidate_id,
            action_index: invocation.action_index as i32,
            error: message.to_string(),
            occurred_at: self.clock.now(),
        };
        if let Err(err) = self.store.record_failure(&failure).await {
            error!(error = ?err, "failed to record execution failure");
        }
    }

    /// Stuck-candidate helper for the operator API: how long the candidate
    /// has been in their current status.
    pub async fn time_in_status(&self, candidate_id: Uuid) -> Result<Duration> {
        let snapshot = self
            .store
            .snapshot(candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("candidate {} not found", candidate_id)))?;
        Ok(self.clock.now() - snapshot.last_status_change_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::approval::{ApprovalPriority, ApproverSpec, StepDefinition};
    use crate::models::rule::{Action, ActionKind, AutomationRule, TimeUnit, Trigger};
    use crate::store::{FailureStore, MemoryStore, RuleStore};
    use crate::utils::time::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn setup() -> (Arc<AutomationService>, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        let executor_config = ExecutorConfig {
            collaborator_base_url: "http://collaborators.internal".to_string(),
            notification_url: "http://notifications.internal/hook".to_string(),
            delivery_max_attempts: 3,
        };
        let service = Arc::new(AutomationService::new(
            store.clone(),
            clock.clone(),
            executor_config,
            AutomationConfig {
                max_cascade_depth: 4,
                scheduler_batch: 10,
            },
        ));
        (service, store, clock)
    }

    async fn seed_candidate(service: &AutomationService, clock: &ManualClock) -> Uuid {
        let id = Uuid::new_v4();
        service
            .register_candidate(&CandidateSnapshot {
                id,
                name: "Pat Pipeline".to_string(),
                status: CandidateStatus::ForReview,
                scores: BTreeMap::new(),
                skills: vec![],
                job_id: None,
                profile: None,
                last_status_change_at: clock.now(),
            })
            .await
            .unwrap();
        id
    }

    fn rule(trigger: Trigger, actions: Vec<Action>, clock: &ManualClock) -> AutomationRule {
        AutomationRule {
            id: Uuid::new_v4(),
            name: "test rule".to_string(),
            is_active: true,
            trigger,
            conditions: vec![],
            actions,
            created_at: clock.now(),
            updated_at: clock.now(),
        }
    }

    #[tokio::test]
    async fn delayed_action_schedules_fires_and_cascades() {
        let (service, store, clock) = setup();
        let candidate_id = seed_candidate(&service, &clock).await;

        store
            .insert_rule(&rule(
                Trigger::StatusChange {
                    from: Some(CandidateStatus::ForReview),
                    to: Some(CandidateStatus::PaperScreening),
                },
                vec![Action {
                    kind: ActionKind::ChangeStatus {
                        target: CandidateStatus::OfferExtended,
                    },
                    delay: Some(1),
                    delay_unit: Some(TimeUnit::Hours),
                }],
                &clock,
            ))
            .await
            .unwrap();
        store
            .insert_rule(&rule(
                Trigger::StatusChange {
                    from: None,
                    to: Some(CandidateStatus::OfferExtended),
                },
                vec![Action::immediate(ActionKind::SendNotification {
                    template: "offer_extended".to_string(),
                    recipients: vec!["recruiter".to_string()],
                })],
                &clock,
            ))
            .await
            .unwrap();

        let (_, summary) = service
            .transition_candidate(candidate_id, CandidateStatus::PaperScreening, None, None)
            .await
            .unwrap();
        assert_eq!(summary.scheduled, 1);
        assert_eq!(store.pending_jobs_for(candidate_id).len(), 1);

        // Not due yet.
        assert!(!service.run_scheduler_once().await.unwrap());

        clock.advance(Duration::minutes(61));
        assert!(service.run_scheduler_once().await.unwrap());

        let status = service.ledger().current_status(candidate_id).await.unwrap();
        assert_eq!(status, CandidateStatus::OfferExtended);
        let history = service.ledger().history_of(candidate_id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].source, TransitionSource::Automated);

        // The cascade reached the second rule, which queued a notification.
        let deliveries = store.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].kind, "notification");
    }

    #[tokio::test]
    async fn stale_guard_turns_a_fired_job_into_a_noop() {
        let (service, store, clock) = setup();
        let candidate_id = seed_candidate(&service, &clock).await;

        let delayed = rule(
            Trigger::StatusChange {
                from: Some(CandidateStatus::ForReview),
                to: Some(CandidateStatus::PaperScreening),
            },
            vec![Action {
                kind: ActionKind::ChangeStatus {
                    target: CandidateStatus::OfferExtended,
                },
                delay: Some(1),
                delay_unit: Some(TimeUnit::Hours),
            }],
            &clock,
        );
        store.insert_rule(&delayed).await.unwrap();

        service
            .transition_candidate(candidate_id, CandidateStatus::PaperScreening, None, None)
            .await
            .unwrap();
        assert_eq!(store.pending_jobs_for(candidate_id).len(), 1);

        // Rule deactivated and the candidate moves on before the job fires.
        let mut deactivated = delayed.clone();
        deactivated.is_active = false;
        store.update_rule(&deactivated).await.unwrap();
        service
            .transition_candidate(candidate_id, CandidateStatus::Exam, None, None)
            .await
            .unwrap();

        clock.advance(Duration::hours(2));
        assert!(service.run_scheduler_once().await.unwrap());

        // No throw, no transition: the guard re-check cancelled the job.
        assert_eq!(
            service.ledger().current_status(candidate_id).await.unwrap(),
            CandidateStatus::Exam
        );
        assert!(store.pending_jobs_for(candidate_id).is_empty());
        assert!(store.list_failures(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_events_keep_one_consistent_status_chain() {
        let (service, _store, clock) = setup();
        let candidate_id = seed_candidate(&service, &clock).await;

        let a = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .transition_candidate(candidate_id, CandidateStatus::PaperScreening, None, None)
                    .await
            })
        };
        let b = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .transition_candidate(candidate_id, CandidateStatus::Exam, None, None)
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let history = service.ledger().history_of(candidate_id).await.unwrap();
        assert_eq!(history.len(), 3);
        for pair in history.windows(2) {
            assert_eq!(pair[1].from_status, Some(pair[0].to_status));
        }
        assert_eq!(
            service.ledger().current_status(candidate_id).await.unwrap(),
            history.last().unwrap().to_status
        );
    }

    #[tokio::test]
    async fn mutually_triggering_rules_are_cut_off_at_the_depth_bound() {
        let (service, store, clock) = setup();
        let candidate_id = seed_candidate(&service, &clock).await;

        store
            .insert_rule(&rule(
                Trigger::StatusChange {
                    from: None,
                    to: Some(CandidateStatus::Exam),
                },
                vec![Action::immediate(ActionKind::ChangeStatus {
                    target: CandidateStatus::HrInterview,
                })],
                &clock,
            ))
            .await
            .unwrap();
        store
            .insert_rule(&rule(
                Trigger::StatusChange {
                    from: None,
                    to: Some(CandidateStatus::HrInterview),
                },
                vec![Action::immediate(ActionKind::ChangeStatus {
                    target: CandidateStatus::Exam,
                })],
                &clock,
            ))
            .await
            .unwrap();

        let (_, summary) = service
            .transition_candidate(candidate_id, CandidateStatus::Exam, None, None)
            .await
            .unwrap();
        // The ping-pong terminates instead of looping forever.
        assert!(summary.cascades <= 4);
        let history = service.ledger().history_of(candidate_id).await.unwrap();
        assert!(history.len() <= 7);
    }

    #[tokio::test]
    async fn approved_status_change_request_applies_the_transition() {
        let (service, _store, clock) = setup();
        let candidate_id = seed_candidate(&service, &clock).await;

        service
            .approvals()
            .create_flow(
                "hire".to_string(),
                crate::models::approval::ApprovalRequestType::StatusChange,
                vec![StepDefinition {
                    approver: ApproverSpec::Role {
                        role: "hr_manager".to_string(),
                    },
                    is_required: true,
                }],
                None,
            )
            .await
            .unwrap();
        let request = service
            .approvals()
            .create_request(candidate_id, "hire", "HIRED", "recruiter", ApprovalPriority::High)
            .await
            .unwrap();

        let resolved = service
            .resolve_approval(
                request.id,
                request.steps[0].id,
                ApprovalDecision::Approved,
                "maria",
                "hr_manager",
                Some("green light".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(
            service.ledger().current_status(candidate_id).await.unwrap(),
            CandidateStatus::Hired
        );
        let history = service.ledger().history_of(candidate_id).await.unwrap();
        assert_eq!(
            history.last().unwrap().changed_by.as_deref(),
            Some(format!("approval:{}", request.id).as_str())
        );
    }
}
