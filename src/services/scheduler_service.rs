//! Durable timers. Delayed actions become `scheduled_jobs` rows instead of
//! in-memory timers, so a restart loses nothing; time-elapsed triggers are
//! found by a periodic scan against each candidate's status baseline rather
//! than one-shot timers, because the baseline moves whenever the candidate
//! does.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::models::candidate::CandidateStatus;
use crate::models::event::{ActionInvocation, PipelineEvent};
use crate::models::rule::Trigger;
use crate::models::scheduled_job::{JobKey, JobStatus, ScheduledJob};
use crate::store::Store;
use crate::utils::time::Clock;

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Persists one delayed action, keyed by the invocation tuple so a
    /// re-dispatch of the same match cannot enqueue it twice.
    pub async fn schedule(
        &self,
        invocation: &ActionInvocation,
        due_at: DateTime<Utc>,
        guard_status: Option<CandidateStatus>,
    ) -> Result<ScheduledJob> {
        let job = ScheduledJob {
            id: Uuid::new_v4(),
            rule_id: invocation.rule_id,
            candidate_id: invocation.candidate_id,
            action_index: invocation.action_index as i32,
            triggered_at: invocation.triggered_at,
            due_at,
            guard_status,
            action: invocation.action.clone(),
            status: JobStatus::Pending,
            created_at: self.clock.now(),
        };
        self.store.insert_job(&job).await?;
        info!(
            candidate = %job.candidate_id,
            rule = %job.rule_id,
            due_at = %due_at,
            action = job.action.kind.kind(),
            "action deferred"
        );
        Ok(job)
    }

    pub async fn cancel(&self, key: &JobKey) -> Result<bool> {
        self.store.cancel_job(key).await
    }

    /// Due pending jobs, each claimed exactly once. The caller still
    /// re-validates every job's guard before executing.
    pub async fn claim_due(&self, limit: i64) -> Result<Vec<ScheduledJob>> {
        self.store.claim_due_jobs(self.clock.now(), limit).await
    }

    pub async fn finish(&self, id: Uuid, status: JobStatus) -> Result<()> {
        self.store.finish_job(id, status).await
    }

    /// Periodic scan for `time_elapsed` triggers: emits one event per
    /// `(rule, candidate, baseline)` the first time the configured span has
    /// passed. Terminal candidates never fire.
    pub async fn scan_time_elapsed(&self) -> Result<Vec<PipelineEvent>> {
        let now = self.clock.now();
        let elapsed_rules: Vec<(Uuid, chrono::Duration)> = self
            .store
            .active_rules()
            .await?
            .into_iter()
            .filter_map(|rule| match rule.trigger {
                Trigger::TimeElapsed { value, unit } => Some((rule.id, unit.duration(value))),
                _ => None,
            })
            .collect();
        if elapsed_rules.is_empty() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for candidate_id in self.store.candidate_ids().await? {
            let Some(snapshot) = self.store.snapshot(candidate_id).await? else {
                continue;
            };
            if snapshot.status.is_terminal() {
                continue;
            }
            let waited = now - snapshot.last_status_change_at;
            for (rule_id, threshold) in &elapsed_rules {
                if waited < *threshold {
                    continue;
                }
                if self
                    .store
                    .try_mark_elapsed(*rule_id, candidate_id, snapshot.last_status_change_at)
                    .await?
                {
                    debug!(candidate = %candidate_id, rule = %rule_id, "time elapsed in status");
                    events.push(PipelineEvent::TimeElapsed {
                        candidate_id,
                        rule_id: *rule_id,
                        in_status: snapshot.status,
                        since: snapshot.last_status_change_at,
                    });
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::candidate::CandidateSnapshot;
    use crate::models::rule::{Action, ActionKind, AutomationRule, TimeUnit};
    use crate::store::{CandidateStore, MemoryStore, RuleStore};
    use crate::utils::time::ManualClock;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn setup() -> (Scheduler, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        (Scheduler::new(store.clone(), clock.clone()), store, clock)
    }

    fn invocation(candidate_id: Uuid, at: DateTime<Utc>) -> ActionInvocation {
        ActionInvocation {
            rule_id: Uuid::new_v4(),
            candidate_id,
            action_index: 0,
            action: Action {
                kind: ActionKind::ChangeStatus {
                    target: CandidateStatus::OfferExtended,
                },
                delay: Some(1),
                delay_unit: Some(TimeUnit::Hours),
            },
            triggered_at: at,
        }
    }

    #[tokio::test]
    async fn jobs_claim_exactly_once_when_due() {
        let (scheduler, _store, clock) = setup();
        let candidate_id = Uuid::new_v4();
        let inv = invocation(candidate_id, clock.now());
        scheduler
            .schedule(&inv, clock.now() + Duration::hours(1), Some(CandidateStatus::Exam))
            .await
            .unwrap();

        assert!(scheduler.claim_due(10).await.unwrap().is_empty());

        clock.advance(Duration::minutes(61));
        let claimed = scheduler.claim_due(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].guard_status, Some(CandidateStatus::Exam));

        // Once claimed the job is running, not pending; a second drain sees nothing.
        assert!(scheduler.claim_due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_jobs_never_fire() {
        let (scheduler, _store, clock) = setup();
        let inv = invocation(Uuid::new_v4(), clock.now());
        let job = scheduler
            .schedule(&inv, clock.now() + Duration::hours(1), None)
            .await
            .unwrap();
        assert!(scheduler.cancel(&job.key()).await.unwrap());

        clock.advance(Duration::hours(2));
        assert!(scheduler.claim_due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn elapsed_scan_fires_once_per_baseline() {
        let (scheduler, store, clock) = setup();
        let candidate_id = Uuid::new_v4();
        store
            .insert_candidate(&CandidateSnapshot {
                id: candidate_id,
                name: "Slow Mover".to_string(),
                status: CandidateStatus::Exam,
                scores: BTreeMap::new(),
                skills: vec![],
                job_id: None,
                profile: None,
                last_status_change_at: clock.now(),
            })
            .await
            .unwrap();
        let rule = AutomationRule {
            id: Uuid::new_v4(),
            name: "nudge after 2 days".to_string(),
            is_active: true,
            trigger: Trigger::TimeElapsed {
                value: 2,
                unit: TimeUnit::Days,
            },
            conditions: vec![],
            actions: vec![Action::immediate(ActionKind::SendNotification {
                template: "stalled".to_string(),
                recipients: vec!["recruiter".to_string()],
            })],
            created_at: clock.now(),
            updated_at: clock.now(),
        };
        store.insert_rule(&rule).await.unwrap();

        assert!(scheduler.scan_time_elapsed().await.unwrap().is_empty());

        clock.advance(Duration::days(2) + Duration::minutes(1));
        let events = scheduler.scan_time_elapsed().await.unwrap();
        assert_eq!(events.len(), 1);

        // Same baseline: subsequent scans stay quiet.
        clock.advance(Duration::hours(6));
        assert!(scheduler.scan_time_elapsed().await.unwrap().is_empty());

        // A status change resets the baseline and re-arms the trigger.
        store
            .set_status(candidate_id, CandidateStatus::HrInterview, clock.now())
            .await
            .unwrap();
        clock.advance(Duration::days(2) + Duration::minutes(1));
        assert_eq!(scheduler.scan_time_elapsed().await.unwrap().len(), 1);
    }
}
