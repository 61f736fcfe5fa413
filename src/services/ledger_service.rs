//! The status ledger: the single source of truth for a candidate's current
//! pipeline stage. All writes funnel through `transition`; the ledger itself
//! never triggers automation — cascading is the caller's job.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::candidate::{CandidateSnapshot, CandidateStatus, StatusTransition, TransitionSource};
use crate::store::Store;
use crate::utils::time::Clock;

#[derive(Clone)]
pub struct StatusLedger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl StatusLedger {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Registers a candidate and opens their history with an initial record.
    pub async fn register(&self, snapshot: &CandidateSnapshot) -> Result<StatusTransition> {
        self.store.insert_candidate(snapshot).await?;
        let record = StatusTransition {
            id: Uuid::new_v4(),
            candidate_id: snapshot.id,
            from_status: None,
            to_status: snapshot.status,
            changed_at: snapshot.last_status_change_at,
            changed_by: None,
            reason: Some("registered".to_string()),
            source: TransitionSource::Manual,
            automation_rule_id: None,
        };
        self.store.append_transition(&record).await?;
        Ok(record)
    }

    /// Moves a candidate to `to`. No-op transitions and transitions out of a
    /// terminal status are rejected, never silently ignored.
    pub async fn transition(
        &self,
        candidate_id: Uuid,
        to: CandidateStatus,
        source: TransitionSource,
        changed_by: Option<String>,
        reason: Option<String>,
        automation_rule_id: Option<Uuid>,
    ) -> Result<StatusTransition> {
        let snapshot = self
            .store
            .snapshot(candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("candidate {} not found", candidate_id)))?;
        let current = snapshot.status;

        if current == to {
            return Err(Error::InvalidTransition(format!(
                "candidate {} is already in status {}",
                candidate_id, current
            )));
        }
        if current.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "candidate {} is in terminal status {} and cannot move to {}",
                candidate_id, current, to
            )));
        }

        let now = self.clock.now();
        let record = StatusTransition {
            id: Uuid::new_v4(),
            candidate_id,
            from_status: Some(current),
            to_status: to,
            changed_at: now,
            changed_by,
            reason,
            source,
            automation_rule_id,
        };
        self.store.append_transition(&record).await?;
        self.store.set_status(candidate_id, to, now).await?;

        info!(
            candidate = %candidate_id,
            from = %current,
            to = %to,
            source = source.as_str(),
            "status transition"
        );
        Ok(record)
    }

    pub async fn history_of(&self, candidate_id: Uuid) -> Result<Vec<StatusTransition>> {
        self.store.history(candidate_id).await
    }

    pub async fn current_status(&self, candidate_id: Uuid) -> Result<CandidateStatus> {
        let snapshot = self
            .store
            .snapshot(candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("candidate {} not found", candidate_id)))?;
        Ok(snapshot.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CandidateStore, MemoryStore};
    use crate::utils::time::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn fixtures() -> (StatusLedger, Arc<MemoryStore>, Arc<ManualClock>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        let ledger = StatusLedger::new(store.clone(), clock.clone());
        (ledger, store, clock, Uuid::new_v4())
    }

    fn snapshot(id: Uuid, clock: &ManualClock) -> CandidateSnapshot {
        CandidateSnapshot {
            id,
            name: "Grace Tester".to_string(),
            status: CandidateStatus::ForReview,
            scores: BTreeMap::new(),
            skills: vec![],
            job_id: None,
            profile: None,
            last_status_change_at: clock.now(),
        }
    }

    #[tokio::test]
    async fn history_tracks_an_ordered_chain_with_one_current_status() {
        let (ledger, store, clock, id) = fixtures();
        ledger.register(&snapshot(id, &clock)).await.unwrap();

        clock.advance(Duration::minutes(5));
        ledger
            .transition(id, CandidateStatus::PaperScreening, TransitionSource::Manual, None, None, None)
            .await
            .unwrap();
        clock.advance(Duration::minutes(5));
        ledger
            .transition(id, CandidateStatus::Exam, TransitionSource::Automated, None, None, None)
            .await
            .unwrap();

        let history = ledger.history_of(id).await.unwrap();
        assert_eq!(history.len(), 3);
        for pair in history.windows(2) {
            assert_eq!(pair[1].from_status, Some(pair[0].to_status));
        }
        let current = ledger.current_status(id).await.unwrap();
        assert_eq!(current, history.last().unwrap().to_status);
        assert_eq!(current, CandidateStatus::Exam);
        assert_eq!(
            store.snapshot(id).await.unwrap().unwrap().status,
            CandidateStatus::Exam
        );
    }

    #[tokio::test]
    async fn noop_transition_is_rejected() {
        let (ledger, _store, clock, id) = fixtures();
        ledger.register(&snapshot(id, &clock)).await.unwrap();

        let err = ledger
            .transition(id, CandidateStatus::ForReview, TransitionSource::Manual, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
        assert_eq!(ledger.history_of(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_status_permits_no_further_transition() {
        let (ledger, _store, clock, id) = fixtures();
        ledger.register(&snapshot(id, &clock)).await.unwrap();
        ledger
            .transition(id, CandidateStatus::Hired, TransitionSource::Manual, None, None, None)
            .await
            .unwrap();

        let err = ledger
            .transition(id, CandidateStatus::OnHold, TransitionSource::Automated, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn unknown_candidate_is_not_found() {
        let (ledger, _store, _clock, id) = fixtures();
        let err = ledger
            .transition(id, CandidateStatus::Exam, TransitionSource::Manual, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
