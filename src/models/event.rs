use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::candidate::{CandidateStatus, TransitionSource};
use super::rule::Action;
use super::scheduled_job::JobKey;

/// Everything the rule engine reacts to. Ledger writes, elapsed-time scans
/// and approval outcomes re-enter through the same type as external signals,
/// so cascades stay observable instead of being recursive calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StatusChanged {
        candidate_id: Uuid,
        from: Option<CandidateStatus>,
        to: CandidateStatus,
        source: TransitionSource,
    },
    TimeElapsed {
        candidate_id: Uuid,
        rule_id: Uuid,
        in_status: CandidateStatus,
        since: DateTime<Utc>,
    },
    ScoreUpdated {
        candidate_id: Uuid,
        score_type: String,
    },
    InterviewCompleted {
        candidate_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interview_type: Option<String>,
    },
    ResumeUploaded {
        candidate_id: Uuid,
    },
    ApprovalResolved {
        candidate_id: Uuid,
        request_id: Uuid,
        approved: bool,
    },
}

impl PipelineEvent {
    pub fn candidate_id(&self) -> Uuid {
        match self {
            PipelineEvent::StatusChanged { candidate_id, .. }
            | PipelineEvent::TimeElapsed { candidate_id, .. }
            | PipelineEvent::ScoreUpdated { candidate_id, .. }
            | PipelineEvent::InterviewCompleted { candidate_id, .. }
            | PipelineEvent::ResumeUploaded { candidate_id }
            | PipelineEvent::ApprovalResolved { candidate_id, .. } => *candidate_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::StatusChanged { .. } => "status_changed",
            PipelineEvent::TimeElapsed { .. } => "time_elapsed",
            PipelineEvent::ScoreUpdated { .. } => "score_updated",
            PipelineEvent::InterviewCompleted { .. } => "interview_completed",
            PipelineEvent::ResumeUploaded { .. } => "resume_uploaded",
            PipelineEvent::ApprovalResolved { .. } => "approval_resolved",
        }
    }
}

/// One action of one matched rule, tagged with the tuple that identifies its
/// execution exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub rule_id: Uuid,
    pub candidate_id: Uuid,
    pub action_index: usize,
    pub action: Action,
    pub triggered_at: DateTime<Utc>,
}

impl ActionInvocation {
    pub fn job_key(&self) -> JobKey {
        JobKey {
            rule_id: self.rule_id,
            candidate_id: self.candidate_id,
            action_index: self.action_index as i32,
            triggered_at: self.triggered_at,
        }
    }
}
