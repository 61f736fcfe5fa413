use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Pipeline stages a candidate moves through. A candidate has exactly one
/// current status at any instant; the terminal ones permit no further
/// automated transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateStatus {
    ForReview,
    PaperScreening,
    Exam,
    HrInterview,
    TechnicalInterview,
    FinalInterview,
    ForJobOffer,
    OfferExtended,
    Hired,
    Rejected,
    Withdrawn,
    OnHold,
}

impl CandidateStatus {
    pub const ALL: [CandidateStatus; 12] = [
        CandidateStatus::ForReview,
        CandidateStatus::PaperScreening,
        CandidateStatus::Exam,
        CandidateStatus::HrInterview,
        CandidateStatus::TechnicalInterview,
        CandidateStatus::FinalInterview,
        CandidateStatus::ForJobOffer,
        CandidateStatus::OfferExtended,
        CandidateStatus::Hired,
        CandidateStatus::Rejected,
        CandidateStatus::Withdrawn,
        CandidateStatus::OnHold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::ForReview => "FOR_REVIEW",
            CandidateStatus::PaperScreening => "PAPER_SCREENING",
            CandidateStatus::Exam => "EXAM",
            CandidateStatus::HrInterview => "HR_INTERVIEW",
            CandidateStatus::TechnicalInterview => "TECHNICAL_INTERVIEW",
            CandidateStatus::FinalInterview => "FINAL_INTERVIEW",
            CandidateStatus::ForJobOffer => "FOR_JOB_OFFER",
            CandidateStatus::OfferExtended => "OFFER_EXTENDED",
            CandidateStatus::Hired => "HIRED",
            CandidateStatus::Rejected => "REJECTED",
            CandidateStatus::Withdrawn => "WITHDRAWN",
            CandidateStatus::OnHold => "ON_HOLD",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == raw)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CandidateStatus::Hired | CandidateStatus::Rejected | CandidateStatus::Withdrawn
        )
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSource {
    Manual,
    Automated,
}

impl TransitionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionSource::Manual => "manual",
            TransitionSource::Automated => "automated",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "manual" => Some(TransitionSource::Manual),
            "automated" => Some(TransitionSource::Automated),
            _ => None,
        }
    }
}

/// One append-only row of the status ledger. `from_status` is `None` only for
/// the registration record that opens a candidate's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub from_status: Option<CandidateStatus>,
    pub to_status: CandidateStatus,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<String>,
    pub reason: Option<String>,
    pub source: TransitionSource,
    pub automation_rule_id: Option<Uuid>,
}

/// What the condition evaluator and trigger matching see of a candidate.
/// `last_status_change_at` is the baseline for time-elapsed triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSnapshot {
    pub id: Uuid,
    pub name: String,
    pub status: CandidateStatus,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub job_id: Option<i64>,
    pub profile: Option<JsonValue>,
    pub last_status_change_at: DateTime<Utc>,
}

impl CandidateSnapshot {
    /// JSON view used for condition field lookups (`scores.exam`, `skills`, ...).
    pub fn to_value(&self) -> crate::error::Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in CandidateStatus::ALL {
            assert_eq!(CandidateStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CandidateStatus::parse("NOT_A_STATUS"), None);
    }

    #[test]
    fn only_hired_rejected_withdrawn_are_terminal() {
        let terminal: Vec<_> = CandidateStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                &CandidateStatus::Hired,
                &CandidateStatus::Rejected,
                &CandidateStatus::Withdrawn
            ]
        );
    }
}
