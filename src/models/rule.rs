use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::approval::ApprovalPriority;
use super::candidate::CandidateStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn duration(&self, value: i64) -> Duration {
        match self {
            TimeUnit::Minutes => Duration::minutes(value),
            TimeUnit::Hours => Duration::hours(value),
            TimeUnit::Days => Duration::days(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    GreaterThan,
    LessThan,
    Equals,
    Contains,
}

/// Extra predicate over the candidate snapshot; all conditions on a rule must
/// hold for its actions to fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: JsonValue,
}

/// The event shape that makes a rule eligible. Unset `status_change` fields
/// act as wildcards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    StatusChange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<CandidateStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<CandidateStatus>,
    },
    TimeElapsed {
        value: i64,
        unit: TimeUnit,
    },
    ScoreThreshold {
        score_type: String,
        operator: ConditionOperator,
        threshold: f64,
    },
    InterviewCompleted,
    ResumeUploaded,
}

fn default_priority() -> ApprovalPriority {
    ApprovalPriority::Normal
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    ChangeStatus {
        target: CandidateStatus,
    },
    SendNotification {
        template: String,
        recipients: Vec<String>,
    },
    ScheduleInterview {
        interview_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interviewer: Option<String>,
    },
    AddNote {
        text: String,
    },
    AssignJob {
        job_id: i64,
    },
    RequestApproval {
        flow: String,
        requested_value: String,
        #[serde(default = "default_priority")]
        priority: ApprovalPriority,
    },
}

impl ActionKind {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionKind::ChangeStatus { .. } => "change_status",
            ActionKind::SendNotification { .. } => "send_notification",
            ActionKind::ScheduleInterview { .. } => "schedule_interview",
            ActionKind::AddNote { .. } => "add_note",
            ActionKind::AssignJob { .. } => "assign_job",
            ActionKind::RequestApproval { .. } => "request_approval",
        }
    }
}

/// An effect a rule causes. `delay` defers execution through the scheduler;
/// without `delay_unit` the value is taken as minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_unit: Option<TimeUnit>,
}

impl Action {
    pub fn immediate(kind: ActionKind) -> Self {
        Self {
            kind,
            delay: None,
            delay_unit: None,
        }
    }

    pub fn delay_duration(&self) -> Option<Duration> {
        let value = self.delay?;
        Some(self.delay_unit.unwrap_or(TimeUnit::Minutes).duration(value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub trigger: Trigger,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_json_uses_type_tags() {
        let trigger: Trigger = serde_json::from_value(json!({
            "type": "status_change",
            "to": "PAPER_SCREENING"
        }))
        .unwrap();
        assert_eq!(
            trigger,
            Trigger::StatusChange {
                from: None,
                to: Some(CandidateStatus::PaperScreening)
            }
        );

        let unit: Trigger = serde_json::from_value(json!({ "type": "resume_uploaded" })).unwrap();
        assert_eq!(unit, Trigger::ResumeUploaded);
    }

    #[test]
    fn action_delay_flattens_next_to_the_kind() {
        let action: Action = serde_json::from_value(json!({
            "type": "change_status",
            "target": "OFFER_EXTENDED",
            "delay": 1,
            "delay_unit": "hours"
        }))
        .unwrap();
        assert_eq!(action.delay_duration(), Some(Duration::hours(1)));
        assert_eq!(
            action.kind,
            ActionKind::ChangeStatus {
                target: CandidateStatus::OfferExtended
            }
        );
    }

    #[test]
    fn delay_without_unit_defaults_to_minutes() {
        let action = Action {
            kind: ActionKind::AddNote {
                text: "ping".into(),
            },
            delay: Some(15),
            delay_unit: None,
        };
        assert_eq!(action.delay_duration(), Some(Duration::minutes(15)));
    }
}
