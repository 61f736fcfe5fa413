//! Rule engine: matches one event against the active rule set and emits the
//! actions of every rule whose trigger and conditions hold. Rules are
//! evaluated independently against the same snapshot, so no rule ever sees a
//! sibling's side effects within one dispatch — cascades happen through
//! fresh events.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::event::{ActionInvocation, PipelineEvent};
use crate::models::rule::Trigger;
use crate::services::eval_service;
use crate::store::Store;

#[derive(Clone)]
pub struct RuleEngine {
    store: Arc<dyn Store>,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Returns the matched actions in rule order, each action list in
    /// declaration order, tagged with the invocation tuple.
    pub async fn on_event(
        &self,
        event: &PipelineEvent,
        triggered_at: DateTime<Utc>,
    ) -> Result<Vec<ActionInvocation>> {
        let candidate_id = event.candidate_id();
        let Some(snapshot) = self.store.snapshot(candidate_id).await? else {
            warn!(candidate = %candidate_id, event = event.kind(), "event for unknown candidate dropped");
            return Ok(Vec::new());
        };
        let snapshot_value = snapshot.to_value()?;

        let mut invocations = Vec::new();
        for rule in self.store.active_rules().await? {
            if !trigger_matches(&rule.trigger, event, rule.id) {
                continue;
            }
            if let Trigger::ScoreThreshold {
                score_type,
                operator,
                threshold,
            } = &rule.trigger
            {
                let met = snapshot
                    .scores
                    .get(score_type)
                    .map(|actual| eval_service::compare_numbers(operator, *actual, *threshold))
                    .unwrap_or(false);
                if !met {
                    debug!(rule = %rule.name, score_type = %score_type, "score threshold not met");
                    continue;
                }
            }
            if !rule.conditions.iter().all(|condition| {
                let holds = eval_service::evaluate(condition, &snapshot_value);
                if !holds {
                    debug!(rule = %rule.name, field = %condition.field, "condition not met, rule skipped");
                }
                holds
            }) {
                continue;
            }

            debug!(rule = %rule.name, event = event.kind(), actions = rule.actions.len(), "rule matched");
            for (action_index, action) in rule.actions.iter().enumerate() {
                invocations.push(ActionInvocation {
                    rule_id: rule.id,
                    candidate_id,
                    action_index,
                    action: action.clone(),
                    triggered_at,
                });
            }
        }
        Ok(invocations)
    }
}

/// Shape-and-value matching between a trigger and an event. Unset
/// `status_change` fields are wildcards; a `time_elapsed` trigger only
/// matches the scan event generated for its own rule.
pub fn trigger_matches(trigger: &Trigger, event: &PipelineEvent, rule_id: Uuid) -> bool {
    match (trigger, event) {
        (
            Trigger::StatusChange { from, to },
            PipelineEvent::StatusChanged {
                from: event_from,
                to: event_to,
                ..
            },
        ) => {
            from.map_or(true, |want| *event_from == Some(want))
                && to.map_or(true, |want| *event_to == want)
        }
        (
            Trigger::TimeElapsed { .. },
            PipelineEvent::TimeElapsed {
                rule_id: event_rule,
                ..
            },
        ) => *event_rule == rule_id,
        (
            Trigger::ScoreThreshold { score_type, .. },
            PipelineEvent::ScoreUpdated {
                score_type: event_type,
                ..
            },
        ) => score_type == event_type,
        (Trigger::InterviewCompleted, PipelineEvent::InterviewCompleted { .. }) => true,
        (Trigger::ResumeUploaded, PipelineEvent::ResumeUploaded { .. }) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::approval::ApprovalPriority;
    use crate::models::candidate::{CandidateSnapshot, CandidateStatus, TransitionSource};
    use crate::models::rule::{
        Action, ActionKind, AutomationRule, Condition, ConditionOperator, TimeUnit,
    };
    use crate::store::{CandidateStore, MemoryStore, RuleStore};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn rule(name: &str, trigger: Trigger, conditions: Vec<Condition>, actions: Vec<Action>) -> AutomationRule {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        AutomationRule {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_active: true,
            trigger,
            conditions,
            actions,
            created_at: now,
            updated_at: now,
        }
    }

    async fn seeded_store() -> (Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let candidate_id = Uuid::new_v4();
        let mut scores = BTreeMap::new();
        scores.insert("exam".to_string(), 82.0);
        store
            .insert_candidate(&CandidateSnapshot {
                id: candidate_id,
                name: "Lin Screener".to_string(),
                status: CandidateStatus::PaperScreening,
                scores,
                skills: vec!["rust".to_string()],
                job_id: Some(7),
                profile: None,
                last_status_change_at: Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
            })
            .await
            .unwrap();
        (store, candidate_id)
    }

    #[test]
    fn status_change_wildcards_match_any_value() {
        let rule_id = Uuid::new_v4();
        let event = PipelineEvent::StatusChanged {
            candidate_id: Uuid::new_v4(),
            from: Some(CandidateStatus::ForReview),
            to: CandidateStatus::PaperScreening,
            source: TransitionSource::Manual,
        };

        let both_set = Trigger::StatusChange {
            from: Some(CandidateStatus::ForReview),
            to: Some(CandidateStatus::PaperScreening),
        };
        let only_to = Trigger::StatusChange {
            from: None,
            to: Some(CandidateStatus::PaperScreening),
        };
        let wrong_from = Trigger::StatusChange {
            from: Some(CandidateStatus::Exam),
            to: Some(CandidateStatus::PaperScreening),
        };
        assert!(trigger_matches(&both_set, &event, rule_id));
        assert!(trigger_matches(&only_to, &event, rule_id));
        assert!(!trigger_matches(&wrong_from, &event, rule_id));
    }

    #[test]
    fn time_elapsed_only_matches_its_own_rule() {
        let rule_id = Uuid::new_v4();
        let trigger = Trigger::TimeElapsed {
            value: 3,
            unit: TimeUnit::Days,
        };
        let own = PipelineEvent::TimeElapsed {
            candidate_id: Uuid::new_v4(),
            rule_id,
            in_status: CandidateStatus::Exam,
            since: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        };
        let foreign = PipelineEvent::TimeElapsed {
            candidate_id: Uuid::new_v4(),
            rule_id: Uuid::new_v4(),
            in_status: CandidateStatus::Exam,
            since: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        };
        assert!(trigger_matches(&trigger, &own, rule_id));
        assert!(!trigger_matches(&trigger, &foreign, rule_id));
    }

    #[tokio::test]
    async fn actions_come_out_in_declaration_order() {
        let (store, candidate_id) = seeded_store().await;
        let actions = vec![
            Action::immediate(ActionKind::AddNote {
                text: "screened".to_string(),
            }),
            Action::immediate(ActionKind::SendNotification {
                template: "screening_done".to_string(),
                recipients: vec!["hr".to_string()],
            }),
            Action::immediate(ActionKind::ChangeStatus {
                target: CandidateStatus::Exam,
            }),
        ];
        store
            .insert_rule(&rule(
                "advance after screening",
                Trigger::StatusChange {
                    from: None,
                    to: Some(CandidateStatus::PaperScreening),
                },
                vec![],
                actions,
            ))
            .await
            .unwrap();

        let engine = RuleEngine::new(store);
        let invocations = engine
            .on_event(
                &PipelineEvent::StatusChanged {
                    candidate_id,
                    from: Some(CandidateStatus::ForReview),
                    to: CandidateStatus::PaperScreening,
                    source: TransitionSource::Manual,
                },
                Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(invocations.len(), 3);
        assert_eq!(
            invocations.iter().map(|i| i.action_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(invocations[2].action.kind.kind(), "change_status");
    }

    #[tokio::test]
    async fn inactive_rules_are_skipped_entirely() {
        let (store, candidate_id) = seeded_store().await;
        let mut inactive = rule(
            "disabled",
            Trigger::StatusChange { from: None, to: None },
            vec![],
            vec![Action::immediate(ActionKind::AddNote {
                text: "never".to_string(),
            })],
        );
        inactive.is_active = false;
        store.insert_rule(&inactive).await.unwrap();

        let engine = RuleEngine::new(store);
        let invocations = engine
            .on_event(
                &PipelineEvent::StatusChanged {
                    candidate_id,
                    from: None,
                    to: CandidateStatus::Exam,
                    source: TransitionSource::Manual,
                },
                Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            )
            .await
            .unwrap();
        assert!(invocations.is_empty());
    }

    #[tokio::test]
    async fn conditions_gate_matched_triggers() {
        let (store, candidate_id) = seeded_store().await;
        store
            .insert_rule(&rule(
                "needs a very high score",
                Trigger::InterviewCompleted,
                vec![Condition {
                    field: "scores.exam".to_string(),
                    operator: ConditionOperator::GreaterThan,
                    value: json!(95),
                }],
                vec![Action::immediate(ActionKind::RequestApproval {
                    flow: "hire".to_string(),
                    requested_value: "HIRED".to_string(),
                    priority: ApprovalPriority::High,
                })],
            ))
            .await
            .unwrap();

        let engine = RuleEngine::new(store);
        let invocations = engine
            .on_event(
                &PipelineEvent::InterviewCompleted {
                    candidate_id,
                    interview_type: None,
                },
                Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            )
            .await
            .unwrap();
        assert!(invocations.is_empty());
    }

    #[tokio::test]
    async fn score_threshold_compares_the_snapshot_score() {
        let (store, candidate_id) = seeded_store().await;
        store
            .insert_rule(&rule(
                "exam passed",
                Trigger::ScoreThreshold {
                    score_type: "exam".to_string(),
                    operator: ConditionOperator::GreaterThan,
                    threshold: 75.0,
                },
                vec![],
                vec![Action::immediate(ActionKind::ChangeStatus {
                    target: CandidateStatus::HrInterview,
                })],
            ))
            .await
            .unwrap();
        store
            .insert_rule(&rule(
                "exam aced",
                Trigger::ScoreThreshold {
                    score_type: "exam".to_string(),
                    operator: ConditionOperator::GreaterThan,
                    threshold: 95.0,
                },
                vec![],
                vec![Action::immediate(ActionKind::AddNote {
                    text: "fast track".to_string(),
                })],
            ))
            .await
            .unwrap();

        let engine = RuleEngine::new(store);
        let invocations = engine
            .on_event(
                &PipelineEvent::ScoreUpdated {
                    candidate_id,
                    score_type: "exam".to_string(),
                },
                Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].action.kind.kind(), "change_status");
    }
}
