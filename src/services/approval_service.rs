//! Ordered, role-based sign-off. A request walks its steps strictly in
//! order; rejecting a required step short-circuits the whole request, and a
//! stalled step is resolved by the flow's escalation rule instead of being
//! silently dropped.

use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::approval::{
    ApprovalComment, ApprovalDecision, ApprovalFlow, ApprovalPriority, ApprovalRequest,
    ApprovalRequestType, ApprovalStatus, ApprovalStep, ApproverSpec, EscalationAction,
    EscalationRule, StepDefinition, StepStatus,
};
use crate::models::candidate::CandidateStatus;
use crate::store::Store;
use crate::utils::time::Clock;

/// Author recorded on escalation-driven resolutions; bypasses approver
/// checks.
pub const SYSTEM_APPROVER: &str = "system:escalation";

/// What the escalation scan did to one overdue request.
#[derive(Debug, Clone)]
pub struct EscalationOutcome {
    pub request: ApprovalRequest,
    pub applied: EscalationAction,
}

#[derive(Clone)]
pub struct ApprovalWorkflow {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl ApprovalWorkflow {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create_flow(
        &self,
        name: String,
        request_type: ApprovalRequestType,
        steps: Vec<StepDefinition>,
        escalation: Option<EscalationRule>,
    ) -> Result<ApprovalFlow> {
        if steps.is_empty() {
            return Err(Error::BadRequest(
                "an approval flow needs at least one step".to_string(),
            ));
        }
        if self.store.flow_by_name(&name).await?.is_some() {
            return Err(Error::BadRequest(format!(
                "approval flow '{}' already exists",
                name
            )));
        }
        if let Some(rule) = &escalation {
            if rule.timeout_hours <= 0 {
                return Err(Error::BadRequest(
                    "escalation timeout must be positive".to_string(),
                ));
            }
        }
        let flow = ApprovalFlow {
            id: Uuid::new_v4(),
            name,
            request_type,
            steps,
            escalation,
            created_at: self.clock.now(),
        };
        self.store.insert_flow(&flow).await?;
        info!(flow = %flow.name, steps = flow.steps.len(), "approval flow created");
        Ok(flow)
    }

    pub async fn list_flows(&self) -> Result<Vec<ApprovalFlow>> {
        self.store.list_flows().await
    }

    /// Instantiates a flow into a request. The first step's escalation clock
    /// starts immediately.
    pub async fn create_request(
        &self,
        candidate_id: Uuid,
        flow_name: &str,
        requested_value: &str,
        requested_by: &str,
        priority: ApprovalPriority,
    ) -> Result<ApprovalRequest> {
        let flow = self
            .store
            .flow_by_name(flow_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("approval flow '{}' not found", flow_name)))?;
        if flow.request_type == ApprovalRequestType::StatusChange
            && CandidateStatus::parse(requested_value).is_none()
        {
            return Err(Error::BadRequest(format!(
                "'{}' is not a pipeline status",
                requested_value
            )));
        }

        let now = self.clock.now();
        let steps = flow
            .steps
            .iter()
            .enumerate()
            .map(|(index, def)| ApprovalStep {
                id: Uuid::new_v4(),
                order: index as i32 + 1,
                approver: def.approver.clone(),
                is_required: def.is_required,
                status: StepStatus::Pending,
                approved_by: None,
                resolved_at: None,
                comments: None,
                entered_at: (index == 0).then_some(now),
            })
            .collect();

        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            candidate_id,
            flow_id: flow.id,
            request_type: flow.request_type,
            requested_value: requested_value.to_string(),
            requested_by: requested_by.to_string(),
            priority,
            steps,
            current_step_index: 0,
            status: ApprovalStatus::Pending,
            comments: Vec::new(),
            escalation: flow.escalation.clone(),
            created_at: now,
            resolved_at: None,
        };
        self.store.insert_request(&request).await?;
        info!(
            request = %request.id,
            candidate = %candidate_id,
            flow = %flow_name,
            requested_value = %requested_value,
            "approval request created"
        );
        Ok(request)
    }

    pub async fn get(&self, id: Uuid) -> Result<ApprovalRequest> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("approval request {} not found", id)))
    }

    /// Requests whose active step the given approver may resolve.
    pub async fn list_pending(&self, user_id: &str, role: &str) -> Result<Vec<ApprovalRequest>> {
        Ok(self
            .store
            .pending_requests()
            .await?
            .into_iter()
            .filter(|request| {
                request
                    .current_step()
                    .map(|step| step.approver.allows(user_id, role))
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Resolves the active step. Out-of-turn and unauthorized attempts are
    /// rejected with no state change.
    pub async fn resolve_step(
        &self,
        request_id: Uuid,
        step_id: Uuid,
        decision: ApprovalDecision,
        approver_id: &str,
        approver_role: &str,
        comments: Option<String>,
    ) -> Result<ApprovalRequest> {
        let mut request = self.get(request_id).await?;
        if request.status != ApprovalStatus::Pending {
            return Err(Error::ApprovalOrdering(format!(
                "request {} is already {}",
                request_id, request.status
            )));
        }

        let index = request
            .steps
            .iter()
            .position(|step| step.id == step_id)
            .ok_or_else(|| {
                Error::NotFound(format!("step {} not found on request {}", step_id, request_id))
            })?;
        if index as i32 != request.current_step_index {
            return Err(Error::ApprovalOrdering(format!(
                "step {} is not the active step; steps resolve in ascending order",
                step_id
            )));
        }

        let step = &request.steps[index];
        if approver_id != SYSTEM_APPROVER && !step.approver.allows(approver_id, approver_role) {
            return Err(Error::Unauthorized(format!(
                "approver '{}' does not satisfy {}",
                approver_id, step.approver
            )));
        }

        self.apply_decision(&mut request, index, decision, approver_id, comments);
        self.store.update_request(&request).await?;
        info!(
            request = %request.id,
            step = %step_id,
            decision = ?decision,
            status = %request.status,
            "approval step resolved"
        );
        Ok(request)
    }

    pub async fn cancel(
        &self,
        request_id: Uuid,
        cancelled_by: &str,
        comments: Option<String>,
    ) -> Result<ApprovalRequest> {
        let mut request = self.get(request_id).await?;
        if request.status != ApprovalStatus::Pending {
            return Err(Error::ApprovalOrdering(format!(
                "request {} is already {}",
                request_id, request.status
            )));
        }
        let now = self.clock.now();
        if let Some(text) = comments {
            request.comments.push(ApprovalComment {
                author: cancelled_by.to_string(),
                text,
                created_at: now,
            });
        }
        finalize(&mut request, ApprovalStatus::Cancelled, now);
        self.store.update_request(&request).await?;
        info!(request = %request.id, by = %cancelled_by, "approval request cancelled");
        Ok(request)
    }

    /// Applies each flow's escalation rule to requests whose active step has
    /// been pending past its timeout.
    pub async fn escalate_overdue(&self) -> Result<Vec<EscalationOutcome>> {
        let now = self.clock.now();
        let mut outcomes = Vec::new();

        for mut request in self.store.pending_requests().await? {
            let Some(rule) = request.escalation.clone() else {
                continue;
            };
            let index = request.current_step_index as usize;
            let Some(step) = request.steps.get(index) else {
                continue;
            };
            let Some(entered_at) = step.entered_at else {
                continue;
            };
            if now - entered_at < Duration::hours(rule.timeout_hours) {
                continue;
            }

            warn!(
                request = %request.id,
                step = %step.id,
                pending_hours = (now - entered_at).num_hours(),
                action = ?rule.action,
                "approval step overdue, escalating"
            );
            match rule.action {
                EscalationAction::AutoApprove => {
                    self.apply_decision(
                        &mut request,
                        index,
                        ApprovalDecision::Approved,
                        SYSTEM_APPROVER,
                        Some(format!(
                            "auto-approved after {}h without a decision",
                            rule.timeout_hours
                        )),
                    );
                }
                EscalationAction::EscalateToManager => {
                    let role = rule
                        .escalate_to_role
                        .clone()
                        .unwrap_or_else(|| "manager".to_string());
                    let step = &mut request.steps[index];
                    step.approver = ApproverSpec::Role { role: role.clone() };
                    step.entered_at = Some(now);
                    request.comments.push(ApprovalComment {
                        author: SYSTEM_APPROVER.to_string(),
                        text: format!("reassigned to role '{}' after timeout", role),
                        created_at: now,
                    });
                }
                EscalationAction::Reject => {
                    let step = &mut request.steps[index];
                    step.status = StepStatus::Rejected;
                    step.resolved_at = Some(now);
                    request.comments.push(ApprovalComment {
                        author: SYSTEM_APPROVER.to_string(),
                        text: format!("rejected after {}h without a decision", rule.timeout_hours),
                        created_at: now,
                    });
                    finalize(&mut request, ApprovalStatus::Rejected, now);
                }
                EscalationAction::NotifyAdmin => {
                    // Re-arm the clock so a still-stalled request re-notifies
                    // once per timeout window.
                    let step = &mut request.steps[index];
                    step.entered_at = Some(now);
                    request.comments.push(ApprovalComment {
                        author: SYSTEM_APPROVER.to_string(),
                        text: "administrators notified of stalled approval".to_string(),
                        created_at: now,
                    });
                }
            }
            self.store.update_request(&request).await?;
            outcomes.push(EscalationOutcome {
                request,
                applied: rule.action,
            });
        }
        Ok(outcomes)
    }

    fn apply_decision(
        &self,
        request: &mut ApprovalRequest,
        index: usize,
        decision: ApprovalDecision,
        approver_id: &str,
        comments: Option<String>,
    ) {
        let now = self.clock.now();
        {
            let step = &mut request.steps[index];
            step.resolved_at = Some(now);
            step.comments = comments.clone();
            match decision {
                ApprovalDecision::Approved => {
                    step.status = StepStatus::Approved;
                    step.approved_by = Some(approver_id.to_string());
                }
                ApprovalDecision::Rejected => {
                    step.status = StepStatus::Rejected;
                }
            }
        }
        if let Some(text) = comments {
            request.comments.push(ApprovalComment {
                author: approver_id.to_string(),
                text,
                created_at: now,
            });
        }

        match decision {
            ApprovalDecision::Approved => {
                let required_remains = request
                    .steps
                    .iter()
                    .skip(index + 1)
                    .any(|s| s.status == StepStatus::Pending && s.is_required);
                if required_remains {
                    advance(request, index, now);
                } else {
                    finalize(request, ApprovalStatus::Approved, now);
                }
            }
            ApprovalDecision::Rejected => {
                if request.steps[index].is_required {
                    finalize(request, ApprovalStatus::Rejected, now);
                } else if index + 1 >= request.steps.len() {
                    // Last step was optional and said no: every required step
                    // already passed, so the request stands approved.
                    finalize(request, ApprovalStatus::Approved, now);
                } else {
                    advance(request, index, now);
                }
            }
        }
    }
}

fn advance(request: &mut ApprovalRequest, index: usize, now: chrono::DateTime<chrono::Utc>) {
    request.current_step_index = index as i32 + 1;
    if let Some(next) = request.steps.get_mut(index + 1) {
        next.entered_at = Some(now);
    }
}

fn finalize(
    request: &mut ApprovalRequest,
    status: ApprovalStatus,
    now: chrono::DateTime<chrono::Utc>,
) {
    request.status = status;
    request.resolved_at = Some(now);
    for step in request
        .steps
        .iter_mut()
        .filter(|s| s.status == StepStatus::Pending)
    {
        step.status = StepStatus::Skipped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::utils::time::ManualClock;
    use chrono::{TimeZone, Utc};

    fn setup() -> (ApprovalWorkflow, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        (ApprovalWorkflow::new(store.clone(), clock.clone()), store, clock)
    }

    fn two_required_steps() -> Vec<StepDefinition> {
        vec![
            StepDefinition {
                approver: ApproverSpec::Role {
                    role: "hr_manager".to_string(),
                },
                is_required: true,
            },
            StepDefinition {
                approver: ApproverSpec::User {
                    id: "ceo".to_string(),
                },
                is_required: true,
            },
        ]
    }

    async fn request_with_steps(
        workflow: &ApprovalWorkflow,
        steps: Vec<StepDefinition>,
        escalation: Option<EscalationRule>,
    ) -> ApprovalRequest {
        workflow
            .create_flow("hire-signoff".to_string(), ApprovalRequestType::StatusChange, steps, escalation)
            .await
            .unwrap();
        workflow
            .create_request(Uuid::new_v4(), "hire-signoff", "HIRED", "recruiter", ApprovalPriority::High)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn steps_resolve_strictly_in_order() {
        let (workflow, _store, _clock) = setup();
        let request = request_with_steps(&workflow, two_required_steps(), None).await;
        let step_b = request.steps[1].id;

        let err = workflow
            .resolve_step(request.id, step_b, ApprovalDecision::Approved, "ceo", "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ApprovalOrdering(_)));

        // No state change happened.
        let reread = workflow.get(request.id).await.unwrap();
        assert_eq!(reread.current_step_index, 0);
        assert_eq!(reread.steps[1].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn unauthorized_approver_is_rejected_without_side_effect() {
        let (workflow, _store, _clock) = setup();
        let request = request_with_steps(&workflow, two_required_steps(), None).await;
        let step_a = request.steps[0].id;

        let err = workflow
            .resolve_step(request.id, step_a, ApprovalDecision::Approved, "intern", "intern", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        let reread = workflow.get(request.id).await.unwrap();
        assert_eq!(reread.steps[0].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn approving_both_required_steps_approves_the_request() {
        let (workflow, _store, _clock) = setup();
        let request = request_with_steps(&workflow, two_required_steps(), None).await;

        let after_first = workflow
            .resolve_step(
                request.id,
                request.steps[0].id,
                ApprovalDecision::Approved,
                "maria",
                "hr_manager",
                Some("looks strong".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(after_first.status, ApprovalStatus::Pending);
        assert_eq!(after_first.current_step_index, 1);
        assert!(after_first.steps[1].entered_at.is_some());

        let done = workflow
            .resolve_step(
                after_first.id,
                after_first.steps[1].id,
                ApprovalDecision::Approved,
                "ceo",
                "",
                None,
            )
            .await
            .unwrap();
        assert_eq!(done.status, ApprovalStatus::Approved);
        assert_eq!(done.steps[1].approved_by.as_deref(), Some("ceo"));
        assert_eq!(done.comments.len(), 1);
    }

    #[tokio::test]
    async fn rejecting_a_required_step_short_circuits_the_request() {
        let (workflow, _store, _clock) = setup();
        let steps = vec![
            StepDefinition {
                approver: ApproverSpec::Role {
                    role: "hr_manager".to_string(),
                },
                is_required: true,
            },
            StepDefinition {
                approver: ApproverSpec::User {
                    id: "ceo".to_string(),
                },
                is_required: true,
            },
            StepDefinition {
                approver: ApproverSpec::Role {
                    role: "finance".to_string(),
                },
                is_required: false,
            },
        ];
        let request = request_with_steps(&workflow, steps, None).await;

        workflow
            .resolve_step(request.id, request.steps[0].id, ApprovalDecision::Approved, "maria", "hr_manager", None)
            .await
            .unwrap();
        let done = workflow
            .resolve_step(request.id, request.steps[1].id, ApprovalDecision::Rejected, "ceo", "", None)
            .await
            .unwrap();

        assert_eq!(done.status, ApprovalStatus::Rejected);
        assert_eq!(done.steps[1].status, StepStatus::Rejected);
        // Steps beyond the rejected one are skipped, not left dangling.
        assert_eq!(done.steps[2].status, StepStatus::Skipped);
        // Nothing may be resolved after the terminal state.
        let err = workflow
            .resolve_step(done.id, done.steps[2].id, ApprovalDecision::Approved, "sam", "finance", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ApprovalOrdering(_)));
    }

    #[tokio::test]
    async fn optional_step_rejection_advances_without_terminating() {
        let (workflow, _store, _clock) = setup();
        let steps = vec![
            StepDefinition {
                approver: ApproverSpec::Role {
                    role: "finance".to_string(),
                },
                is_required: false,
            },
            StepDefinition {
                approver: ApproverSpec::User {
                    id: "ceo".to_string(),
                },
                is_required: true,
            },
        ];
        let request = request_with_steps(&workflow, steps, None).await;

        let after = workflow
            .resolve_step(request.id, request.steps[0].id, ApprovalDecision::Rejected, "sam", "finance", None)
            .await
            .unwrap();
        assert_eq!(after.status, ApprovalStatus::Pending);
        assert_eq!(after.current_step_index, 1);
    }

    #[tokio::test]
    async fn approval_skips_trailing_optional_steps() {
        let (workflow, _store, _clock) = setup();
        let steps = vec![
            StepDefinition {
                approver: ApproverSpec::User {
                    id: "ceo".to_string(),
                },
                is_required: true,
            },
            StepDefinition {
                approver: ApproverSpec::AnyOf {
                    users: vec!["cfo".to_string(), "coo".to_string()],
                },
                is_required: false,
            },
        ];
        let request = request_with_steps(&workflow, steps, None).await;

        let done = workflow
            .resolve_step(request.id, request.steps[0].id, ApprovalDecision::Approved, "ceo", "", None)
            .await
            .unwrap();
        assert_eq!(done.status, ApprovalStatus::Approved);
        assert_eq!(done.steps[1].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn any_of_steps_accept_any_listed_user() {
        let (workflow, _store, _clock) = setup();
        let steps = vec![StepDefinition {
            approver: ApproverSpec::AnyOf {
                users: vec!["cfo".to_string(), "coo".to_string()],
            },
            is_required: true,
        }];
        let request = request_with_steps(&workflow, steps, None).await;

        let done = workflow
            .resolve_step(request.id, request.steps[0].id, ApprovalDecision::Approved, "coo", "", None)
            .await
            .unwrap();
        assert_eq!(done.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn timeout_auto_approves_and_advances() {
        let (workflow, _store, clock) = setup();
        let escalation = EscalationRule {
            timeout_hours: 24,
            action: EscalationAction::AutoApprove,
            escalate_to_role: None,
        };
        let request = request_with_steps(&workflow, two_required_steps(), Some(escalation)).await;

        clock.advance(Duration::hours(25));
        let outcomes = workflow.escalate_overdue().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        let escalated = &outcomes[0].request;
        assert_eq!(escalated.steps[0].status, StepStatus::Approved);
        assert_eq!(escalated.steps[0].approved_by.as_deref(), Some(SYSTEM_APPROVER));
        assert_eq!(escalated.status, ApprovalStatus::Pending);
        assert_eq!(escalated.current_step_index, 1);

        // The next step's clock restarted; nothing further fires yet.
        assert!(workflow.escalate_overdue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_reassigns_to_manager_and_resets_the_clock() {
        let (workflow, _store, clock) = setup();
        let escalation = EscalationRule {
            timeout_hours: 12,
            action: EscalationAction::EscalateToManager,
            escalate_to_role: Some("talent_director".to_string()),
        };
        let request = request_with_steps(&workflow, two_required_steps(), Some(escalation)).await;

        clock.advance(Duration::hours(13));
        let outcomes = workflow.escalate_overdue().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        let escalated = workflow.get(request.id).await.unwrap();
        assert_eq!(
            escalated.steps[0].approver,
            ApproverSpec::Role {
                role: "talent_director".to_string()
            }
        );

        // The reassigned approver can now resolve the step.
        let after = workflow
            .resolve_step(
                escalated.id,
                escalated.steps[0].id,
                ApprovalDecision::Approved,
                "dana",
                "talent_director",
                None,
            )
            .await
            .unwrap();
        assert_eq!(after.current_step_index, 1);
    }

    #[tokio::test]
    async fn timeout_reject_terminates_the_request() {
        let (workflow, _store, clock) = setup();
        let escalation = EscalationRule {
            timeout_hours: 24,
            action: EscalationAction::Reject,
            escalate_to_role: None,
        };
        let request = request_with_steps(&workflow, two_required_steps(), Some(escalation)).await;

        clock.advance(Duration::hours(30));
        workflow.escalate_overdue().await.unwrap();
        let rejected = workflow.get(request.id).await.unwrap();
        assert_eq!(rejected.status, ApprovalStatus::Rejected);
        assert_eq!(rejected.steps[1].status, StepStatus::Skipped);
    }
}
