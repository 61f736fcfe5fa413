//! Action dispatch. Status changes go straight to the ledger and come back
//! as cascade events; collaborator calls are validated, then handed to the
//! durable delivery outbox so retries never run under the candidate lock;
//! approval requests are created and control returns immediately.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Error;
use crate::models::candidate::TransitionSource;
use crate::models::event::{ActionInvocation, PipelineEvent};
use crate::models::rule::ActionKind;
use crate::services::approval_service::ApprovalWorkflow;
use crate::services::ledger_service::StatusLedger;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub collaborator_base_url: String,
    pub notification_url: String,
    pub delivery_max_attempts: i32,
}

/// Outcome of one invocation. `Failed { retryable: false }` makes the caller
/// skip the rule's remaining actions; everything else lets siblings proceed.
#[derive(Debug)]
pub enum Executed {
    Done,
    Cascade(PipelineEvent),
    Failed { retryable: bool, error: String },
}

#[derive(Clone)]
pub struct ActionExecutor {
    store: Arc<dyn Store>,
    ledger: StatusLedger,
    approvals: ApprovalWorkflow,
    config: ExecutorConfig,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: StatusLedger,
        approvals: ApprovalWorkflow,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            approvals,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Idempotence note: the scheduler delivers claimed jobs at least once,
    /// so every arm here either re-validates against current state (status
    /// changes reject repeats as invalid transitions) or lands in the outbox
    /// keyed for de-duplication downstream.
    pub async fn execute(&self, invocation: &ActionInvocation) -> Executed {
        match &invocation.action.kind {
            ActionKind::ChangeStatus { target } => {
                match self
                    .ledger
                    .transition(
                        invocation.candidate_id,
                        *target,
                        TransitionSource::Automated,
                        None,
                        None,
                        Some(invocation.rule_id),
                    )
                    .await
                {
                    Ok(record) => Executed::Cascade(PipelineEvent::StatusChanged {
                        candidate_id: record.candidate_id,
                        from: record.from_status,
                        to: record.to_status,
                        source: TransitionSource::Automated,
                    }),
                    Err(Error::InvalidTransition(message)) => Executed::Failed {
                        retryable: false,
                        error: message,
                    },
                    Err(other) => Executed::Failed {
                        retryable: true,
                        error: other.to_string(),
                    },
                }
            }

            ActionKind::SendNotification {
                template,
                recipients,
            } => {
                if template.is_empty() || recipients.is_empty() {
                    return Executed::Failed {
                        retryable: false,
                        error: "send_notification needs a template and at least one recipient"
                            .to_string(),
                    };
                }
                let payload = json!({
                    "candidate_id": invocation.candidate_id,
                    "rule_id": invocation.rule_id,
                    "template": template,
                    "recipients": recipients,
                });
                self.defer("notification", payload, self.config.notification_url.clone())
                    .await
            }

            ActionKind::ScheduleInterview {
                interview_type,
                interviewer,
            } => {
                if interview_type.is_empty() {
                    return Executed::Failed {
                        retryable: false,
                        error: "schedule_interview needs an interview type".to_string(),
                    };
                }
                let payload = json!({
                    "candidate_id": invocation.candidate_id,
                    "rule_id": invocation.rule_id,
                    "interview_type": interview_type,
                    "interviewer": interviewer,
                });
                let url = format!("{}/interviews", self.config.collaborator_base_url);
                self.defer("interview", payload, url).await
            }

            ActionKind::AddNote { text } => {
                if text.is_empty() {
                    return Executed::Failed {
                        retryable: false,
                        error: "add_note needs a non-empty text".to_string(),
                    };
                }
                let payload = json!({
                    "candidate_id": invocation.candidate_id,
                    "rule_id": invocation.rule_id,
                    "text": text,
                });
                let url = format!("{}/notes", self.config.collaborator_base_url);
                self.defer("note", payload, url).await
            }

            ActionKind::AssignJob { job_id } => {
                let payload = json!({
                    "candidate_id": invocation.candidate_id,
                    "rule_id": invocation.rule_id,
                    "job_id": job_id,
                });
                let url = format!("{}/assignments", self.config.collaborator_base_url);
                self.defer("assignment", payload, url).await
            }

            ActionKind::RequestApproval {
                flow,
                requested_value,
                priority,
            } => {
                match self
                    .approvals
                    .create_request(
                        invocation.candidate_id,
                        flow,
                        requested_value,
                        "automation",
                        *priority,
                    )
                    .await
                {
                    Ok(request) => {
                        info!(
                            request = %request.id,
                            candidate = %invocation.candidate_id,
                            "approval requested; remaining actions continue independently"
                        );
                        Executed::Done
                    }
                    Err(Error::NotFound(message)) | Err(Error::BadRequest(message)) => {
                        Executed::Failed {
                            retryable: false,
                            error: message,
                        }
                    }
                    Err(other) => Executed::Failed {
                        retryable: true,
                        error: other.to_string(),
                    },
                }
            }
        }
    }

    async fn defer(
        &self,
        kind: &str,
        payload: serde_json::Value,
        target_url: String,
    ) -> Executed {
        match self
            .store
            .enqueue_delivery(kind, &payload, &target_url, self.config.delivery_max_attempts)
            .await
        {
            Ok(delivery_id) => {
                debug!(delivery = %delivery_id, kind, "collaborator call queued");
                Executed::Done
            }
            Err(err) => Executed::Failed {
                retryable: true,
                error: format!("failed to queue {} delivery: {}", kind, err),
            },
        }
    }
}
