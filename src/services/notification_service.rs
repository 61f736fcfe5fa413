//! Delivery worker for the collaborator outbox. One row per collaborator
//! call; failures back off exponentially until the attempt ceiling, then the
//! row is marked failed and surfaced to the operator log.

use chrono::Duration;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::Result;
use crate::models::scheduled_job::{DeliveryJob, ExecutionFailure};
use crate::store::Store;
use crate::utils::signature;
use crate::utils::time::Clock;

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    client: Client,
    secret: String,
}

impl NotificationService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, secret: String) -> Self {
        Self {
            store,
            clock,
            client: Client::new(),
            secret,
        }
    }

    /// Delivers at most one due outbox row. Returns whether there was work,
    /// so the worker loop can idle between polls.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(job) = self.store.claim_next_delivery(self.clock.now()).await? else {
            return Ok(false);
        };

        let body = serde_json::to_vec(&job.payload)?;
        let sig = signature::sign(&self.secret, &body);
        let result = self
            .client
            .post(&job.target_url)
            .header("X-Automation-Signature", sig)
            .header("X-Automation-Event", &job.kind)
            .json(&job.payload)
            .send()
            .await;

        let attempts = job.attempts + 1;
        match result {
            Ok(response) => {
                let status = response.status().as_u16() as i32;
                let response_body = response.text().await.unwrap_or_default();
                if (200..300).contains(&status) {
                    debug!(delivery = %job.id, kind = %job.kind, "delivered");
                    self.store
                        .store_delivery_result(job.id, attempts, Some(status), &response_body, true, None)
                        .await?;
                } else {
                    self.retry_or_fail(&job, attempts, Some(status), &response_body)
                        .await?;
                }
            }
            Err(err) => {
                self.retry_or_fail(&job, attempts, None, &err.to_string())
                    .await?;
            }
        }
        Ok(true)
    }

    async fn retry_or_fail(
        &self,
        job: &DeliveryJob,
        attempts: i32,
        http_status: Option<i32>,
        response_body: &str,
    ) -> Result<()> {
        if attempts < job.max_attempts {
            // 30s, 60s, 120s, ... capped at an hour.
            let backoff_secs = (30i64 << (attempts - 1).clamp(0, 16) as u32).min(3600);
            let next_retry_at = self.clock.now() + Duration::seconds(backoff_secs);
            debug!(
                delivery = %job.id,
                attempts,
                next_retry_at = %next_retry_at,
                "delivery failed, will retry"
            );
            self.store
                .store_delivery_result(
                    job.id,
                    attempts,
                    http_status,
                    response_body,
                    false,
                    Some(next_retry_at),
                )
                .await?;
        } else {
            error!(
                delivery = %job.id,
                kind = %job.kind,
                attempts,
                "delivery exhausted its retries"
            );
            self.store
                .store_delivery_result(job.id, attempts, http_status, response_body, false, None)
                .await?;

            let candidate_id = job
                .payload
                .get("candidate_id")
                .and_then(|v| v.as_str())
                .and_then(|raw| Uuid::parse_str(raw).ok())
                .unwrap_or_else(Uuid::nil);
            let rule_id = job
                .payload
                .get("rule_id")
                .and_then(|v| v.as_str())
                .and_then(|raw| Uuid::parse_str(raw).ok());
            let failure = ExecutionFailure {
                id: Uuid::new_v4(),
                rule_id,
                candidate_id,
                action_index: 0,
                error: format!(
                    "{} delivery to {} failed after {} attempts",
                    job.kind, job.target_url, attempts
                ),
                occurred_at: self.clock.now(),
            };
            self.store.record_failure(&failure).await?;
        }
        Ok(())
    }
}
