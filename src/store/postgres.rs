//! PostgreSQL store. Queries are runtime-checked so the crate builds without
//! a live database; claims use `FOR UPDATE SKIP LOCKED` so multiple workers
//! never double-claim a row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::approval::{ApprovalFlow, ApprovalPriority, ApprovalRequest, ApprovalRequestType, ApprovalStatus};
use crate::models::candidate::{CandidateSnapshot, CandidateStatus, StatusTransition, TransitionSource};
use crate::models::rule::AutomationRule;
use crate::models::scheduled_job::{
    DeliveryJob, DeliveryStatus, ExecutionFailure, JobKey, JobStatus, ScheduledJob,
};

use super::{
    ApprovalStore, CandidateStore, FailureStore, JobStore, LedgerStore, OutboxStore, RuleStore,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_status(raw: &str) -> Result<CandidateStatus> {
    CandidateStatus::parse(raw)
        .ok_or_else(|| Error::Internal(format!("unknown candidate status '{}' in database", raw)))
}

fn rule_from_row(row: &PgRow) -> Result<AutomationRule> {
    Ok(AutomationRule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        trigger: serde_json::from_value(row.try_get::<JsonValue, _>("trigger_spec")?)?,
        conditions: serde_json::from_value(row.try_get::<JsonValue, _>("conditions")?)?,
        actions: serde_json::from_value(row.try_get::<JsonValue, _>("actions")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn candidate_from_row(row: &PgRow) -> Result<CandidateSnapshot> {
    Ok(CandidateSnapshot {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: parse_status(&row.try_get::<String, _>("status")?)?,
        scores: serde_json::from_value(row.try_get::<JsonValue, _>("scores")?)?,
        skills: serde_json::from_value(row.try_get::<JsonValue, _>("skills")?)?,
        job_id: row.try_get("job_id")?,
        profile: row.try_get("profile")?,
        last_status_change_at: row.try_get("last_status_change_at")?,
    })
}

fn transition_from_row(row: &PgRow) -> Result<StatusTransition> {
    let from_status = row
        .try_get::<Option<String>, _>("from_status")?
        .map(|s| parse_status(&s))
        .transpose()?;
    let source_raw: String = row.try_get("source")?;
    Ok(StatusTransition {
        id: row.try_get("id")?,
        candidate_id: row.try_get("candidate_id")?,
        from_status,
        to_status: parse_status(&row.try_get::<String, _>("to_status")?)?,
        changed_at: row.try_get("changed_at")?,
        changed_by: row.try_get("changed_by")?,
        reason: row.try_get("reason")?,
        source: TransitionSource::parse(&source_raw)
            .ok_or_else(|| Error::Internal(format!("unknown transition source '{}'", source_raw)))?,
        automation_rule_id: row.try_get("automation_rule_id")?,
    })
}

fn flow_from_row(row: &PgRow) -> Result<ApprovalFlow> {
    let request_type_raw: String = row.try_get("request_type")?;
    Ok(ApprovalFlow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        request_type: ApprovalRequestType::parse(&request_type_raw)
            .ok_or_else(|| Error::Internal(format!("unknown request type '{}'", request_type_raw)))?,
        steps: serde_json::from_value(row.try_get::<JsonValue, _>("steps")?)?,
        escalation: row
            .try_get::<Option<JsonValue>, _>("escalation")?
            .map(serde_json::from_value)
            .transpose()?,
        created_at: row.try_get("created_at")?,
    })
}

fn request_from_row(row: &PgRow) -> Result<ApprovalRequest> {
    let request_type_raw: String = row.try_get("request_type")?;
    let priority_raw: String = row.try_get("priority")?;
    let status_raw: String = row.try_get("status")?;
    Ok(ApprovalRequest {
        id: row.try_get("id")?,
        candidate_id: row.try_get("candidate_id")?,
        flow_id: row.try_get("flow_id")?,
        request_type: ApprovalRequestType::parse(&request_type_raw)
            .ok_or_else(|| Error::Internal(format!("unknown request type '{}'", request_type_raw)))?,
        requested_value: row.try_get("requested_value")?,
        requested_by: row.try_get("requested_by")?,
        priority: ApprovalPriority::parse(&priority_raw)
            .ok_or_else(|| Error::Internal(format!("unknown priority '{}'", priority_raw)))?,
        steps: serde_json::from_value(row.try_get::<JsonValue, _>("steps")?)?,
        current_step_index: row.try_get("current_step_index")?,
        status: ApprovalStatus::parse(&status_raw)
            .ok_or_else(|| Error::Internal(format!("unknown approval status '{}'", status_raw)))?,
        comments: serde_json::from_value(row.try_get::<JsonValue, _>("comments")?)?,
        escalation: row
            .try_get::<Option<JsonValue>, _>("escalation")?
            .map(serde_json::from_value)
            .transpose()?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<ScheduledJob> {
    let status_raw: String = row.try_get("status")?;
    Ok(ScheduledJob {
        id: row.try_get("id")?,
        rule_id: row.try_get("rule_id")?,
        candidate_id: row.try_get("candidate_id")?,
        action_index: row.try_get("action_index")?,
        triggered_at: row.try_get("triggered_at")?,
        due_at: row.try_get("due_at")?,
        guard_status: row
            .try_get::<Option<String>, _>("guard_status")?
            .map(|s| parse_status(&s))
            .transpose()?,
        action: serde_json::from_value(row.try_get::<JsonValue, _>("action")?)?,
        status: JobStatus::parse(&status_raw)
            .ok_or_else(|| Error::Internal(format!("unknown job status '{}'", status_raw)))?,
        created_at: row.try_get("created_at")?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<DeliveryJob> {
    let status_raw: String = row.try_get("status")?;
    Ok(DeliveryJob {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        payload: row.try_get("payload")?,
        target_url: row.try_get("target_url")?,
        http_status: row.try_get("http_status")?,
        response_body: row.try_get("response_body")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        next_retry_at: row.try_get("next_retry_at")?,
        status: DeliveryStatus::parse(&status_raw)
            .ok_or_else(|| Error::Internal(format!("unknown delivery status '{}'", status_raw)))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl RuleStore for PgStore {
    async fn insert_rule(&self, rule: &AutomationRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_rules (id, name, is_active, trigger_spec, conditions, actions, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.is_active)
        .bind(serde_json::to_value(&rule.trigger)?)
        .bind(serde_json::to_value(&rule.conditions)?)
        .bind(serde_json::to_value(&rule.actions)?)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_rule(&self, rule: &AutomationRule) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE automation_rules
            SET name = $1, is_active = $2, trigger_spec = $3, conditions = $4, actions = $5, updated_at = $6
            WHERE id = $7
            "#,
        )
        .bind(&rule.name)
        .bind(rule.is_active)
        .bind(serde_json::to_value(&rule.trigger)?)
        .bind(serde_json::to_value(&rule.conditions)?)
        .bind(serde_json::to_value(&rule.actions)?)
        .bind(rule.updated_at)
        .bind(rule.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM automation_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>> {
        let row = sqlx::query("SELECT * FROM automation_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| rule_from_row(&r)).transpose()
    }

    async fn list_rules(&self) -> Result<Vec<AutomationRule>> {
        let rows = sqlx::query("SELECT * FROM automation_rules ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn active_rules(&self) -> Result<Vec<AutomationRule>> {
        let rows = sqlx::query(
            "SELECT * FROM automation_rules WHERE is_active = TRUE ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }
}

#[async_trait]
impl CandidateStore for PgStore {
    async fn insert_candidate(&self, snapshot: &CandidateSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO candidates (id, name, status, scores, skills, job_id, profile, last_status_change_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(snapshot.id)
        .bind(&snapshot.name)
        .bind(snapshot.status.as_str())
        .bind(serde_json::to_value(&snapshot.scores)?)
        .bind(serde_json::to_value(&snapshot.skills)?)
        .bind(snapshot.job_id)
        .bind(&snapshot.profile)
        .bind(snapshot.last_status_change_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn snapshot(&self, id: Uuid) -> Result<Option<CandidateSnapshot>> {
        let row = sqlx::query("SELECT * FROM candidates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| candidate_from_row(&r)).transpose()
    }

    async fn set_status(&self, id: Uuid, status: CandidateStatus, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE candidates
            SET status = $1, last_status_change_at = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("candidate {} not found", id)));
        }
        Ok(())
    }

    async fn set_score(&self, id: Uuid, score_type: &str, value: f64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE candidates
            SET scores = jsonb_set(scores, ARRAY[$1], to_jsonb($2::double precision)), updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(score_type)
        .bind(value)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("candidate {} not found", id)));
        }
        Ok(())
    }

    async fn candidate_ids(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM candidates ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| r.try_get("id").map_err(Error::from))
            .collect()
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn append_transition(&self, transition: &StatusTransition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO status_transitions
                (id, candidate_id, from_status, to_status, changed_at, changed_by, reason, source, automation_rule_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(transition.id)
        .bind(transition.candidate_id)
        .bind(transition.from_status.map(|s| s.as_str()))
        .bind(transition.to_status.as_str())
        .bind(transition.changed_at)
        .bind(&transition.changed_by)
        .bind(&transition.reason)
        .bind(transition.source.as_str())
        .bind(transition.automation_rule_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(&self, candidate_id: Uuid) -> Result<Vec<StatusTransition>> {
        let rows = sqlx::query(
            "SELECT * FROM status_transitions WHERE candidate_id = $1 ORDER BY changed_at ASC",
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transition_from_row).collect()
    }

    async fn latest_transition(&self, candidate_id: Uuid) -> Result<Option<StatusTransition>> {
        let row = sqlx::query(
            "SELECT * FROM status_transitions WHERE candidate_id = $1 ORDER BY changed_at DESC LIMIT 1",
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| transition_from_row(&r)).transpose()
    }
}

#[async_trait]
impl ApprovalStore for PgStore {
    async fn insert_flow(&self, flow: &ApprovalFlow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_flows (id, name, request_type, steps, escalation, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(flow.id)
        .bind(&flow.name)
        .bind(flow.request_type.as_str())
        .bind(serde_json::to_value(&flow.steps)?)
        .bind(flow.escalation.as_ref().map(serde_json::to_value).transpose()?)
        .bind(flow.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn flow_by_name(&self, name: &str) -> Result<Option<ApprovalFlow>> {
        let row = sqlx::query("SELECT * FROM approval_flows WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| flow_from_row(&r)).transpose()
    }

    async fn list_flows(&self) -> Result<Vec<ApprovalFlow>> {
        let rows = sqlx::query("SELECT * FROM approval_flows ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(flow_from_row).collect()
    }

    async fn insert_request(&self, request: &ApprovalRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_requests
                (id, candidate_id, flow_id, request_type, requested_value, requested_by,
                 priority, steps, current_step_index, status, comments, escalation, created_at, resolved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(request.id)
        .bind(request.candidate_id)
        .bind(request.flow_id)
        .bind(request.request_type.as_str())
        .bind(&request.requested_value)
        .bind(&request.requested_by)
        .bind(request.priority.as_str())
        .bind(serde_json::to_value(&request.steps)?)
        .bind(request.current_step_index)
        .bind(request.status.as_str())
        .bind(serde_json::to_value(&request.comments)?)
        .bind(request.escalation.as_ref().map(serde_json::to_value).transpose()?)
        .bind(request.created_at)
        .bind(request.resolved_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<ApprovalRequest>> {
        let row = sqlx::query("SELECT * FROM approval_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| request_from_row(&r)).transpose()
    }

    async fn update_request(&self, request: &ApprovalRequest) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE approval_requests
            SET steps = $1, current_step_index = $2, status = $3, comments = $4, resolved_at = $5
            WHERE id = $6
            "#,
        )
        .bind(serde_json::to_value(&request.steps)?)
        .bind(request.current_step_index)
        .bind(request.status.as_str())
        .bind(serde_json::to_value(&request.comments)?)
        .bind(request.resolved_at)
        .bind(request.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "approval request {} not found",
                request.id
            )));
        }
        Ok(())
    }

    async fn pending_requests(&self) -> Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query(
            "SELECT * FROM approval_requests WHERE status = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(request_from_row).collect()
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(&self, job: &ScheduledJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs
                (id, rule_id, candidate_id, action_index, triggered_at, due_at, guard_status, action, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (rule_id, candidate_id, action_index, triggered_at) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(job.rule_id)
        .bind(job.candidate_id)
        .bind(job.action_index)
        .bind(job.triggered_at)
        .bind(job.due_at)
        .bind(job.guard_status.map(|s| s.as_str()))
        .bind(serde_json::to_value(&job.action)?)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_job(&self, key: &JobKey) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs SET status = 'cancelled'
            WHERE rule_id = $1 AND candidate_id = $2 AND action_index = $3 AND triggered_at = $4
              AND status = 'pending'
            "#,
        )
        .bind(key.rule_id)
        .bind(key.candidate_id)
        .bind(key.action_index)
        .bind(key.triggered_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query(
            r#"
            UPDATE scheduled_jobs SET status = 'running'
            WHERE id IN (
                SELECT id FROM scheduled_jobs
                WHERE status = 'pending' AND due_at <= $1
                ORDER BY due_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $2
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn finish_job(&self, id: Uuid, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn try_mark_elapsed(
        &self,
        rule_id: Uuid,
        candidate_id: Uuid,
        baseline: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO elapsed_marks (rule_id, candidate_id, baseline)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(rule_id)
        .bind(candidate_id)
        .bind(baseline)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn enqueue_delivery(
        &self,
        kind: &str,
        payload: &JsonValue,
        target_url: &str,
        max_attempts: i32,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO deliveries (id, kind, payload, target_url, max_attempts, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            "#,
        )
        .bind(id)
        .bind(kind)
        .bind(payload)
        .bind(target_url)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn claim_next_delivery(&self, now: DateTime<Utc>) -> Result<Option<DeliveryJob>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM deliveries
            WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= $1)
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| delivery_from_row(&r)).transpose()
    }

    async fn store_delivery_result(
        &self,
        id: Uuid,
        attempts: i32,
        http_status: Option<i32>,
        response_body: &str,
        success: bool,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let status = if success {
            DeliveryStatus::Success
        } else if next_retry_at.is_some() {
            DeliveryStatus::Pending
        } else {
            DeliveryStatus::Failed
        };
        sqlx::query(
            r#"
            UPDATE deliveries
            SET attempts = $1, http_status = $2, response_body = $3, status = $4,
                next_retry_at = $5, updated_at = NOW()
            WHERE id = $6
            "#,
        )
        .bind(attempts)
        .bind(http_status)
        .bind(response_body)
        .bind(status.as_str())
        .bind(next_retry_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FailureStore for PgStore {
    async fn record_failure(&self, failure: &ExecutionFailure) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_failures (id, rule_id, candidate_id, action_index, error, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(failure.id)
        .bind(failure.rule_id)
        .bind(failure.candidate_id)
        .bind(failure.action_index)
        .bind(&failure.error)
        .bind(failure.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_failures(&self, limit: i64) -> Result<Vec<ExecutionFailure>> {
        let rows = sqlx::query(
            "SELECT * FROM execution_failures ORDER BY occurred_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ExecutionFailure {
                    id: row.try_get("id")?,
                    rule_id: row.try_get("rule_id")?,
                    candidate_id: row.try_get("candidate_id")?,
                    action_index: row.try_get("action_index")?,
                    error: row.try_get("error")?,
                    occurred_at: row.try_get("occurred_at")?,
                })
            })
            .collect()
    }
}
