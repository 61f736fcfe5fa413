//! CRUD surface for automation rules. Changes take effect for events
//! dispatched after the write; in-flight dispatches keep the rule set they
//! started with.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::dto::rule_dto::{CreateRulePayload, UpdateRulePayload};
use crate::error::{Error, Result};
use crate::models::rule::{Action, ActionKind, AutomationRule, Trigger};
use crate::store::Store;
use crate::utils::time::Clock;

#[derive(Clone)]
pub struct RuleService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl RuleService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create_rule(&self, payload: CreateRulePayload) -> Result<AutomationRule> {
        self.check_trigger(&payload.trigger)?;
        self.check_actions(&payload.actions).await?;

        let now = self.clock.now();
        let rule = AutomationRule {
            id: Uuid::new_v4(),
            name: payload.name,
            is_active: payload.is_active,
            trigger: payload.trigger,
            conditions: payload.conditions,
            actions: payload.actions,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_rule(&rule).await?;
        info!(rule = %rule.name, id = %rule.id, "automation rule created");
        Ok(rule)
    }

    pub async fn update_rule(&self, id: Uuid, payload: UpdateRulePayload) -> Result<AutomationRule> {
        let mut rule = self.get_rule(id).await?;

        if let Some(name) = payload.name {
            rule.name = name;
        }
        if let Some(is_active) = payload.is_active {
            rule.is_active = is_active;
        }
        if let Some(trigger) = payload.trigger {
            self.check_trigger(&trigger)?;
            rule.trigger = trigger;
        }
        if let Some(conditions) = payload.conditions {
            rule.conditions = conditions;
        }
        if let Some(actions) = payload.actions {
            self.check_actions(&actions).await?;
            rule.actions = actions;
        }
        rule.updated_at = self.clock.now();

        if !self.store.update_rule(&rule).await? {
            return Err(Error::NotFound(format!("rule {} not found", id)));
        }
        Ok(rule)
    }

    pub async fn delete_rule(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_rule(id).await? {
            return Err(Error::NotFound(format!("rule {} not found", id)));
        }
        info!(id = %id, "automation rule deleted");
        Ok(())
    }

    /// Deactivation stops future matches immediately. Jobs already scheduled
    /// by earlier matches stay queued and re-validate their guard at fire
    /// time instead of being cancelled here.
    pub async fn toggle_rule(&self, id: Uuid, is_active: bool) -> Result<AutomationRule> {
        let mut rule = self.get_rule(id).await?;
        rule.is_active = is_active;
        rule.updated_at = self.clock.now();
        if !self.store.update_rule(&rule).await? {
            return Err(Error::NotFound(format!("rule {} not found", id)));
        }
        info!(rule = %rule.name, is_active, "automation rule toggled");
        Ok(rule)
    }

    pub async fn get_rule(&self, id: Uuid) -> Result<AutomationRule> {
        self.store
            .get_rule(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("rule {} not found", id)))
    }

    pub async fn list_rules(&self) -> Result<Vec<AutomationRule>> {
        self.store.list_rules().await
    }

    fn check_trigger(&self, trigger: &Trigger) -> Result<()> {
        if let Trigger::TimeElapsed { value, .. } = trigger {
            if *value <= 0 {
                return Err(Error::BadRequest(
                    "time_elapsed trigger requires a positive value".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn check_actions(&self, actions: &[Action]) -> Result<()> {
        for action in actions {
            if let Some(delay) = action.delay {
                if delay <= 0 {
                    return Err(Error::BadRequest(
                        "action delay must be positive".to_string(),
                    ));
                }
            }
            if let ActionKind::RequestApproval { flow, .. } = &action.kind {
                if self.store.flow_by_name(flow).await?.is_none() {
                    return Err(Error::BadRequest(format!(
                        "approval flow '{}' does not exist",
                        flow
                    )));
                }
            }
        }
        Ok(())
    }
}
