use serde::Deserialize;
use validator::Validate;

use crate::models::rule::{Action, Condition, Trigger};

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRulePayload {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[validate(length(min = 1))]
    pub actions: Vec<Action>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRulePayload {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub trigger: Option<Trigger>,
    pub conditions: Option<Vec<Condition>>,
    #[validate(length(min = 1))]
    pub actions: Option<Vec<Action>>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRulePayload {
    pub is_active: bool,
}
