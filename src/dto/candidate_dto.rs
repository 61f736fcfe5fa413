use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

use crate::models::candidate::CandidateStatus;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterCandidatePayload {
    pub id: Option<Uuid>,
    #[validate(length(min = 1))]
    pub name: String,
    pub status: Option<CandidateStatus>,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub job_id: Option<i64>,
    pub profile: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusPayload {
    pub status: CandidateStatus,
    pub changed_by: Option<String>,
    pub reason: Option<String>,
}
