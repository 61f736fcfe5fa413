use serde::Deserialize;
use uuid::Uuid;

/// Externally observed triggers accepted on `POST /api/events`. Internal
/// event kinds (status changes, elapsed ticks, approval outcomes) originate
/// inside the core and are deliberately not deserializable here.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmitEventPayload {
    ScoreUpdated {
        candidate_id: Uuid,
        score_type: String,
        #[serde(default)]
        value: Option<f64>,
    },
    InterviewCompleted {
        candidate_id: Uuid,
        #[serde(default)]
        interview_type: Option<String>,
    },
    ResumeUploaded {
        candidate_id: Uuid,
    },
}

#[derive(Debug, Deserialize)]
pub struct FailuresQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}
