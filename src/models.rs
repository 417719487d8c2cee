use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rebuild::AliasOutcome;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildRequest {
    #[serde(default)]
    pub apps: Vec<String>,
    #[serde(default)]
    pub from_scratch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
    Expired,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildJobResponse {
    pub job_id: String,
    pub status: JobState,
    pub progress: f64,
    pub elapsed_ms: u64,
    pub message: Option<String>,
    pub apps: Vec<String>,
    pub from_scratch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub results: Vec<AliasOutcome>,
    pub error: Option<ErrorPayload>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildAcceptedResponse {
    pub job_id: String,
    pub status: JobState,
    pub progress: f64,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: JobState,
    pub progress: f64,
    pub message: Option<String>,
    pub request: RebuildRequest,
    pub run_id: Option<String>,
    pub results: Vec<AliasOutcome>,
    pub error: Option<ErrorPayload>,
}

impl JobRecord {
    pub fn queued(job_id: String, request: RebuildRequest, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            created_at: now,
            updated_at: now,
            status: JobState::Queued,
            progress: 0.0,
            message: Some("Queued for rebuild".to_string()),
            request,
            run_id: None,
            results: Vec::new(),
            error: None,
        }
    }

    pub fn to_response(&self) -> RebuildJobResponse {
        let elapsed = (Utc::now() - self.created_at).num_milliseconds().max(0) as u64;
        RebuildJobResponse {
            job_id: self.job_id.clone(),
            status: self.status.clone(),
            progress: self.progress,
            elapsed_ms: elapsed,
            message: self.message.clone(),
            apps: self.request.apps.clone(),
            from_scratch: self.request.from_scratch,
            run_id: self.run_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            results: self.results.clone(),
            error: self.error.clone(),
        }
    }
}
