//! Job identity, state and the read-only status view.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::progress::checkpoint;
use crate::error::StorageError;

/// Globally unique job identifier; doubles as the storage namespace name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for JobId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| StorageError::InvalidJobId(s.to_string()))
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Done,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }

    /// Whether the state machine allows `self -> next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Processing)
                | (JobState::Processing, JobState::Done)
                | (JobState::Processing, JobState::Error)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Processing => write!(f, "processing"),
            JobState::Done => write!(f, "done"),
            JobState::Error => write!(f, "error"),
        }
    }
}

/// Terminal payload: exactly one of a download reference or an error text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum JobResult {
    Download(String),
    Error(String),
}

/// The tracked record of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub target: String,
    pub inputs: Vec<String>,
    pub state: JobState,
    pub progress: u8,
    pub result: Option<JobResult>,
    /// Absolute expiry of a presigned reference; `None` for stable references.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: JobId, target: &str, inputs: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            target: target.to_string(),
            inputs,
            state: JobState::Queued,
            progress: checkpoint::QUEUED,
            result: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn view(&self) -> JobStatusView {
        let (download_url, error) = match &self.result {
            Some(JobResult::Download(url)) => (Some(url.clone()), None),
            Some(JobResult::Error(msg)) => (None, Some(msg.clone())),
            None => (None, None),
        };

        JobStatusView {
            job_id: self.job_id.to_string(),
            status: self.state,
            progress: self.progress,
            download_url,
            error,
        }
    }
}

/// What the HTTP boundary returns for a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Work item handed to the execution facility.
///
/// `target` stays a string so the executing side re-validates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionTask {
    pub job_id: JobId,
    pub target: String,
    /// Stored input object names, in submission order.
    pub inputs: Vec<String>,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// Completion notice delivered by the execution facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub state: JobState,
    pub download_url: Option<String>,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn from_view(job_id: JobId, view: &JobStatusView) -> Self {
        Self {
            job_id,
            state: view.status,
            download_url: view.download_url.clone(),
            error: view.error.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == JobState::Done
    }
}
