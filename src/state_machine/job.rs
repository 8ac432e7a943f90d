use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ErrorInfo, GeneratedNotes, Tier};

/// Lifecycle status of a job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One note-generation request tracked from submission to a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub source_name: String,
    pub status: JobStatus,
    /// 0..=100, never decreases.
    pub progress: u8,
    pub message: String,
    pub result: Option<GeneratedNotes>,
    pub error: Option<ErrorInfo>,
    pub status_history: Vec<JobStatus>,
    pub progress_history: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(source_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source_name: source_name.into(),
            status: JobStatus::Queued,
            progress: 0,
            message: "Queued".to_string(),
            result: None,
            error: None,
            status_history: Vec::new(),
            progress_history: vec![0],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            error: self.error.clone(),
        }
    }
}

/// What `get_status` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    /// Set once the job has failed: the stage that broke and why.
    pub error: Option<ErrorInfo>,
}

/// Structured audit record for a finished job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub job_id: String,
    pub source_name: String,
    pub status: JobStatus,
    pub status_transitions: Vec<JobStatus>,
    pub stage_tiers: BTreeMap<String, Tier>,
    pub error: Option<ErrorInfo>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl AuditRecord {
    pub fn from_job(job: &Job) -> Self {
        let mut transitions = job.status_history.clone();
        transitions.push(job.status);

        Self {
            job_id: job.id.clone(),
            source_name: job.source_name.clone(),
            status: job.status,
            status_transitions: transitions,
            stage_tiers: job
                .result
                .as_ref()
                .map(|notes| notes.metadata.stage_tiers.clone())
                .unwrap_or_default(),
            error: job.error.clone(),
            started_at: job.created_at,
            completed_at: job.updated_at,
            duration_ms: (job.updated_at - job.created_at).num_milliseconds(),
        }
    }
}
