use std::fmt;

use chrono::Utc;
use tracing::debug;

use super::job::{Job, JobStatus};
use crate::error::JobError;
use crate::model::{ErrorInfo, GeneratedNotes};

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The orchestrator picked the job up.
    Start,
    Progress { percent: u8, message: String },
    Complete(Box<GeneratedNotes>),
    Fail(ErrorInfo),
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobEvent::Start => write!(f, "start"),
            JobEvent::Progress { percent, .. } => write!(f, "progress({percent})"),
            JobEvent::Complete(_) => write!(f, "complete"),
            JobEvent::Fail(_) => write!(f, "fail"),
        }
    }
}

/// The result of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status changed.
    Moved { from: JobStatus, to: JobStatus },
    /// Status unchanged; progress or message updated.
    Updated,
}

/// Drives a [`Job`] through `queued → running → {completed, failed}`.
pub struct StateMachine;

impl StateMachine {
    /// Apply `event` to `job`, or reject it without touching the job.
    ///
    /// - `Start` is only valid from `Queued`.
    /// - `Progress` is only valid while `Running`; lower percentages are ignored.
    /// - `Complete` requires `Running` and sets progress to 100.
    /// - `Fail` is valid from `Queued` or `Running`.
    /// - Terminal jobs accept nothing.
    pub fn apply(job: &mut Job, event: JobEvent) -> Result<Transition, JobError> {
        let transition = match (job.status, event) {
            (JobStatus::Queued, JobEvent::Start) => {
                job.message = "Running".to_string();
                Self::move_to(job, JobStatus::Running)
            }
            (JobStatus::Running, JobEvent::Progress { percent, message }) => {
                let percent = percent.min(100).max(job.progress);
                job.progress = percent;
                job.progress_history.push(percent);
                job.message = message;
                Transition::Updated
            }
            (JobStatus::Running, JobEvent::Complete(notes)) => {
                job.progress = 100;
                job.progress_history.push(100);
                job.message = "Completed".to_string();
                job.result = Some(*notes);
                Self::move_to(job, JobStatus::Completed)
            }
            (JobStatus::Queued | JobStatus::Running, JobEvent::Fail(info)) => {
                job.message = format!("Failed at {}: {}", info.stage, info.message);
                job.error = Some(info);
                Self::move_to(job, JobStatus::Failed)
            }
            (from, event) => {
                return Err(JobError::InvalidTransition {
                    id: job.id.clone(),
                    from,
                    event: event.to_string(),
                });
            }
        };
        job.updated_at = Utc::now();
        Ok(transition)
    }

    fn move_to(job: &mut Job, to: JobStatus) -> Transition {
        let from = job.status;
        job.status_history.push(from);
        job.status = to;
        debug!(job_id = %job.id, %from, %to, "job transition");
        Transition::Moved { from, to }
    }
}
