use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::anthropic::AnthropicError;
use crate::model::{ErrorInfo, ErrorKind, Tier};
use crate::pipeline::StageName;
use crate::state_machine::JobStatus;

/// Failure while loading configuration.
#[derive(Debug, Error)]
pub enum NotesError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure of the content extraction adapter. Always fatal for a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("document is not valid UTF-8 text: {0}")]
    Decode(String),

    #[error("document contains no extractable text")]
    EmptyDocument,

    #[error("unsupported document: {0}")]
    Unsupported(String),

    #[error("extraction failed: {0}")]
    Failed(String),
}

/// Failure of the external generation collaborator (Tier 1 only).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("malformed generation response: {0}")]
    MalformedResponse(String),

    #[error("generation unavailable: {0}")]
    Unavailable(String),

    #[error("generation backend error: {0}")]
    Api(String),
}

impl From<AnthropicError> for GenerationError {
    fn from(err: AnthropicError) -> Self {
        match err {
            AnthropicError::RateLimited { retry_after_ms } => {
                GenerationError::RateLimited { retry_after_ms }
            }
            AnthropicError::Timeout(bound) => GenerationError::Timeout(bound),
            other => GenerationError::Api(other.to_string()),
        }
    }
}

/// A tier produced output that failed a structural check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Failure of a single tier attempt inside a stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("invalid stage output: {0}")]
    Validation(#[from] ValidationError),

    #[error("stage attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Internal(String),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Extraction(_) => ErrorKind::Extraction,
            StageError::Generation(GenerationError::Timeout(_)) | StageError::Timeout(_) => {
                ErrorKind::Timeout
            }
            StageError::Generation(_) => ErrorKind::Generation,
            StageError::Validation(_) => ErrorKind::Validation,
            StageError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Builds the observable record of this failure for `stage`.
    pub fn to_info(&self, stage: StageName, tier: Option<Tier>) -> ErrorInfo {
        ErrorInfo {
            stage: stage.to_string(),
            kind: self.kind(),
            message: self.to_string(),
            tier,
            resolved_by: None,
        }
    }
}

/// A required stage exhausted every recovery option, or the run was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("required stage {stage} failed: {cause}")]
    StageFailed { stage: StageName, cause: StageError },

    #[error("run cancelled before stage {stage}")]
    Cancelled { stage: StageName },
}

impl PipelineError {
    pub fn stage(&self) -> StageName {
        match self {
            PipelineError::StageFailed { stage, .. } | PipelineError::Cancelled { stage } => *stage,
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        match self {
            PipelineError::StageFailed { stage, cause } => {
                let mut info = cause.to_info(*stage, None);
                info.kind = match cause {
                    StageError::Extraction(_) => ErrorKind::Extraction,
                    _ => ErrorKind::Pipeline,
                };
                info
            }
            PipelineError::Cancelled { stage } => ErrorInfo {
                stage: stage.to_string(),
                kind: ErrorKind::Cancelled,
                message: "cancelled".to_string(),
                tier: None,
                resolved_by: None,
            },
        }
    }
}

/// Misuse of the job query surface. Never mutates job state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} has no result yet (status: {status})")]
    NotReady { id: String, status: JobStatus },

    #[error("Job {id} cannot go from {from} via {event}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        event: String,
    },

    #[error("Job already exists: {0}")]
    Duplicate(String),
}

/// Failure while rendering or persisting a finished artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("artifact serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no artifact stored for job {0}")]
    Missing(String),
}

impl ArtifactError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
