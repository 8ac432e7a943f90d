mod job;
mod state;

pub use job::{AuditRecord, Job, JobStatus, JobStatusView};
pub use state::{JobEvent, StateMachine, Transition};
