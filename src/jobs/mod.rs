//! Job tracking around the pipeline.

mod manager;
mod store;

pub use manager::{JobManager, JobStatistics};
pub use store::{InMemoryJobStore, JobStore};
