use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::JobError;
use crate::state_machine::{Job, JobEvent, StateMachine, Transition};

/// Registry of jobs keyed by id.
///
/// Implementations serialize `insert` and `apply` per store; readers get
/// snapshots.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: Job) -> Result<(), JobError>;

    fn get(&self, id: &str) -> Option<Job>;

    /// Runs `event` through the [`StateMachine`] against the stored job.
    fn apply(&self, id: &str, event: JobEvent) -> Result<Transition, JobError>;

    fn ids(&self) -> Vec<String>;
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job.id) {
            return Err(JobError::Duplicate(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<Job> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn apply(&self, id: &str, event: JobEvent) -> Result<Transition, JobError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        StateMachine::apply(job, event)
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
