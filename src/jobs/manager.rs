use std::collections::HashMap;
use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{error, info, instrument, warn};

use super::store::{InMemoryJobStore, JobStore};
use crate::artifacts::ArtifactWriter;
use crate::error::JobError;
use crate::generation::Generator;
use crate::model::{GeneratedNotes, RawInput};
use crate::pipeline::{CancellationFlag, Orchestrator, ProgressSink, StageUpdate, SubmitOptions};
use crate::state_machine::{AuditRecord, Job, JobEvent, JobStatus, JobStatusView};

/// The job query surface: submit inputs, poll status, fetch results.
///
/// Each job runs as its own task; jobs share nothing but the store.
pub struct JobManager<G> {
    orchestrator: Arc<Orchestrator<G>>,
    store: Arc<dyn JobStore>,
    cancellations: Arc<Mutex<HashMap<String, CancellationFlag>>>,
    writers: Vec<Arc<dyn ArtifactWriter>>,
    observer: Option<Arc<dyn ProgressSink>>,
    finished: Arc<Notify>,
}

/// Counts over every job in the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Queued or running.
    pub active: usize,
    /// Completed jobs as a percentage of all jobs; 0 for an empty store.
    pub success_rate: f64,
    /// Mean duration of completed jobs.
    pub average_duration_ms: Option<f64>,
}

impl<G> Clone for JobManager<G> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            store: Arc::clone(&self.store),
            cancellations: Arc::clone(&self.cancellations),
            writers: self.writers.clone(),
            observer: self.observer.clone(),
            finished: Arc::clone(&self.finished),
        }
    }
}

impl<G: Generator + 'static> JobManager<G> {
    pub fn new(orchestrator: Orchestrator<G>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            store: Arc::new(InMemoryJobStore::new()),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
            writers: Vec::new(),
            observer: None,
            finished: Arc::new(Notify::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = store;
        self
    }

    /// Artifacts are written before the job is marked completed. A failed
    /// write is logged and does not fail the job.
    pub fn with_writer(mut self, writer: Arc<dyn ArtifactWriter>) -> Self {
        self.writers.push(writer);
        self
    }

    /// Receives every stage update of every job.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressSink>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Queues `input` and starts it on the runtime. Returns the job id.
    pub fn submit(&self, input: RawInput, options: SubmitOptions) -> Result<String, JobError> {
        let (id, cancel) = self.enqueue(&input)?;
        let manager = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            manager.run(&job_id, input, options, cancel).await;
        });
        Ok(id)
    }

    /// Like [`submit`](Self::submit) but runs the job on the current task.
    pub async fn process(
        &self,
        input: RawInput,
        options: SubmitOptions,
    ) -> Result<JobStatusView, JobError> {
        let (id, cancel) = self.enqueue(&input)?;
        self.run(&id, input, options, cancel).await;
        self.get_status(&id)
    }

    pub fn get_status(&self, id: &str) -> Result<JobStatusView, JobError> {
        self.job(id).map(|job| job.view())
    }

    /// The notes of a completed job. Any other status is `NotReady`.
    pub fn get_result(&self, id: &str) -> Result<GeneratedNotes, JobError> {
        let job = self.job(id)?;
        match (job.status, job.result) {
            (JobStatus::Completed, Some(notes)) => Ok(notes),
            (status, _) => Err(JobError::NotReady {
                id: id.to_string(),
                status,
            }),
        }
    }

    pub fn audit(&self, id: &str) -> Result<AuditRecord, JobError> {
        self.job(id).map(|job| AuditRecord::from_job(&job))
    }

    /// Recorded progress values, oldest first.
    pub fn progress_history(&self, id: &str) -> Result<Vec<u8>, JobError> {
        self.job(id).map(|job| job.progress_history)
    }

    /// Asks a job to stop at its next stage boundary. No-op for finished jobs.
    pub fn cancel(&self, id: &str) -> Result<(), JobError> {
        let job = self.job(id)?;
        if job.status.is_terminal() {
            return Ok(());
        }
        if let Some(flag) = self.flags().get(id) {
            flag.cancel();
            info!(job_id = %id, "cancellation requested");
        }
        Ok(())
    }

    /// Resolves once the job reaches a terminal status.
    pub async fn wait(&self, id: &str) -> Result<JobStatusView, JobError> {
        loop {
            // Registered before the status read so a finish in between is not missed.
            let mut finished = pin!(self.finished.notified());
            finished.as_mut().enable();
            let view = self.get_status(id)?;
            if view.status.is_terminal() {
                return Ok(view);
            }
            finished.await;
        }
    }

    /// Status of every job, oldest first, optionally only those in `status`.
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Vec<JobStatusView> {
        let mut jobs: Vec<Job> = self
            .store
            .ids()
            .iter()
            .filter_map(|id| self.store.get(id))
            .filter(|job| status.is_none_or(|s| job.status == s))
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs.iter().map(Job::view).collect()
    }

    pub fn statistics(&self) -> JobStatistics {
        let records: Vec<AuditRecord> = self
            .store
            .ids()
            .iter()
            .filter_map(|id| self.store.get(id))
            .map(|job| AuditRecord::from_job(&job))
            .collect();

        let total = records.len();
        let durations: Vec<i64> = records
            .iter()
            .filter(|r| r.status == JobStatus::Completed)
            .map(|r| r.duration_ms)
            .collect();
        let completed = durations.len();
        let failed = records
            .iter()
            .filter(|r| r.status == JobStatus::Failed)
            .count();

        JobStatistics {
            total,
            completed,
            failed,
            active: total - completed - failed,
            success_rate: if total == 0 {
                0.0
            } else {
                completed as f64 * 100.0 / total as f64
            },
            average_duration_ms: (!durations.is_empty())
                .then(|| durations.iter().sum::<i64>() as f64 / completed as f64),
        }
    }

    fn job(&self, id: &str) -> Result<Job, JobError> {
        self.store
            .get(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    fn flags(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationFlag>> {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, input: &RawInput) -> Result<(String, CancellationFlag), JobError> {
        let job = Job::new(&input.name);
        let id = job.id.clone();
        self.store.insert(job)?;
        let cancel = CancellationFlag::new();
        self.flags().insert(id.clone(), cancel.clone());
        info!(job_id = %id, source = %input.name, "job queued");
        Ok((id, cancel))
    }

    #[instrument(skip_all, fields(job_id = %id))]
    async fn run(&self, id: &str, input: RawInput, options: SubmitOptions, cancel: CancellationFlag) {
        if let Err(e) = self.store.apply(id, JobEvent::Start) {
            error!(%e, "job could not start");
            self.flags().remove(id);
            self.finished.notify_waiters();
            return;
        }

        let sink = JobProgress {
            store: &*self.store,
            job_id: id,
            observer: self.observer.as_deref(),
        };
        let event = match self
            .orchestrator
            .run(id, &input, &options, &sink, &cancel)
            .await
        {
            Ok(notes) => {
                self.write_artifacts(&notes);
                info!(sections = notes.sections.len(), "job completed");
                JobEvent::Complete(Box::new(notes))
            }
            Err(e) => {
                warn!(%e, "job failed");
                JobEvent::Fail(e.to_info())
            }
        };
        if let Err(e) = self.store.apply(id, event) {
            error!(%e, "final job transition rejected");
        }
        self.flags().remove(id);
        self.finished.notify_waiters();
    }

    fn write_artifacts(&self, notes: &GeneratedNotes) {
        for writer in &self.writers {
            match writer.write(notes) {
                Ok(path) => info!(format = ?writer.format(), path = %path.display(), "artifact saved"),
                Err(e) => warn!(format = ?writer.format(), %e, "artifact not saved"),
            }
        }
    }
}

/// Forwards stage updates into the job record.
struct JobProgress<'a> {
    store: &'a dyn JobStore,
    job_id: &'a str,
    observer: Option<&'a dyn ProgressSink>,
}

impl ProgressSink for JobProgress<'_> {
    fn on_stage(&self, update: &StageUpdate) {
        let event = JobEvent::Progress {
            percent: update.percent,
            message: update.message.clone(),
        };
        if let Err(e) = self.store.apply(self.job_id, event) {
            warn!(job_id = %self.job_id, %e, "progress update rejected");
        }
        if let Some(observer) = self.observer {
            observer.on_stage(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::JsonArtifactWriter;
    use crate::error::GenerationError;
    use crate::extraction::PlainTextExtractor;
    use crate::generation::{GenerationRequest, GenerationResponse};
    use crate::pipeline::PipelineOptions;

    struct Offline;

    impl Generator for Offline {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            Err(GenerationError::Unavailable("offline".into()))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u8>>);

    impl ProgressSink for Recorder {
        fn on_stage(&self, update: &StageUpdate) {
            self.0.lock().unwrap().push(update.percent);
        }
    }

    fn manager() -> JobManager<Offline> {
        JobManager::new(Orchestrator::new(
            Arc::new(Offline),
            Arc::new(PlainTextExtractor),
            PipelineOptions::default(),
        ))
    }

    const DOC: &str = "# Motion\nSpeed $v = d / t$ is constant.\n";

    #[tokio::test]
    async fn process_completes_and_exposes_result() {
        let recorder = Arc::new(Recorder::default());
        let manager = manager().with_observer(recorder.clone());

        let view = manager
            .process(RawInput::text("motion.md", DOC), SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.progress, 100);

        let notes = manager.get_result(&view.id).unwrap();
        assert_eq!(notes.id, view.id);
        assert_eq!(notes.sections.len(), 1);
        assert_eq!(recorder.0.lock().unwrap().last(), Some(&100));

        let audit = manager.audit(&view.id).unwrap();
        assert_eq!(
            audit.status_transitions,
            vec![JobStatus::Queued, JobStatus::Running, JobStatus::Completed]
        );
        assert_eq!(audit.stage_tiers["generate_notes"], crate::model::Tier::Template);
    }

    #[tokio::test]
    async fn submitted_job_runs_in_background() {
        let manager = manager();
        let id = manager
            .submit(RawInput::text("motion.md", DOC), SubmitOptions::default())
            .unwrap();
        let view = manager.wait(&id).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);

        let history = manager.progress_history(&id).unwrap();
        assert!(history.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(history.last(), Some(&100));
    }

    #[tokio::test]
    async fn empty_document_fails_at_extraction() {
        let manager = manager();
        let view = manager
            .process(RawInput::text("blank.md", "   \n"), SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error.unwrap().stage, "extract_content");
        assert!(matches!(
            manager.get_result(&view.id),
            Err(JobError::NotReady {
                status: JobStatus::Failed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let manager = manager();
        assert_eq!(
            manager.get_status("nope"),
            Err(JobError::NotFound("nope".into()))
        );
        assert!(matches!(
            manager.get_result("nope"),
            Err(JobError::NotFound(_))
        ));
        assert!(manager.cancel("nope").is_err());
    }

    #[tokio::test]
    async fn artifacts_are_written_on_completion() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager().with_writer(Arc::new(JsonArtifactWriter::new(dir.path())));
        let view = manager
            .process(RawInput::text("motion.md", DOC), SubmitOptions::default())
            .await
            .unwrap();

        let stored = JsonArtifactWriter::load(dir.path(), &view.id).unwrap();
        assert_eq!(stored, manager.get_result(&view.id).unwrap());
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let manager = manager();
        let view = manager
            .process(RawInput::text("motion.md", DOC), SubmitOptions::default())
            .await
            .unwrap();
        manager.cancel(&view.id).unwrap();
        assert_eq!(
            manager.get_status(&view.id).unwrap().status,
            JobStatus::Completed
        );
    }

    /// Counts transitions on top of the in-memory store.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryJobStore,
        applied: std::sync::atomic::AtomicUsize,
    }

    impl JobStore for CountingStore {
        fn insert(&self, job: Job) -> Result<(), JobError> {
            self.inner.insert(job)
        }

        fn get(&self, id: &str) -> Option<Job> {
            self.inner.get(id)
        }

        fn apply(
            &self,
            id: &str,
            event: JobEvent,
        ) -> Result<crate::state_machine::Transition, JobError> {
            self.applied
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.apply(id, event)
        }

        fn ids(&self) -> Vec<String> {
            self.inner.ids()
        }
    }

    #[tokio::test]
    async fn custom_store_records_every_transition() {
        let store = Arc::new(CountingStore::default());
        let manager = manager().with_store(store.clone());
        let view = manager
            .process(RawInput::text("motion.md", DOC), SubmitOptions::default())
            .await
            .unwrap();

        assert_eq!(store.get(&view.id).unwrap().status, JobStatus::Completed);
        // Start, one progress update per stage, Complete.
        let stages = crate::pipeline::StageName::ALL.len();
        assert_eq!(
            store.applied.load(std::sync::atomic::Ordering::SeqCst),
            stages + 2
        );
        assert_eq!(store.ids(), vec![view.id]);
    }

    #[tokio::test]
    async fn lists_jobs_and_summarizes_outcomes() {
        let manager = manager();
        let empty = manager.statistics();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.success_rate, 0.0);
        assert_eq!(empty.average_duration_ms, None);

        let done = manager
            .process(RawInput::text("motion.md", DOC), SubmitOptions::default())
            .await
            .unwrap();
        let failed = manager
            .process(RawInput::text("blank.md", " "), SubmitOptions::default())
            .await
            .unwrap();

        let all: Vec<String> = manager.list_jobs(None).into_iter().map(|v| v.id).collect();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&done.id) && all.contains(&failed.id));
        let completed = manager.list_jobs(Some(JobStatus::Completed));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done.id);

        let stats = manager.statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.success_rate, 50.0);
        assert!(stats.average_duration_ms.is_some_and(|ms| ms >= 0.0));
    }

    #[tokio::test]
    async fn wait_on_finished_job_returns_immediately() {
        let manager = manager();
        let view = manager
            .process(RawInput::text("motion.md", DOC), SubmitOptions::default())
            .await
            .unwrap();
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            manager.wait(&view.id),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(waited, view);
    }
}
