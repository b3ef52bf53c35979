//! Background training job coordination.
//!
//! At most one training job runs at a time, process-wide. Starting a job
//! while another is in flight parks the new request as PENDING instead of
//! queueing or rejecting it; stopping a running job cancels cooperatively
//! and returns it to PENDING so it can be started again later.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use thiserror::Error;

use crate::store::{JobId, JobStatus, ModelId, Store, StoreError};
use crate::training::TrainingError;

mod cancel;

pub use cancel::CancelToken;

/// Errors raised by job coordination.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The job is not in a state the requested transition allows.
    #[error("Invalid state for training job {job}: {status:?}")]
    InvalidState { job: JobId, status: JobStatus },
    /// The job reads as running in the database but this process holds no
    /// cancellation signal for it.
    #[error("Training job {0} has no running worker in this process")]
    NotRunning(JobId),
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The job's worker thread was spawned.
    Started,
    /// Another job is already running; this one stays PENDING.
    Busy,
}

/// The actual training work a job executes, injected so coordination can be
/// tested without touching video or model code.
pub trait TrainingRunner: Send + Sync + 'static {
    /// Run one training job to completion, polling `cancel` between units of
    /// work. Returns the id of the model record the run produced.
    fn run(&self, job_id: JobId, cancel: CancelToken) -> Result<ModelId, TrainingError>;
}

#[derive(Default)]
struct CoordinatorState {
    running: Option<JobId>,
    signals: HashMap<JobId, CancelToken>,
    handles: HashMap<JobId, JoinHandle<()>>,
}

/// Owns the single-job slot and the per-job cancellation signals.
///
/// Worker threads open their own [`Store`] connection from `db_path`; SQLite
/// connections are not shared across threads here.
pub struct JobCoordinator {
    db_path: PathBuf,
    runner: Arc<dyn TrainingRunner>,
    state: Arc<Mutex<CoordinatorState>>,
}

impl JobCoordinator {
    pub fn new(db_path: &Path, runner: Arc<dyn TrainingRunner>) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            runner,
            state: Arc::new(Mutex::new(CoordinatorState::default())),
        }
    }

    /// Start a job's worker thread, or park the job as PENDING when another
    /// job already occupies the slot.
    ///
    /// Only PENDING jobs can start; COMPLETED and ERROR are terminal for a
    /// job, and an IN_PROGRESS job already has a worker.
    pub fn start(&self, job_id: JobId) -> Result<StartOutcome, JobError> {
        let store = Store::open(&self.db_path)?;
        let job = store.job(job_id)?;
        if job.status != JobStatus::Pending {
            return Err(JobError::InvalidState {
                job: job_id,
                status: job.status,
            });
        }

        let mut state = lock_state(&self.state);
        if state.running.is_some() {
            store.set_job_status(job_id, JobStatus::Pending)?;
            tracing::info!("Training job {job_id} parked as PENDING; another job is running");
            return Ok(StartOutcome::Busy);
        }

        let cancel = CancelToken::new();
        store.mark_job_started(job_id)?;
        state.running = Some(job_id);
        state.signals.insert(job_id, cancel.clone());

        let db_path = self.db_path.clone();
        let runner = Arc::clone(&self.runner);
        let shared = Arc::clone(&self.state);
        let handle = std::thread::spawn(move || {
            run_job(&db_path, runner.as_ref(), job_id, cancel);
            let mut state = lock_state(&shared);
            if state.running == Some(job_id) {
                state.running = None;
            }
            state.signals.remove(&job_id);
        });
        state.handles.insert(job_id, handle);
        tracing::info!("Training job {job_id} started");
        Ok(StartOutcome::Started)
    }

    /// Cancel a running job and return it to PENDING once its thread exits.
    pub fn stop(&self, job_id: JobId) -> Result<(), JobError> {
        let store = Store::open(&self.db_path)?;
        let job = store.job(job_id)?;
        if job.status != JobStatus::InProgress {
            return Err(JobError::InvalidState {
                job: job_id,
                status: job.status,
            });
        }

        let (cancel, handle) = {
            let mut state = lock_state(&self.state);
            let Some(cancel) = state.signals.get(&job_id).cloned() else {
                return Err(JobError::NotRunning(job_id));
            };
            (cancel, state.handles.remove(&job_id))
        };

        // Signal, then join outside the lock so the worker's own cleanup
        // cannot deadlock against us.
        cancel.cancel();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        // The worker may have finished naturally before it saw the signal;
        // a committed COMPLETED or ERROR outcome stands.
        let after_join = store.job(job_id)?;
        if after_join.status != JobStatus::InProgress {
            tracing::info!(
                "Training job {job_id} finished as {} before the stop signal landed",
                after_join.status.as_str()
            );
            let mut state = lock_state(&self.state);
            state.signals.remove(&job_id);
            if state.running == Some(job_id) {
                state.running = None;
            }
            return Ok(());
        }

        store.set_job_status(job_id, JobStatus::Pending)?;
        let mut state = lock_state(&self.state);
        state.signals.remove(&job_id);
        if state.running == Some(job_id) {
            state.running = None;
        }
        tracing::info!("Training job {job_id} stopped and returned to PENDING");
        Ok(())
    }

    /// Block until a job's worker thread exits, if one was spawned.
    pub fn wait(&self, job_id: JobId) {
        let handle = lock_state(&self.state).handles.remove(&job_id);
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Current database status of a job.
    pub fn status(&self, job_id: JobId) -> Result<JobStatus, JobError> {
        let store = Store::open(&self.db_path)?;
        Ok(store.job(job_id)?.status)
    }

    /// Id of the job currently occupying the slot, if any.
    pub fn running_job(&self) -> Option<JobId> {
        lock_state(&self.state).running
    }
}

fn lock_state(state: &Mutex<CoordinatorState>) -> std::sync::MutexGuard<'_, CoordinatorState> {
    // A poisoned lock only means a worker panicked mid-update; the state is
    // plain bookkeeping and stays usable.
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn run_job(db_path: &Path, runner: &dyn TrainingRunner, job_id: JobId, cancel: CancelToken) {
    let outcome = runner.run(job_id, cancel);
    let store = match Store::open(db_path) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!("Training job {job_id} cannot record its outcome: {err}");
            return;
        }
    };
    let recorded = match outcome {
        Ok(model_id) => {
            tracing::info!("Training job {job_id} completed with model {model_id}");
            store.complete_job(job_id, model_id)
        }
        Err(err) if err.is_cancelled() => {
            // stop() owns the PENDING transition after joining this thread.
            tracing::info!("Training job {job_id} observed cancellation");
            Ok(())
        }
        Err(err) => {
            tracing::error!("Training job {job_id} failed: {err}");
            store.fail_job(job_id)
        }
    };
    if let Err(err) = recorded {
        tracing::error!("Training job {job_id} outcome was not recorded: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Runner that spins until cancelled, then reports cancellation.
    struct SpinUntilCancelled;

    impl TrainingRunner for SpinUntilCancelled {
        fn run(&self, _job_id: JobId, cancel: CancelToken) -> Result<ModelId, TrainingError> {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(TrainingError::Cancelled)
        }
    }

    /// Runner that finishes immediately with a fixed model id.
    struct Instant(ModelId);

    impl TrainingRunner for Instant {
        fn run(&self, _job_id: JobId, _cancel: CancelToken) -> Result<ModelId, TrainingError> {
            Ok(self.0)
        }
    }

    /// Runner that completes successfully the moment the signal arrives,
    /// standing in for a worker whose natural finish races a stop request.
    struct CompleteOnSignal(ModelId);

    impl TrainingRunner for CompleteOnSignal {
        fn run(&self, _job_id: JobId, cancel: CancelToken) -> Result<ModelId, TrainingError> {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(self.0)
        }
    }

    fn seeded_model(db_path: &Path, name: &str) -> ModelId {
        let store = Store::open(db_path).unwrap();
        store
            .insert_model(&crate::store::NewModel {
                name: name.to_string(),
                file_path: PathBuf::from(format!("/tmp/{name}.json")),
                max_frames: 30,
                num_features: 126,
                words: "no".to_string(),
                fps: 20.0,
                accuracy: 0.0,
                word_accuracy: Default::default(),
                is_active: false,
            })
            .unwrap()
            .id
    }

    fn seeded_job(db_path: &Path, name: &str) -> JobId {
        let store = Store::open(db_path).unwrap();
        let dataset = match store.dataset_by_name("signs").unwrap() {
            Some(dataset) => dataset,
            None => store.insert_dataset("signs", Path::new("/data/signs")).unwrap(),
        };
        store.insert_job(name, dataset.id, None).unwrap().id
    }

    #[test]
    fn second_start_parks_as_pending_without_touching_the_running_job() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("jobs.db");
        let first = seeded_job(&db, "first");
        let second = seeded_job(&db, "second");

        let coordinator = JobCoordinator::new(&db, Arc::new(SpinUntilCancelled));
        assert_eq!(coordinator.start(first).unwrap(), StartOutcome::Started);
        assert_eq!(coordinator.start(second).unwrap(), StartOutcome::Busy);

        assert_eq!(coordinator.status(first).unwrap(), JobStatus::InProgress);
        assert_eq!(coordinator.status(second).unwrap(), JobStatus::Pending);
        assert_eq!(coordinator.running_job(), Some(first));

        coordinator.stop(first).unwrap();
    }

    #[test]
    fn stop_returns_a_running_job_to_pending() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("jobs.db");
        let job = seeded_job(&db, "run");

        let coordinator = JobCoordinator::new(&db, Arc::new(SpinUntilCancelled));
        coordinator.start(job).unwrap();
        coordinator.stop(job).unwrap();

        assert_eq!(coordinator.status(job).unwrap(), JobStatus::Pending);
        assert_eq!(coordinator.running_job(), None);

        // The slot is free again: the same job can restart with a fresh signal.
        assert_eq!(coordinator.start(job).unwrap(), StartOutcome::Started);
        assert_eq!(coordinator.status(job).unwrap(), JobStatus::InProgress);
        coordinator.stop(job).unwrap();
    }

    #[test]
    fn natural_completion_records_the_output_model() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("jobs.db");
        let job = seeded_job(&db, "run");
        let store = Store::open(&db).unwrap();
        let model = store
            .insert_model(&crate::store::NewModel {
                name: "out".to_string(),
                file_path: PathBuf::from("/tmp/out.json"),
                max_frames: 30,
                num_features: 126,
                words: "no".to_string(),
                fps: 20.0,
                accuracy: 0.0,
                word_accuracy: Default::default(),
                is_active: false,
            })
            .unwrap();

        let coordinator = JobCoordinator::new(&db, Arc::new(Instant(model.id)));
        coordinator.start(job).unwrap();
        coordinator.wait(job);

        let finished = store.job(job).unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.output_model_id, Some(model.id));
        assert_eq!(coordinator.running_job(), None);
    }

    #[test]
    fn completed_job_cannot_be_restarted() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("jobs.db");
        let job = seeded_job(&db, "run");
        let model = seeded_model(&db, "out");

        let coordinator = JobCoordinator::new(&db, Arc::new(Instant(model)));
        coordinator.start(job).unwrap();
        coordinator.wait(job);
        assert_eq!(coordinator.status(job).unwrap(), JobStatus::Completed);

        let err = coordinator.start(job).unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidState {
                status: JobStatus::Completed,
                ..
            }
        ));
        // Still completed, not flipped back into flight.
        assert_eq!(coordinator.status(job).unwrap(), JobStatus::Completed);
        assert_eq!(coordinator.running_job(), None);
    }

    #[test]
    fn failed_job_cannot_be_restarted() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("jobs.db");
        let job = seeded_job(&db, "run");
        Store::open(&db).unwrap().fail_job(job).unwrap();

        let coordinator = JobCoordinator::new(&db, Arc::new(SpinUntilCancelled));
        let err = coordinator.start(job).unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidState {
                status: JobStatus::Error,
                ..
            }
        ));
    }

    #[test]
    fn stop_keeps_a_completion_committed_during_the_stop() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("jobs.db");
        let job = seeded_job(&db, "run");
        let model = seeded_model(&db, "out");

        let coordinator = JobCoordinator::new(&db, Arc::new(CompleteOnSignal(model)));
        coordinator.start(job).unwrap();
        coordinator.stop(job).unwrap();

        // The worker committed COMPLETED before exiting; stop must not
        // overwrite it with PENDING.
        let finished = Store::open(&db).unwrap().job(job).unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.output_model_id, Some(model));
        assert!(finished.completed_at.is_some());
        assert_eq!(coordinator.running_job(), None);
    }

    #[test]
    fn stopping_a_job_that_never_started_is_an_invalid_state() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("jobs.db");
        let job = seeded_job(&db, "idle");

        let coordinator = JobCoordinator::new(&db, Arc::new(SpinUntilCancelled));
        let err = coordinator.stop(job).unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidState {
                status: JobStatus::Pending,
                ..
            }
        ));
    }
}
