use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};

use super::ExecutionFacility;
use crate::error::WorkerError;
use crate::job::{
    ConversionTask, Coordinator, JobId, JobOutcome, JobState, ProgressReporter, GENERIC_FAILURE,
};

/// Failure text for jobs still waiting in the queue when the pool stops.
pub const SHUTDOWN_FAILURE: &str = "Worker pool shut down";

/// Fixed-size pool of OS threads, each running one job at a time.
///
/// Submission never blocks: when every worker is busy and the queue is
/// full, [`ExecutionFacility::submit`] returns [`WorkerError::QueueFull`].
pub struct WorkerPool {
    task_sender: Sender<ConversionTask>,
    task_receiver: Receiver<ConversionTask>,
    outcome_receiver: Receiver<JobOutcome>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    coordinator: Arc<Coordinator>,
}

impl WorkerPool {
    pub fn new(coordinator: Arc<Coordinator>, worker_count: usize) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (task_sender, task_receiver) = bounded::<ConversionTask>(worker_count * 2);
        let (outcome_sender, outcome_receiver) = bounded::<JobOutcome>(worker_count * 16);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let task_rx = task_receiver.clone();
            let outcome_tx = outcome_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_coordinator = Arc::clone(&coordinator);

            let handle = thread::Builder::new()
                .name(format!("convert-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        task_rx,
                        outcome_tx,
                        shutdown_flag,
                        worker_coordinator,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            task_sender,
            task_receiver,
            outcome_receiver,
            workers,
            shutdown,
            coordinator,
        })
    }

    /// Blocks until a job finishes.
    pub fn recv_outcome(&self) -> Option<JobOutcome> {
        self.outcome_receiver.recv().ok()
    }

    pub fn recv_outcome_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.outcome_receiver.recv_timeout(timeout).ok()
    }

    pub fn try_recv_outcome(&self) -> Option<JobOutcome> {
        self.outcome_receiver.try_recv().ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.task_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        // Tasks that slipped in after the workers drained the queue
        for task in self.task_receiver.try_iter() {
            fail_unrun(&self.coordinator, task.job_id, SHUTDOWN_FAILURE);
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

impl ExecutionFacility for WorkerPool {
    fn submit(&self, task: ConversionTask) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        match self.task_sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                warn!("Worker queue full, refusing job {}", task.job_id);
                Err(WorkerError::QueueFull(self.task_sender.len()))
            }
            Err(TrySendError::Disconnected(_)) => Err(WorkerError::ChannelClosed),
        }
    }
}

/// Forwards progress hints to the log.
struct LogProgress {
    job_id: JobId,
}

impl ProgressReporter for LogProgress {
    fn report(&self, progress: u8, message: &str) {
        tracing::debug!(job_id = %self.job_id, progress, "{}", message);
    }
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<ConversionTask>,
    outcome_sender: Sender<JobOutcome>,
    shutdown: Arc<AtomicBool>,
    coordinator: Arc<Coordinator>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            drain_queue(&task_receiver, &outcome_sender, &coordinator);
            break;
        }

        match task_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(task) => {
                debug!("Worker {} processing job {}", worker_id, task.job_id);

                let Some(outcome) = run_job(&coordinator, task) else {
                    continue;
                };

                if !notify(&outcome_sender, outcome) {
                    debug!("Worker {} outcome channel disconnected", worker_id);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Sends `outcome` without blocking. Returns `false` once nobody listens.
fn notify(outcome_sender: &Sender<JobOutcome>, outcome: JobOutcome) -> bool {
    // Outcomes are notifications; the job store stays authoritative
    match outcome_sender.try_send(outcome) {
        Ok(()) => true,
        Err(TrySendError::Full(outcome)) => {
            debug!("Outcome queue full, dropping notice for job {}", outcome.job_id);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Fails every task still queued so no job is left waiting after shutdown.
fn drain_queue(
    task_receiver: &Receiver<ConversionTask>,
    outcome_sender: &Sender<JobOutcome>,
    coordinator: &Coordinator,
) {
    for task in task_receiver.try_iter() {
        info!("Job {} not started before shutdown", task.job_id);
        let outcome = fail_unrun(coordinator, task.job_id, SHUTDOWN_FAILURE);
        notify(outcome_sender, outcome);
    }
}

/// Runs one job, turning a panic into a failed job so the worker survives.
fn run_job(coordinator: &Coordinator, task: ConversionTask) -> Option<JobOutcome> {
    let job_id = task.job_id;
    let progress = LogProgress { job_id };

    let result = panic::catch_unwind(AssertUnwindSafe(|| coordinator.execute(&task, &progress)));

    match result {
        Ok(Ok(view)) => Some(JobOutcome::from_view(job_id, &view)),
        Ok(Err(e)) => {
            warn!("Skipping job {}: {}", job_id, e);
            None
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Job {} panicked: {}", job_id, message);
            Some(fail_unrun(coordinator, job_id, &message))
        }
    }
}

/// Drives a job that never finished normally to `error` with `message`.
fn fail_unrun(coordinator: &Coordinator, job_id: JobId, message: &str) -> JobOutcome {
    let store = coordinator.store();
    if let Ok(view) = store.view(&job_id) {
        if view.status == JobState::Queued {
            let _ = store.start(&job_id);
        }
    }
    if let Err(e) = store.fail(&job_id, message) {
        warn!("Could not record failure for job {}: {}", job_id, e);
    }

    match store.view(&job_id) {
        Ok(view) => JobOutcome::from_view(job_id, &view),
        Err(_) => JobOutcome {
            job_id,
            state: JobState::Error,
            download_url: None,
            error: Some(message.to_string()),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        GENERIC_FAILURE.to_string()
    }
}
