//! In-memory job state, the single owner of the state machine.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::events::{JobEvent, JobEventBroadcaster};
use super::model::{JobId, JobRecord, JobResult, JobState, JobStatusView};
use super::progress::checkpoint;
use crate::error::JobError;

/// Message recorded when a failure carries no text of its own.
pub const GENERIC_FAILURE: &str = "Job failed unexpectedly";

#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    events: Option<JobEventBroadcaster>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes every change on `events`.
    pub fn with_events(events: JobEventBroadcaster) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            events: Some(events),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn publish(&self, record: &JobRecord) {
        if let Some(events) = &self.events {
            events.send(JobEvent::from_record(record));
        }
    }

    /// Registers a new job in `queued`.
    pub fn insert(&self, record: JobRecord) -> Result<(), JobError> {
        let mut jobs = self.write();
        if jobs.contains_key(&record.job_id) {
            return Err(JobError::AlreadyExists(record.job_id.to_string()));
        }
        self.publish(&record);
        jobs.insert(record.job_id, record);
        Ok(())
    }

    pub fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.read().get(job_id).cloned()
    }

    /// Pure read of the latest known state.
    pub fn view(&self, job_id: &JobId) -> Result<JobStatusView, JobError> {
        self.read()
            .get(job_id)
            .map(JobRecord::view)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Snapshot of every tracked job, oldest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.read().values().cloned().collect();
        jobs.sort_by_key(|record| record.created_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Applies `update` after checking `record.state -> next` is allowed.
    fn transition<F>(&self, job_id: &JobId, next: JobState, update: F) -> Result<(), JobError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        if !record.state.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                job_id: job_id.to_string(),
                from: record.state.to_string(),
                to: next.to_string(),
            });
        }

        log::debug!("Job {}: {} -> {}", job_id, record.state, next);
        record.state = next;
        update(record);
        record.updated_at = Utc::now();
        self.publish(record);
        Ok(())
    }

    /// `queued -> processing`.
    pub fn start(&self, job_id: &JobId) -> Result<(), JobError> {
        self.transition(job_id, JobState::Processing, |record| {
            record.progress = record.progress.max(checkpoint::STARTED);
        })
    }

    /// Raises the progress hint of a processing job. Lower values and
    /// updates to jobs in any other state are ignored.
    pub fn set_progress(&self, job_id: &JobId, progress: u8) -> Result<(), JobError> {
        let mut jobs = self.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        let progress = progress.min(checkpoint::DONE - 1);
        if record.state == JobState::Processing && progress > record.progress {
            record.progress = progress;
            record.updated_at = Utc::now();
            self.publish(record);
        }
        Ok(())
    }

    /// `processing -> done` with the deliverable's reference.
    pub fn complete(
        &self,
        job_id: &JobId,
        download_url: String,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), JobError> {
        self.transition(job_id, JobState::Done, move |record| {
            record.progress = checkpoint::DONE;
            record.result = Some(JobResult::Download(download_url));
            record.expires_at = expires_at;
        })
    }

    /// `processing -> error`. An empty message is replaced by a generic one
    /// so a failed job always explains itself.
    pub fn fail(&self, job_id: &JobId, message: &str) -> Result<(), JobError> {
        let message = if message.trim().is_empty() {
            GENERIC_FAILURE.to_string()
        } else {
            message.to_string()
        };
        self.transition(job_id, JobState::Error, move |record| {
            record.result = Some(JobResult::Error(message));
        })
    }

    /// Forgets finished jobs last updated before `cutoff`. Returns how many
    /// were dropped.
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, record| !(record.state.is_terminal() && record.updated_at < cutoff));
        before - jobs.len()
    }
}
