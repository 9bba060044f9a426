//! Reclaims job storage once it outlives the retention window.

pub mod scheduler;

pub use scheduler::RetentionScheduler;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info_span;

use crate::config::Config;
use crate::job::JobStore;
use crate::storage::StorageBackend;

/// Result of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deleted: usize,
    pub failed: usize,
    pub cutoff: DateTime<Utc>,
    /// Finished job records forgotten alongside their storage.
    pub pruned_jobs: usize,
}

pub struct Reaper {
    backend: Arc<dyn StorageBackend>,
    retention: Duration,
    store: Option<Arc<JobStore>>,
}

impl Reaper {
    pub fn new(backend: Arc<dyn StorageBackend>, retention: Duration) -> Self {
        Self {
            backend,
            retention,
            store: None,
        }
    }

    pub fn from_config(config: &Config, backend: Arc<dyn StorageBackend>) -> Self {
        Self::new(backend, hours(config.retention.expiry_hours))
    }

    /// Also drops finished records from `store` once their storage is gone.
    pub fn with_store(mut self, store: Arc<JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// Deletes everything last modified before `now - retention`.
    ///
    /// Storage goes first: a record that outlives its objects only points at
    /// a dead reference, never the other way round.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let cutoff = now
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let _span = info_span!("retention_sweep", backend = %self.backend.kind()).entered();

        let purge = self.backend.purge_older_than(cutoff);
        let pruned_jobs = self
            .store
            .as_ref()
            .map(|store| store.prune_finished_before(cutoff))
            .unwrap_or(0);

        if purge.failed > 0 {
            log::warn!(
                "Retention sweep deleted {} item(s), {} could not be deleted (cutoff {})",
                purge.deleted,
                purge.failed,
                cutoff.to_rfc3339()
            );
        } else {
            log::info!(
                "Retention sweep deleted {} item(s) (cutoff {})",
                purge.deleted,
                cutoff.to_rfc3339()
            );
        }

        SweepReport {
            deleted: purge.deleted,
            failed: purge.failed,
            cutoff,
            pruned_jobs,
        }
    }
}

fn hours(count: u64) -> Duration {
    i64::try_from(count)
        .ok()
        .and_then(Duration::try_hours)
        .unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, JobRecord};
    use crate::storage::LocalBackend;
    use tempfile::TempDir;

    fn backend(temp_dir: &TempDir) -> Arc<LocalBackend> {
        Arc::new(LocalBackend::new(temp_dir.path(), "/files").unwrap())
    }

    #[test]
    fn test_recent_namespaces_survive() {
        let temp_dir = TempDir::new().unwrap();
        let backend = backend(&temp_dir);
        let job_id = JobId::new();
        backend.create_namespace(&job_id).unwrap();

        let reaper = Reaper::new(backend.clone(), Duration::hours(24));
        let report = reaper.sweep();

        assert_eq!(report.deleted, 0);
        assert_eq!(report.failed, 0);
        assert!(temp_dir.path().join(job_id.to_string()).exists());
    }

    #[test]
    fn test_expired_namespaces_are_deleted() {
        let temp_dir = TempDir::new().unwrap();
        let backend = backend(&temp_dir);
        let job_id = JobId::new();
        backend.create_namespace(&job_id).unwrap();

        let reaper = Reaper::new(backend.clone(), Duration::hours(24));
        let now = Utc::now() + Duration::hours(25);
        let report = reaper.sweep_at(now);

        assert_eq!(report.deleted, 1);
        assert_eq!(report.cutoff, now - Duration::hours(24));
        assert!(!temp_dir.path().join(job_id.to_string()).exists());
    }

    #[test]
    fn test_sweep_prunes_finished_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(JobStore::new());
        let finished = JobId::new();
        store
            .insert(JobRecord::new(finished, "mp4->mp3", vec![]))
            .unwrap();
        store.start(&finished).unwrap();
        store.fail(&finished, "boom").unwrap();
        let pending = JobId::new();
        store
            .insert(JobRecord::new(pending, "mp4->mp3", vec![]))
            .unwrap();

        let reaper = Reaper::new(backend(&temp_dir), Duration::hours(1)).with_store(store.clone());
        let report = reaper.sweep_at(Utc::now() + Duration::hours(2));

        assert_eq!(report.pruned_jobs, 1);
        assert!(store.get(&finished).is_none());
        assert!(store.get(&pending).is_some());
    }

    #[test]
    fn test_retention_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.retention.expiry_hours = 48;
        let reaper = Reaper::from_config(&config, backend(&temp_dir));
        assert_eq!(reaper.retention(), Duration::hours(48));
    }

    #[test]
    fn test_huge_retention_does_not_overflow() {
        let temp_dir = TempDir::new().unwrap();
        let reaper = Reaper::new(backend(&temp_dir), hours(u64::MAX));
        let report = reaper.sweep();
        assert_eq!(report.cutoff, DateTime::<Utc>::MIN_UTC);
        assert_eq!(report.deleted, 0);
    }
}
