//! Periodic retention sweeps on a background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};

use super::Reaper;
use crate::error::WorkerError;

/// Runs the reaper every `interval`, or sooner when triggered.
pub struct RetentionScheduler {
    reaper: Arc<Reaper>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl RetentionScheduler {
    pub fn new(reaper: Arc<Reaper>, interval: Duration) -> Self {
        Self {
            reaper,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Starts the sweep loop in a background thread.
    /// Every message on `trigger_rx` runs an extra sweep immediately.
    pub fn start(
        &self,
        mut trigger_rx: broadcast::Receiver<()>,
    ) -> Result<JoinHandle<()>, WorkerError> {
        let reaper = Arc::clone(&self.reaper);
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);
        let interval = self.interval;

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| WorkerError::Scheduler(e.to_string()))?;

        std::thread::Builder::new()
            .name("retention-scheduler".to_string())
            .spawn(move || {
                rt.block_on(async {
                    let mut interval_timer = tokio::time::interval(interval);
                    interval_timer.tick().await; // skip immediate first tick
                    let mut triggers_open = true;

                    loop {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        tokio::select! {
                            _ = interval_timer.tick() => {},
                            trigger = trigger_rx.recv(), if triggers_open => match trigger {
                                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                                    log::info!("Manual retention sweep triggered");
                                }
                                Err(broadcast::error::RecvError::Closed) => {
                                    // Nobody can trigger any more; keep the timer
                                    triggers_open = false;
                                    continue;
                                }
                            },
                            _ = wake.notified() => {},
                        }

                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        // Object store deletes use a blocking HTTP client
                        let sweep_reaper = Arc::clone(&reaper);
                        match tokio::task::spawn_blocking(move || sweep_reaper.sweep()).await {
                            Ok(report) => log::debug!(
                                "Retention sweep finished: {} deleted, {} failed",
                                report.deleted,
                                report.failed
                            ),
                            Err(e) => log::error!("Retention sweep aborted: {}", e),
                        }
                    }
                });
                log::debug!("Retention scheduler stopped");
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))
    }

    /// Signals the scheduler to stop after any sweep in progress.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}
