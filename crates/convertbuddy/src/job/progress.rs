//! Advisory progress checkpoints.

/// Progress values reported at fixed points of a job.
pub mod checkpoint {
    pub const QUEUED: u8 = 0;
    pub const STARTED: u8 = 5;
    pub const CONVERTED: u8 = 60;
    pub const PACKAGED: u8 = 90;
    pub const DONE: u8 = 100;
}

/// Receives progress hints for one job. Best-effort: implementations must
/// not fail the job.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: u8, message: &str);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _progress: u8, _message: &str) {}
}
