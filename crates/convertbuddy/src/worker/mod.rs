pub mod pool;

pub use pool::WorkerPool;

use crate::error::WorkerError;
use crate::job::ConversionTask;

/// Where submitted jobs are sent to run asynchronously.
pub trait ExecutionFacility: Send + Sync {
    /// Hands `task` off without waiting for it to run.
    fn submit(&self, task: ConversionTask) -> Result<(), WorkerError>;
}
