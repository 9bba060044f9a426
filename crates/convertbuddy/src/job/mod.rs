pub mod coordinator;
pub mod events;
pub mod model;
pub mod progress;
pub mod store;
pub mod workspace;

pub use coordinator::{failure_message, Coordinator};
pub use events::{JobEvent, JobEventBroadcaster};
pub use model::{
    ConversionTask, JobId, JobOutcome, JobRecord, JobResult, JobState, JobStatusView,
};
pub use progress::{checkpoint, NoopProgress, ProgressReporter};
pub use store::{JobStore, GENERIC_FAILURE};
pub use workspace::Workspace;
