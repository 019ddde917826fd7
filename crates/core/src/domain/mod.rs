// Domain Layer - Pure data model of the queue protocol

pub mod input;
pub mod job;
pub mod status;

// Re-exports
pub use input::{FileInput, InputValue};
pub use job::{JobId, JobRequest, JobResult, QueuePriority};
pub use status::{
    CompletedStatus, InProgressStatus, InQueueStatus, JobFailure, JobStatus, LogLevel, LogLine,
    LogSource, Metrics, StatusTracker,
};
