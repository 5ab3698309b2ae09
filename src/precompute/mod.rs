//! Long-range precomputation pipeline
//!
//! A priority scheduler drives the orbit engine over a time range for a whole
//! constellation and hands the samples to the batch processor.

pub mod executor;
pub mod job;
pub mod manager;
pub mod queue;

pub use executor::{JobExecutor, data_quality};
pub use job::{JobError, JobRequest, JobStatus, PrecomputeJob};
pub use manager::{JobManager, SystemStatus};
pub use queue::JobQueue;
