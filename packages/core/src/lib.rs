//! Core domain types for the render farm.
//!
//! This crate contains shared types used across all packages:
//! - RenderJob, JobStatus and BatchStatus for job/batch progress
//! - WorkItem for queued work
//! - LogEntry for worker outcome and error logs
//! - Artifact naming and submission validation

pub mod artifact;
mod error;
mod job;
mod log_entry;
mod submit;
mod work;

pub use error::{TransitionError, ValidationError};
pub use job::{
    BatchKey, BatchMap, BatchStatus, DEFAULT_BATCH_SIZE, FrameRange, JobProgress, JobStatus,
    JobView, RenderJob, outstanding_batches,
};
pub use log_entry::{LogEntry, LogKind};
pub use submit::{SubmitRequest, Submission};
pub use work::{WorkItem, WorkKind};
