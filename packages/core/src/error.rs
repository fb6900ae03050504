//! Error types shared by every package.

use thiserror::Error;

use crate::job::{BatchStatus, JobStatus};

/// Malformed submission input. Surfaced to the caller, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("file must be a Blender .blend file")]
    NotBlendFile,
    #[error("start and end frames must be integers")]
    NotInteger,
    #[error("start frame must be ≤ end frame")]
    StartAfterEnd,
    #[error("malformed frame range: {0}")]
    MalformedRange(String),
}

/// A status write that the legal-transition table forbids.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal job transition {from} -> {to}")]
    Job { from: JobStatus, to: JobStatus },
    #[error("illegal batch transition {from} -> {to}")]
    Batch { from: BatchStatus, to: BatchStatus },
    #[error("{0} has no predecessor status")]
    Initial(JobStatus),
}
