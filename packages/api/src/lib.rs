//! Submission API for the render farm.
//!
//! This crate contains the job splitter and the HTTP surface in front of it:
//! - `submit_job` validates a request, admits the job and queues its batches
//! - `router` exposes submission as `POST /api/jobs`
//! - `init_render_farm` wires a node together from the environment

mod http;
mod init;
mod jobs;

pub use http::router;
pub use init::{RenderFarm, init_render_farm};
pub use jobs::{ApiResponse, SubmitError, SubmitResponse, submit_job};

// Re-export core types for convenience
pub use render_core::{JobProgress, JobStatus, SubmitRequest};
