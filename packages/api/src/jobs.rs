//! Job submission: validation, admission and batch enqueue.

use actors::AppContext;
use axum::http::StatusCode;
use chrono::{DateTime, SecondsFormat, Utc};
use db::{Admission, DbError};
use render_core::{JobProgress, RenderJob, SubmitRequest, ValidationError, WorkItem};
use storage::StorageError;
use thiserror::Error;

/// Successful answer to a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResponse {
    /// The job was admitted by this call and its batches are queued.
    Accepted { at: DateTime<Utc> },
    /// A job for the file already exists; nothing was created or queued.
    Status(JobProgress),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("registry error: {0}")]
    Registry(DbError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("queue error: {0}")]
    Queue(DbError),
}

/// Submit a render job.
///
/// A file that already has a job gets that job's progress back. Otherwise
/// the source must exist in the render bucket; one render item per batch is
/// queued and then the job is created once.
pub async fn submit_job(
    ctx: &AppContext,
    request: SubmitRequest,
) -> Result<SubmitResponse, SubmitError> {
    let submission = request.validate()?;

    if let Some(job) = ctx
        .jobs
        .get(&submission.file)
        .await
        .map_err(SubmitError::Registry)?
    {
        tracing::debug!("Job for {} already submitted", job.file);
        return Ok(SubmitResponse::Status(job.progress()));
    }

    if !ctx.renders.exists(&submission.file).await? {
        return Err(SubmitError::SourceNotFound(submission.file));
    }

    let job = RenderJob::new(
        submission.file,
        submission.range,
        ctx.settings.batch_size,
    );

    // Items go out before the record: a failed enqueue leaves no job behind,
    // and a retried submission collapses onto the same dedup keys.
    for batch in job.batches.keys() {
        let item = WorkItem::render(job.file.clone(), *batch);
        let body = item
            .to_json()
            .map_err(|e| SubmitError::Queue(DbError::Serialization(e.to_string())))?;
        let queued = ctx
            .queue
            .send_unique(item.dedup_key(), body)
            .await
            .map_err(SubmitError::Queue)?;
        if !queued {
            tracing::debug!("Render item {} already queued", item);
        }
    }

    match ctx.jobs.create(&job).await.map_err(SubmitError::Registry)? {
        Admission::Created(_) => {}
        Admission::Existing(existing) => {
            tracing::debug!("Lost admission race for {}", existing.file);
            return Ok(SubmitResponse::Status(existing.progress()));
        }
    }

    tracing::info!(
        file = %job.file,
        range = %job.range,
        batches = job.batches.len(),
        "Accepted render job"
    );

    Ok(SubmitResponse::Accepted { at: Utc::now() })
}

/// Status code and plain-text body returned to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            body: body.into(),
        }
    }

    pub fn bad_request(reason: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: format!("Bad Request: {reason}"),
        }
    }

    pub fn internal_error(reason: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: format!("Internal Server Error: {reason}"),
        }
    }
}

impl From<SubmitResponse> for ApiResponse {
    fn from(response: SubmitResponse) -> Self {
        match response {
            SubmitResponse::Accepted { at } => ApiResponse::ok(format!(
                "accepted at time {}",
                at.to_rfc3339_opts(SecondsFormat::Millis, true)
            )),
            SubmitResponse::Status(progress) => ApiResponse::ok(progress.to_string()),
        }
    }
}

impl From<SubmitError> for ApiResponse {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Validation(e) => ApiResponse::bad_request(e),
            other => {
                tracing::warn!("Submission failed: {}", other);
                ApiResponse::internal_error(other)
            }
        }
    }
}

impl From<Result<SubmitResponse, SubmitError>> for ApiResponse {
    fn from(result: Result<SubmitResponse, SubmitError>) -> Self {
        result.map_or_else(ApiResponse::from, ApiResponse::from)
    }
}
