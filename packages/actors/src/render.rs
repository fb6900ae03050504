//! Render handler: one batch of frames from source to the frames bucket.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::TryStreamExt;
use render_core::artifact::{frame_name, source_stem};
use render_core::{
    BatchStatus, FrameRange, JobStatus, RenderJob, WorkItem, WorkKind, outstanding_batches,
};

use db::{DbError, Transition};

use crate::context::AppContext;
use crate::engine::RenderEngine;
use crate::error::HandlerError;
use crate::handler::{HandlerFuture, HandlerOutcome, WorkHandler};
use crate::log_sink::JobLog;
use crate::workspace::Workspace;

/// Frames uploaded concurrently per batch.
const UPLOAD_CONCURRENCY: usize = 8;

/// Lookups of a job whose render items were queued before its record.
const ADMISSION_ATTEMPTS: u32 = 5;
const ADMISSION_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct RenderHandler {
    ctx: AppContext,
    engine: Arc<dyn RenderEngine>,
}

impl RenderHandler {
    pub fn new(ctx: AppContext, engine: Arc<dyn RenderEngine>) -> Self {
        Self { ctx, engine }
    }

    async fn run(&self, item: &WorkItem, log: &mut JobLog) -> Result<(), HandlerError> {
        let stem = source_stem(&item.file)
            .ok_or_else(|| HandlerError::InvalidItem(format!("not a source file: {}", item.file)))?;
        let batch = item
            .range()
            .map_err(|e| HandlerError::InvalidItem(format!("{}: {}", item, e)))?;

        // A render item replayed after completion would recreate deleted frames.
        let job = self.load_job(&item.file).await?;
        if job.job_status == JobStatus::Complete {
            log.record(format_args!("{} already complete, skipping frames {}", item.file, batch));
            return Ok(());
        }

        let workspace = Workspace::acquire(self.ctx.settings.workspace_root.as_deref(), stem)
            .map_err(HandlerError::Workspace)?;
        let result = self.render_batch(&workspace, item, batch, stem, log).await;
        workspace.release();
        result?;

        self.record_batch(item, batch, log).await
    }

    /// Load the item's job, giving an admission in flight time to store it.
    async fn load_job(&self, file: &str) -> Result<RenderJob, HandlerError> {
        let mut attempt = 1;
        loop {
            if let Some(job) = self.ctx.jobs.get(file).await? {
                return Ok(job);
            }
            if attempt == ADMISSION_ATTEMPTS {
                return Err(HandlerError::InvalidItem(format!("no render job for {}", file)));
            }
            tokio::time::sleep(ADMISSION_BACKOFF).await;
            attempt += 1;
        }
    }

    async fn render_batch(
        &self,
        workspace: &Workspace,
        item: &WorkItem,
        batch: FrameRange,
        stem: &str,
        log: &mut JobLog,
    ) -> Result<(), HandlerError> {
        let source = workspace.path().join(&item.file);
        self.ctx
            .renders
            .get_file(&item.file, &source)
            .await
            .map_err(|source| HandlerError::Download {
                key: item.file.clone(),
                source,
            })?;
        log.record(format_args!("Downloaded file {} for render", item.file));

        let out_dir = workspace.subdir(stem).map_err(HandlerError::Workspace)?;
        self.engine
            .render(&source, &out_dir, stem, batch)
            .await
            .map_err(|source| HandlerError::Render {
                range: batch,
                source,
            })?;
        log.record(format_args!(
            "Rendered animation {} frames {} to {}",
            item.file, batch.start, batch.end
        ));

        self.upload_frames(&out_dir, stem, batch).await?;
        log.record(format_args!(
            "Uploaded {} frames {} to {}",
            item.file, batch.start, batch.end
        ));

        Ok(())
    }

    /// Upload every frame of the batch; the first failure aborts the rest.
    ///
    /// Re-uploading after a redelivery overwrites frames by name.
    async fn upload_frames(
        &self,
        out_dir: &Path,
        stem: &str,
        batch: FrameRange,
    ) -> Result<(), HandlerError> {
        futures_util::stream::iter(batch.frames().map(Ok::<u32, HandlerError>))
            .try_for_each_concurrent(UPLOAD_CONCURRENCY, |frame| async move {
                let name = frame_name(stem, frame);
                let path = out_dir.join(&name);
                match self.ctx.frames.put_file(&name, &path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_not_found() => Err(HandlerError::MissingFrame(name)),
                    Err(source) => Err(HandlerError::Upload { key: name, source }),
                }
            })
            .await
    }

    /// Mark the batch done and hand the job over to sequencing if it was the last.
    async fn record_batch(
        &self,
        item: &WorkItem,
        batch: FrameRange,
        log: &mut JobLog,
    ) -> Result<(), HandlerError> {
        let batches = self
            .ctx
            .jobs
            .update_batch(&item.file, batch, BatchStatus::Complete)
            .await?;
        log.record(format_args!("Marked {} batch {} complete", item.file, batch));

        let remaining = outstanding_batches(&batches);
        if remaining > 0 {
            tracing::debug!(file = %item.file, remaining, "Batches still rendering");
            return Ok(());
        }

        // Racing last-batch workers agree through the compare-and-swap; every
        // one that sees the job in Processing enqueues under the same key.
        let transition = self
            .ctx
            .jobs
            .transition(&item.file, JobStatus::Waiting, JobStatus::Processing)
            .await?;
        if let Transition::Stale {
            current: JobStatus::Complete,
        } = transition
        {
            log.record(format_args!("{} already sequenced", item.file));
            return Ok(());
        }

        let job = self
            .ctx
            .jobs
            .get(&item.file)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Render job not found: {}", item.file)))?;

        let sequence = WorkItem::sequence(&item.file, job.range);
        let queued = self
            .ctx
            .queue
            .send_unique(sequence.dedup_key(), sequence.to_json()?)
            .await
            .map_err(HandlerError::Enqueue)?;

        if queued {
            tracing::info!(file = %item.file, "All batches rendered, sequence queued");
            log.record(format_args!("Submitted {} sequence job", item.file));
        } else {
            log.record(format_args!("Sequence job for {} already queued", item.file));
        }
        Ok(())
    }
}

impl WorkHandler for RenderHandler {
    fn kind(&self) -> WorkKind {
        WorkKind::Render
    }

    fn handle(&self, item: WorkItem) -> HandlerFuture {
        let this = self.clone();
        Box::pin(async move {
            let mut log = JobLog::new();
            let result = this.run(&item, &mut log).await;
            HandlerOutcome::from_result(log, result)
        })
    }
}
