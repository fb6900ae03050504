//! Sequence handler: every frame of a job into the composite.

use std::path::Path;
use std::sync::Arc;

use futures_util::TryStreamExt;
use render_core::artifact::{composite_name, frame_name, source_stem};
use render_core::{FrameRange, JobStatus, WorkItem, WorkKind};

use crate::context::AppContext;
use crate::engine::RenderEngine;
use crate::error::{HandlerError, WatcherError};
use crate::handler::{HandlerFuture, HandlerOutcome, WorkHandler};
use crate::log_sink::JobLog;
use crate::watcher::{CompletionWatcher, WatchOutcome};
use crate::workspace::Workspace;

/// Frames downloaded concurrently.
const DOWNLOAD_CONCURRENCY: usize = 8;

#[derive(Clone)]
pub struct SequenceHandler {
    ctx: AppContext,
    engine: Arc<dyn RenderEngine>,
    watcher: CompletionWatcher,
}

impl SequenceHandler {
    pub fn new(ctx: AppContext, engine: Arc<dyn RenderEngine>) -> Self {
        let watcher = CompletionWatcher::from_context(&ctx);
        Self {
            ctx,
            engine,
            watcher,
        }
    }

    async fn run(&self, item: &WorkItem, log: &mut JobLog) -> Result<(), HandlerError> {
        let stem = source_stem(&item.file)
            .ok_or_else(|| HandlerError::InvalidItem(format!("not a source file: {}", item.file)))?;
        let range = item
            .range()
            .map_err(|e| HandlerError::InvalidItem(format!("{}: {}", item, e)))?;
        let composite = composite_name(stem);

        // A duplicate sequence item must not redo or undo finished work.
        let job = self
            .ctx
            .jobs
            .get(&item.file)
            .await?
            .ok_or_else(|| HandlerError::InvalidItem(format!("no render job for {}", item.file)))?;
        if job.job_status == JobStatus::Complete {
            log.record(format_args!("{} already complete, nothing to sequence", item.file));
            return Ok(());
        }
        if self
            .ctx
            .renders
            .exists(&composite)
            .await
            .map_err(HandlerError::Storage)?
        {
            log.record(format_args!("{} already exists, nothing to sequence", composite));
            // The creation event may never reach the watcher, so finish the job here.
            return self.finalize(&composite, log).await;
        }

        let workspace = Workspace::acquire(self.ctx.settings.workspace_root.as_deref(), stem)
            .map_err(HandlerError::Workspace)?;
        let result = self
            .sequence_frames(&workspace, item, range, stem, &composite, log)
            .await;
        workspace.release();
        result
    }

    /// Move the job to Complete for a composite that is already stored.
    async fn finalize(&self, composite: &str, log: &mut JobLog) -> Result<(), HandlerError> {
        match self.watcher.finalize(composite).await {
            Ok(WatchOutcome::Completed { file, frames }) => {
                log.record(format_args!("Finalized {}, removed {} frames", file, frames));
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(WatcherError::Cleanup { file, failed }) => {
                log.record(format_args!(
                    "Finalized {}, {} frame(s) left behind",
                    file,
                    failed.len()
                ));
                Ok(())
            }
            Err(e) => Err(HandlerError::Finalize(e)),
        }
    }

    async fn sequence_frames(
        &self,
        workspace: &Workspace,
        item: &WorkItem,
        range: FrameRange,
        stem: &str,
        composite: &str,
        log: &mut JobLog,
    ) -> Result<(), HandlerError> {
        let frames_dir = workspace.subdir(stem).map_err(HandlerError::Workspace)?;
        self.download_frames(&frames_dir, stem, range).await?;
        log.record(format_args!("Downloaded {} frames for sequencing", item.file));

        let output = workspace.path().join(composite);
        self.engine
            .encode(&frames_dir, stem, &output)
            .await
            .map_err(HandlerError::Encode)?;
        log.record(format_args!("Sequenced {}", item.file));

        self.ctx
            .renders
            .put_file(composite, &output)
            .await
            .map_err(|source| HandlerError::Upload {
                key: composite.to_string(),
                source,
            })?;
        log.record(format_args!("Uploaded {} mp4", item.file));

        Ok(())
    }

    async fn download_frames(
        &self,
        frames_dir: &Path,
        stem: &str,
        range: FrameRange,
    ) -> Result<(), HandlerError> {
        futures_util::stream::iter(range.frames().map(Ok::<u32, HandlerError>))
            .try_for_each_concurrent(DOWNLOAD_CONCURRENCY, |frame| async move {
                let name = frame_name(stem, frame);
                let target = frames_dir.join(&name);
                self.ctx
                    .frames
                    .get_file(&name, &target)
                    .await
                    .map_err(|source| HandlerError::Download { key: name, source })
            })
            .await
    }
}

impl WorkHandler for SequenceHandler {
    fn kind(&self) -> WorkKind {
        WorkKind::Sequence
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
