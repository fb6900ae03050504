//! Completion watcher: finalizes a job once its composite appears.

use std::time::Duration;

use db::{DbError, JobRepository, Transition};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use render_core::artifact::{composite_name, frame_name, source_for_composite, source_stem};
use render_core::JobStatus;
use storage::Storage;

use crate::context::AppContext;
use crate::error::WatcherError;
use crate::messages::WatcherMessage;

/// Attempts at finalizing one composite while the registry fails transiently.
const FINALIZE_ATTEMPTS: u32 = 3;
const FINALIZE_BACKOFF: Duration = Duration::from_millis(200);

/// What the watcher did with a creation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The key is not a composite.
    Ignored,
    /// The job moved to Complete and its frames were removed.
    Completed { file: String, frames: usize },
    /// A duplicate event for a job that was already Complete.
    AlreadyComplete { file: String },
}

#[derive(Clone)]
pub struct CompletionWatcher {
    jobs: JobRepository,
    renders: Storage,
    frames: Storage,
}

impl CompletionWatcher {
    pub fn new(jobs: JobRepository, renders: Storage, frames: Storage) -> Self {
        Self {
            jobs,
            renders,
            frames,
        }
    }

    pub fn from_context(ctx: &AppContext) -> Self {
        Self::new(ctx.jobs.clone(), ctx.renders.clone(), ctx.frames.clone())
    }

    /// Handle the creation of `key` in the render bucket.
    ///
    /// The job moves `Processing -> Complete` before its frames are deleted.
    /// Frame cleanup is best effort: failures are reported but the job stays
    /// Complete and nothing is retried.
    pub async fn on_artifact_created(&self, key: &str) -> Result<WatchOutcome, WatcherError> {
        let Some(file) = source_for_composite(key) else {
            return Ok(WatchOutcome::Ignored);
        };

        let transition = self
            .jobs
            .transition(&file, JobStatus::Processing, JobStatus::Complete)
            .await?;

        let job = self.jobs.get(&file).await?;
        let (Some(job), Some(stem)) = (job, source_stem(&file)) else {
            return Ok(WatchOutcome::Ignored);
        };

        let names: Vec<String> = job.range.frames().map(|f| frame_name(stem, f)).collect();
        let frames = names.len();
        let failed = self.frames.delete_many(names).await;
        if !failed.is_empty() {
            return Err(WatcherError::Cleanup { file, failed });
        }

        Ok(match transition {
            Transition::Applied => WatchOutcome::Completed { file, frames },
            Transition::Stale { .. } => WatchOutcome::AlreadyComplete { file },
        })
    }

    /// Like [`Self::on_artifact_created`], retrying transient registry failures.
    pub async fn finalize(&self, key: &str) -> Result<WatchOutcome, WatcherError> {
        let mut attempt = 1;
        loop {
            match self.on_artifact_created(key).await {
                Err(WatcherError::Registry(ref e))
                    if attempt < FINALIZE_ATTEMPTS && is_transient(e) =>
                {
                    tracing::debug!("Finalizing {} failed (attempt {}): {}", key, attempt, e);
                    tokio::time::sleep(FINALIZE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Finalize every Processing job whose composite already exists.
    ///
    /// Catches up on creation events that were never delivered, for example
    /// after a restart or a lagging subscriber. Returns the finalized files.
    pub async fn reconcile(&self) -> Result<Vec<String>, WatcherError> {
        let mut finalized = Vec::new();
        for job in self.jobs.list_by_status(JobStatus::Processing).await? {
            let Some(stem) = source_stem(&job.file) else {
                continue;
            };
            let composite = composite_name(stem);
            if !self.renders.exists(&composite).await? {
                continue;
            }

            match self.finalize(&composite).await {
                Ok(_) => finalized.push(job.file),
                Err(WatcherError::Cleanup { file, failed }) => {
                    tracing::warn!(file = %file, "{} frame(s) left behind", failed.len());
                    finalized.push(file);
                }
                Err(e) => tracing::warn!("Composite {} not finalized: {}", composite, e),
            }
        }
        Ok(finalized)
    }
}

fn is_transient(e: &DbError) -> bool {
    !matches!(e, DbError::NotFound(_) | DbError::Transition(_))
}

/// Actor wrapper that processes creation events one at a time.
pub struct WatcherActor;

impl Actor for WatcherActor {
    type Msg = WatcherMessage;
    type State = CompletionWatcher;
    type Arguments = CompletionWatcher;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting completion watcher");
        myself.send_message(WatcherMessage::Reconcile)?;
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WatcherMessage::ArtifactCreated { key } => {
                match state.finalize(&key).await {
                    Ok(WatchOutcome::Ignored) => {}
                    Ok(WatchOutcome::Completed { file, frames }) => {
                        tracing::info!(file = %file, frames, "Render job complete");
                    }
                    Ok(WatchOutcome::AlreadyComplete { file }) => {
                        tracing::debug!(file = %file, "Duplicate composite event");
                    }
                    Err(WatcherError::Cleanup { file, failed }) => {
                        for (key, e) in &failed {
                            tracing::warn!(file = %file, "Failed to delete frame {}: {}", key, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Composite {} not finalized: {}", key, e);
                    }
                }
            }

            WatcherMessage::Reconcile => match state.reconcile().await {
                Ok(files) if files.is_empty() => {}
                Ok(files) => tracing::info!("Finalized {} missed job(s): {:?}", files.len(), files),
                Err(e) => tracing::warn!("Reconciling processing jobs failed: {}", e),
            },

            WatcherMessage::Shutdown => {
                tracing::info!("Shutting down completion watcher");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
