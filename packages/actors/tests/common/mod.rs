#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actors::{AppContext, EngineError, EngineFuture, FarmConfig, RenderEngine};
use bytes::Bytes;
use db::DbConfig;
use render_core::artifact::frame_name;
use render_core::{DEFAULT_BATCH_SIZE, FrameRange, RenderJob, WorkItem};
use storage::{Storage, StorageConfig};

/// Writes placeholder frames and composites instead of running real programs.
#[derive(Default)]
pub struct FakeEngine {
    pub renders: AtomicUsize,
    pub encodes: AtomicUsize,
}

impl RenderEngine for FakeEngine {
    fn render<'a>(
        &'a self,
        _source: &'a Path,
        out_dir: &'a Path,
        stem: &'a str,
        range: FrameRange,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            for frame in range.frames() {
                let name = frame_name(stem, frame);
                tokio::fs::write(out_dir.join(name), format!("frame {frame}")).await?;
            }
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn encode<'a>(
        &'a self,
        frames_dir: &'a Path,
        _stem: &'a str,
        output: &'a Path,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(frames_dir).await?;
            let mut frames = 0;
            while entries.next_entry().await?.is_some() {
                frames += 1;
            }
            if frames == 0 {
                return Err(EngineError::Failed {
                    program: "fake-encoder".into(),
                    code: Some(1),
                    stderr: "no input frames".into(),
                });
            }
            tokio::fs::write(output, format!("composite of {frames} frames")).await?;
            self.encodes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

pub fn test_config() -> FarmConfig {
    FarmConfig::default()
        .with_batch_size(DEFAULT_BATCH_SIZE)
        .with_workers(2)
        .with_poll_backoff(Duration::from_millis(20))
        .with_visibility_timeout(Duration::from_secs(30))
}

/// A context over a fresh in-memory database and object store.
pub async fn setup(settings: FarmConfig) -> Result<AppContext, Box<dyn std::error::Error>> {
    let db = db::init(DbConfig::memory()).await?;
    let storage = Storage::new(StorageConfig::memory()).await?;
    Ok(AppContext::new(db, &storage, settings))
}

/// Upload a source, admit its job and queue one render item per batch.
pub async fn seed_job(
    ctx: &AppContext,
    file: &str,
    range: FrameRange,
) -> Result<RenderJob, Box<dyn std::error::Error>> {
    ctx.renders
        .put_bytes(file, Bytes::from_static(b"BLENDER-v300"))
        .await?;

    let job = RenderJob::new(file, range, ctx.settings.batch_size);
    ctx.jobs.create(&job).await?;
    for batch in job.batches.keys() {
        let item = WorkItem::render(file, *batch);
        ctx.queue.send_unique(item.dedup_key(), item.to_json()?).await?;
    }
    Ok(job)
}

/// Poll `check` until it holds or about ten seconds pass.
pub async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
