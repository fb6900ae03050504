//! Shared handles passed to every component of a node.

use std::sync::Arc;

use db::{Database, ErrorLogRepository, JobRepository, WorkQueue};
use storage::Storage;

use crate::config::FarmConfig;

/// Key prefix of the bucket holding sources and composites.
pub const RENDER_BUCKET: &str = "renders";
/// Key prefix of the bucket holding per-frame images.
pub const FRAME_BUCKET: &str = "frames";
/// Key prefix of the bucket holding worker logs.
pub const LOG_BUCKET: &str = "logs";

/// Buffered creation events on the render bucket.
const RENDER_EVENT_CAPACITY: usize = 256;

/// Everything a node needs to talk to the registry, the queue and the buckets.
///
/// Cloning is cheap; every clone shares the same connections and the same
/// render-bucket notification channel.
#[derive(Clone)]
pub struct AppContext {
    pub jobs: JobRepository,
    pub queue: WorkQueue,
    pub errors: ErrorLogRepository,
    pub renders: Storage,
    pub frames: Storage,
    pub logs: Storage,
    pub settings: Arc<FarmConfig>,
}

impl AppContext {
    /// Build the context from an open database and a root object store.
    pub fn new(db: Database, storage: &Storage, settings: FarmConfig) -> Self {
        Self {
            jobs: JobRepository::new(db.clone()),
            queue: WorkQueue::new(db.clone()),
            errors: ErrorLogRepository::new(db),
            renders: storage
                .scoped(RENDER_BUCKET)
                .with_notifications(RENDER_EVENT_CAPACITY),
            frames: storage.scoped(FRAME_BUCKET),
            logs: storage.scoped(LOG_BUCKET),
            settings: Arc::new(settings),
        }
    }
}
