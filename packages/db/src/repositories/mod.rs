//! Repository implementations for database operations.

mod error_repo;
mod job_repo;
mod queue_repo;

use std::future::Future;
use std::time::Duration;

use crate::DbError;

pub use error_repo::{ErrorLogRepository, ErrorRecord};
pub use job_repo::{Admission, JobRepository, Transition};
pub use queue_repo::{Delivery, QueuedMessage, Receipt, WorkQueue};

const MAX_CONFLICT_RETRIES: u32 = 8;

/// Re-run a single-statement write while the engine reports a retryable conflict.
pub(crate) async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < MAX_CONFLICT_RETRIES => {
                attempt += 1;
                tracing::debug!("Write conflict, retrying (attempt {}): {}", attempt, e);
                tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt))).await;
            }
            other => return other,
        }
    }
}
