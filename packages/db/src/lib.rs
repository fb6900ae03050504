//! SurrealDB integration for the render farm.
//!
//! This crate provides database connectivity and the repositories behind
//! the job registry, the work queue and the worker error audit trail.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage
//! - `remote`: Connect to a SurrealDB server over WebSocket

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use repositories::{
    Admission, Delivery, ErrorLogRepository, JobRepository, QueuedMessage, Receipt, Transition,
    WorkQueue,
};
pub use schema::init_schema;

/// Connect and make sure the schema exists.
///
/// This should be called once at application startup.
pub async fn init(config: DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
