//! Append-only audit trail of worker failures.

use chrono::Utc;
use render_core::LogEntry;
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use ulid::Ulid;

use crate::{Database, DbError};

#[derive(Clone)]
pub struct ErrorLogRepository {
    db: Database,
}

/// A stored error entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub worker_id: String,
    pub success: bool,
    pub message: String,
    /// Unix milliseconds.
    pub recorded_at: i64,
}

#[derive(Debug, Deserialize)]
struct StoredRecord {
    #[allow(dead_code)]
    id: Option<Thing>,
    #[serde(flatten)]
    record: ErrorRecord,
}

impl ErrorLogRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append an entry. Entries are never updated or removed.
    pub async fn append(&self, entry: &LogEntry) -> Result<ErrorRecord, DbError> {
        let record = ErrorRecord {
            worker_id: entry.id.clone(),
            success: entry.success,
            message: entry.message.clone(),
            recorded_at: Utc::now().timestamp_millis(),
        };

        let created: Option<StoredRecord> = self
            .db
            .create(("worker_error", Ulid::new().to_string()))
            .content(record)
            .await?;

        created
            .map(|r| r.record)
            .ok_or_else(|| DbError::Query("Failed to record worker error".into()))
    }

    /// All entries recorded by one worker, oldest first.
    pub async fn list_for_worker(&self, worker_id: &str) -> Result<Vec<ErrorRecord>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM worker_error WHERE worker_id = $worker ORDER BY recorded_at ASC")
            .bind(("worker", worker_id.to_string()))
            .await?;

        let records: Vec<StoredRecord> = result.take(0)?;
        Ok(records.into_iter().map(|r| r.record).collect())
    }

    /// All entries, oldest first.
    pub async fn list(&self) -> Result<Vec<ErrorRecord>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM worker_error ORDER BY recorded_at ASC")
            .await?;

        let records: Vec<StoredRecord> = result.take(0)?;
        Ok(records.into_iter().map(|r| r.record).collect())
    }
}
