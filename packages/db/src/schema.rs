//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    // Job registry
    db.query(RENDER_JOB_SCHEMA).await?.check()?;

    // Work queue
    db.query(WORK_ITEM_SCHEMA).await?.check()?;

    // Error audit trail
    db.query(WORKER_ERROR_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Render job table schema.
///
/// `batches` is keyed by `"<start>-<end>"` and updated one field at a time,
/// so the table stays schemaless for that object.
const RENDER_JOB_SCHEMA: &str = r#"
-- Render job registry, keyed by source file name
DEFINE TABLE IF NOT EXISTS render_job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS file ON render_job TYPE string;
DEFINE FIELD IF NOT EXISTS range ON render_job TYPE string;
DEFINE FIELD IF NOT EXISTS job_status ON render_job TYPE string DEFAULT "Waiting";
DEFINE FIELD IF NOT EXISTS batches ON render_job TYPE object DEFAULT {};

DEFINE INDEX IF NOT EXISTS render_job_status ON render_job FIELDS job_status;
"#;

/// Work queue table schema.
const WORK_ITEM_SCHEMA: &str = r#"
-- Queued work messages with visibility leases
DEFINE TABLE IF NOT EXISTS work_item SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS body ON work_item TYPE string;
DEFINE FIELD IF NOT EXISTS enqueued_at ON work_item TYPE int;
DEFINE FIELD IF NOT EXISTS visible_at ON work_item TYPE int;
DEFINE FIELD IF NOT EXISTS receive_count ON work_item TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS receipt ON work_item TYPE option<string>;

-- Index for polling visible messages in arrival order
DEFINE INDEX IF NOT EXISTS work_item_visible ON work_item FIELDS visible_at, enqueued_at;
DEFINE INDEX IF NOT EXISTS work_item_receipt ON work_item FIELDS receipt;
"#;

/// Worker error table schema. Rows are appended and never removed.
const WORKER_ERROR_SCHEMA: &str = r#"
-- Permanent audit trail of worker failures
DEFINE TABLE IF NOT EXISTS worker_error SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS worker_id ON worker_error TYPE string;
DEFINE FIELD IF NOT EXISTS success ON worker_error TYPE bool DEFAULT false;
DEFINE FIELD IF NOT EXISTS message ON worker_error TYPE string;
DEFINE FIELD IF NOT EXISTS recorded_at ON worker_error TYPE int;

DEFINE INDEX IF NOT EXISTS worker_error_worker ON worker_error FIELDS worker_id;
"#;
