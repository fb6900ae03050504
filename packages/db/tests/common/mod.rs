use db::{Database, DbConfig, DbError};

/// A fresh in-memory database with the schema applied.
///
/// Every call opens its own `mem://` instance, so tests run in parallel
/// without sharing state.
pub async fn setup_db() -> Result<Database, DbError> {
    db::init(DbConfig::memory()).await
}
