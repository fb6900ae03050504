//! Database connection management.
//!
//! Connections are explicit handles: open one per process with [`connect`] and
//! hand clones to every component that needs the registry or the queue.

use render_core::TransitionError;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect as connect_any};
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database connection handle. Cheap to clone.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "rocksdb://path" or "ws://host:port"
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "renderfarm".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Build a config from environment variables.
    ///
    /// - `SURREAL_ENDPOINT` (default: `mem://`, e.g. `rocksdb://./data/db` or `ws://db:8000`)
    /// - `SURREAL_NAMESPACE` (default: `renderfarm`)
    /// - `SURREAL_DATABASE` (default: `main`)
    /// - `SURREAL_USER` / `SURREAL_PASS` (optional root credentials, both required)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut cfg = Self {
            endpoint: var("SURREAL_ENDPOINT").unwrap_or(defaults.endpoint),
            namespace: var("SURREAL_NAMESPACE").unwrap_or(defaults.namespace),
            database: var("SURREAL_DATABASE").unwrap_or(defaults.database),
            credentials: None,
        };
        if let (Some(user), Some(pass)) = (var("SURREAL_USER"), var("SURREAL_PASS")) {
            cfg = cfg.with_credentials(user, pass);
        }
        cfg
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
///
/// Every variant except `NotFound` and `Transition` is an infrastructure
/// failure that callers treat as transient.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl DbError {
    /// Check if the error is a write conflict the engine asks us to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Connection(e) if e.to_string().contains("can be retried"))
    }

    /// Check if the error reports a record id that is already taken.
    pub fn is_record_exists(&self) -> bool {
        matches!(self, DbError::Connection(e) if e.to_string().contains("already exists"))
    }
}

/// Open a database connection.
///
/// This should be called once at process startup; the returned handle is
/// shared by cloning.
pub async fn connect(config: DbConfig) -> Result<Database, DbError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = connect_any(&config.endpoint).await?;

    // Authenticate if credentials provided
    if let Some((username, password)) = &config.credentials {
        db.signin(Root { username, password }).await?;
    }

    // Select namespace and database
    db.use_ns(&config.namespace).use_db(&config.database).await?;

    tracing::info!(
        "Connected to database: {}/{}",
        config.namespace,
        config.database
    );

    Ok(db)
}
