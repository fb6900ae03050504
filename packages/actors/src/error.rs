//! Error types for handlers, engines, the watcher and the log sink.

use db::DbError;
use render_core::FrameRange;
use storage::StorageError;
use thiserror::Error;

/// Failure of one step of a render or sequence handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid work item: {0}")]
    InvalidItem(String),

    #[error("{0}")]
    Workspace(#[source] std::io::Error),

    #[error("{key}: {source}")]
    Download {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("frames {range}: {source}")]
    Render {
        range: FrameRange,
        #[source]
        source: EngineError,
    },

    #[error("renderer produced no {0}")]
    MissingFrame(String),

    #[error("{key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Registry(#[from] DbError),

    #[error("{0}")]
    Enqueue(#[source] DbError),

    #[error("{0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Encode(#[source] EngineError),

    #[error("{0}")]
    Storage(#[source] StorageError),

    #[error("{0}")]
    Finalize(#[source] WatcherError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Name of the step that failed, used to label error log entries.
    pub fn step(&self) -> &'static str {
        match self {
            HandlerError::InvalidItem(_) => "decode",
            HandlerError::Workspace(_) => "workspace",
            HandlerError::Download { .. } => "download",
            HandlerError::Render { .. } | HandlerError::MissingFrame(_) => "render",
            HandlerError::Upload { .. } => "upload",
            HandlerError::Registry(_) => "registry",
            HandlerError::Enqueue(_) | HandlerError::Serialize(_) => "enqueue",
            HandlerError::Encode(_) => "encode",
            HandlerError::Storage(_) => "storage",
            HandlerError::Finalize(_) => "finalize",
            HandlerError::Panicked(_) => "panic",
        }
    }
}

/// Failure of an external render or encode program.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Failure while finalizing a job after its composite appeared.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error(transparent)]
    Registry(#[from] DbError),

    #[error("render bucket: {0}")]
    Storage(#[from] StorageError),

    /// The job is Complete but some frames could not be removed.
    #[error("failed to delete {count} frame(s) of {file}", count = .failed.len())]
    Cleanup {
        file: String,
        failed: Vec<(String, StorageError)>,
    },
}

#[derive(Debug, Error)]
pub enum LogSinkError {
    #[error("log storage: {0}")]
    Storage(#[from] StorageError),

    #[error("error table: {0}")]
    Registry(#[from] DbError),
}

/// Invalid node configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
