//! Actor system for the render farm.
//!
//! This crate provides the Ractor-based workers that render and sequence
//! frames, the completion watcher that finalizes jobs, and the supervisor
//! that owns them.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that owns the watcher and the workers
//! - `WorkerActor` - Polls the work queue and runs one item at a time
//! - `WatcherActor` - Marks jobs complete when their composite appears
//!
//! # Usage
//!
//! ```ignore
//! use actors::{AppContext, CommandEngine, HandlerRegistry, start_supervisor};
//!
//! let ctx = AppContext::new(db, &storage, FarmConfig::from_env()?);
//! let engine = Arc::new(CommandEngine::from_config(&ctx.settings));
//! let handlers = HandlerRegistry::standard(&ctx, engine);
//! let (supervisor, handle) = start_supervisor(ctx, handlers).await?;
//! ```

mod config;
mod context;
mod engine;
mod error;
mod handler;
mod log_sink;
mod messages;
mod render;
mod sequence;
mod supervisor;
mod watcher;
mod worker_actor;
mod workspace;

pub use config::FarmConfig;
pub use context::{AppContext, FRAME_BUCKET, LOG_BUCKET, RENDER_BUCKET};
pub use engine::{CommandEngine, EngineFuture, RenderEngine};
pub use error::{ConfigError, EngineError, HandlerError, LogSinkError, WatcherError};
pub use handler::{HandlerFuture, HandlerOutcome, HandlerRegistry, WorkHandler};
pub use log_sink::{JobLog, LogSink};
pub use messages::{SupervisorMessage, WatcherMessage, WorkerMessage, WorkerStats};
pub use render::RenderHandler;
pub use sequence::SequenceHandler;
pub use supervisor::{Supervisor, SupervisorArgs, start_supervisor};
pub use watcher::{CompletionWatcher, WatchOutcome, WatcherActor};
pub use worker_actor::{WorkerActor, WorkerArgs};
pub use workspace::Workspace;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
