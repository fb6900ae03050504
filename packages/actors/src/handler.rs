//! Work handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use render_core::{WorkItem, WorkKind};

use crate::context::AppContext;
use crate::engine::RenderEngine;
use crate::error::HandlerError;
use crate::log_sink::JobLog;
use crate::render::RenderHandler;
use crate::sequence::SequenceHandler;

/// Result of running a handler on one work item.
#[derive(Debug)]
pub struct HandlerOutcome {
    pub success: bool,
    /// Transcript of the steps taken, forwarded to the log sink either way.
    pub log: String,
    /// The failing step, when `success` is false.
    pub error: Option<HandlerError>,
}

impl HandlerOutcome {
    pub fn succeeded(log: JobLog) -> Self {
        Self {
            success: true,
            log: log.into_string(),
            error: None,
        }
    }

    pub fn failed(log: JobLog, error: HandlerError) -> Self {
        Self {
            success: false,
            log: log.into_string(),
            error: Some(error),
        }
    }

    pub(crate) fn from_result(log: JobLog, result: Result<(), HandlerError>) -> Self {
        match result {
            Ok(()) => Self::succeeded(log),
            Err(e) => Self::failed(log, e),
        }
    }
}

/// Future type for async work handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerOutcome> + Send>>;

/// Trait for work handlers.
///
/// Handlers never return errors: every failure is folded into the outcome so
/// the worker loop keeps running.
pub trait WorkHandler: Send + Sync + 'static {
    /// The kind of work this handler processes.
    fn kind(&self) -> WorkKind;

    /// Process an item.
    fn handle(&self, item: WorkItem) -> HandlerFuture;
}

/// Maps work kinds to their handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<WorkKind, Arc<dyn WorkHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The render and sequence handlers backed by `engine`.
    pub fn standard(ctx: &AppContext, engine: Arc<dyn RenderEngine>) -> Self {
        let mut registry = Self::new();
        registry.register(RenderHandler::new(ctx.clone(), engine.clone()));
        registry.register(SequenceHandler::new(ctx.clone(), engine));
        registry
    }

    /// Register a handler, replacing any previous one for the same kind.
    pub fn register<H: WorkHandler>(&mut self, handler: H) {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub fn get(&self, kind: WorkKind) -> Option<Arc<dyn WorkHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn has_handler(&self, kind: WorkKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}
