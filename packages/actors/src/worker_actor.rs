//! Worker actor: poll, execute, acknowledge.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use db::{Delivery, WorkQueue};
use futures_util::FutureExt;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use render_core::{LogEntry, WorkItem};

use crate::error::HandlerError;
use crate::handler::{HandlerOutcome, HandlerRegistry};
use crate::log_sink::{JobLog, LogSink};
use crate::messages::{WorkerMessage, WorkerStats};

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID, also the name of its log object.
    pub worker_id: String,
    queue: WorkQueue,
    handlers: Arc<HandlerRegistry>,
    sink: LogSink,
    visibility_timeout: Duration,
    poll_backoff: Duration,
    stats: WorkerStats,
}

impl WorkerActorState {
    async fn report(&self, entry: LogEntry) {
        if let Err(e) = self.sink.record(&entry).await {
            tracing::warn!(worker = %self.worker_id, "Failed to record log entry: {}", e);
        }
    }

    /// Run one delivery to completion. Acknowledges only on success.
    async fn process(&mut self, delivery: Delivery) {
        let item = match WorkItem::from_json(&delivery.body) {
            Ok(item) => item,
            Err(e) => {
                self.stats.failed += 1;
                self.report(LogEntry::error(&self.worker_id, "decode", e)).await;
                return;
            }
        };

        let Some(handler) = self.handlers.get(item.kind) else {
            self.stats.failed += 1;
            let entry = LogEntry::error(
                &self.worker_id,
                "dispatch",
                format_args!("no handler for {} items", item.kind),
            );
            self.report(entry).await;
            return;
        };

        tracing::info!(
            worker = %self.worker_id,
            attempt = delivery.receive_count,
            "Received {}",
            item
        );

        let outcome = match AssertUnwindSafe(handler.handle(item.clone()))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => HandlerOutcome::failed(
                JobLog::new(),
                HandlerError::Panicked(panic_message(panic.as_ref())),
            ),
        };

        if let Some(error) = &outcome.error {
            self.report(LogEntry::error(&self.worker_id, error.step(), error))
                .await;
        }
        self.report(LogEntry::log(&self.worker_id, outcome.success, outcome.log))
            .await;

        if !outcome.success {
            // Left unacknowledged: the item reappears once its window lapses.
            self.stats.failed += 1;
            return;
        }

        self.stats.succeeded += 1;
        match self.queue.ack(&delivery.receipt).await {
            Ok(true) => tracing::info!(worker = %self.worker_id, "Completed {}", item),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(worker = %self.worker_id, "Failed to acknowledge {}: {}", item, e)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue: WorkQueue,
    pub handlers: Arc<HandlerRegistry>,
    pub sink: LogSink,
    pub visibility_timeout: Duration,
    pub poll_backoff: Duration,
}

/// Worker actor that executes one work item at a time.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        let state = WorkerActorState {
            worker_id: args.worker_id,
            queue: args.queue,
            handlers: args.handlers,
            sink: args.sink,
            visibility_timeout: args.visibility_timeout,
            poll_backoff: args.poll_backoff,
            stats: WorkerStats::default(),
        };
        state
            .report(LogEntry::log(&state.worker_id, true, "Started running"))
            .await;

        myself.send_message(WorkerMessage::Poll)?;
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => match state.queue.receive(state.visibility_timeout).await {
                Ok(Some(delivery)) => {
                    state.process(delivery).await;
                    myself.send_message(WorkerMessage::Poll)?;
                }
                Ok(None) => schedule_poll(myself, state.poll_backoff),
                Err(e) => {
                    tracing::warn!(worker = %state.worker_id, "Failed to poll work queue: {}", e);
                    schedule_poll(myself, state.poll_backoff);
                }
            },

            WorkerMessage::GetStats { reply } => {
                let _ = reply.send(state.stats);
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id);
                myself.stop(None);
            }
        }

        Ok(())
    }
}

fn schedule_poll(myself: ActorRef<WorkerMessage>, backoff: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(backoff).await;
        // The worker may have stopped meanwhile.
        let _ = myself.send_message(WorkerMessage::Poll);
    });
}
