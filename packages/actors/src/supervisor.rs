//! Supervisor actor for the watcher and the worker pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::context::AppContext;
use crate::handler::HandlerRegistry;
use crate::log_sink::LogSink;
use crate::messages::{SupervisorMessage, WatcherMessage, WorkerMessage, WorkerStats};
use crate::watcher::{CompletionWatcher, WatcherActor};
use crate::worker_actor::{WorkerActor, WorkerArgs};

const STATS_TIMEOUT: Duration = Duration::from_secs(2);

/// State for the supervisor actor.
pub struct SupervisorState {
    ctx: AppContext,
    handlers: Arc<HandlerRegistry>,
    /// Running workers by actor id, with their worker ids.
    workers: HashMap<ActorId, (String, ActorRef<WorkerMessage>)>,
    watcher: Option<ActorRef<WatcherMessage>>,
    /// Set once `Shutdown` arrives; terminated children are no longer replaced.
    draining: bool,
    events: Option<JoinHandle<()>>,
}

impl SupervisorState {
    fn is_empty(&self) -> bool {
        self.workers.is_empty() && self.watcher.is_none()
    }
}

/// Supervisor actor arguments.
pub struct SupervisorArgs {
    pub ctx: AppContext,
    pub handlers: HandlerRegistry,
}

async fn spawn_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> Result<(), ActorProcessingErr> {
    let worker_id = format!("worker-{}", Ulid::new().to_string().to_lowercase());
    let args = WorkerArgs {
        worker_id: worker_id.clone(),
        queue: state.ctx.queue.clone(),
        handlers: state.handlers.clone(),
        sink: LogSink::new(state.ctx.logs.clone(), state.ctx.errors.clone()),
        visibility_timeout: state.ctx.settings.visibility_timeout,
        poll_backoff: state.ctx.settings.poll_backoff,
    };

    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state.workers.insert(worker.get_id(), (worker_id, worker));
    Ok(())
}

async fn spawn_watcher(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> Result<(), ActorProcessingErr> {
    let watcher = CompletionWatcher::from_context(&state.ctx);
    let (actor, _handle) = Actor::spawn_linked(None, WatcherActor, watcher, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn watcher: {}", e)))?;

    state.watcher = Some(actor);
    Ok(())
}

/// Forward render-bucket creation events to the supervisor's mailbox.
fn forward_events(ctx: &AppContext, myself: ActorRef<SupervisorMessage>) -> Option<JoinHandle<()>> {
    let mut rx = ctx.renders.subscribe()?;
    Some(tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let message = SupervisorMessage::ArtifactCreated { key: event.key };
                    if myself.send_message(message).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Dropped {} render bucket events, reconciling", missed);
                    if myself.send_message(SupervisorMessage::Reconcile).is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }))
}

/// Supervisor actor that owns the watcher and the workers.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let workers = args.ctx.settings.workers;
        tracing::info!("Starting render farm supervisor with {} worker(s)", workers);

        let mut state = SupervisorState {
            events: forward_events(&args.ctx, myself.clone()),
            ctx: args.ctx,
            handlers: Arc::new(args.handlers),
            workers: HashMap::new(),
            watcher: None,
            draining: false,
        };

        spawn_watcher(&myself, &mut state).await?;
        for _ in 0..workers {
            spawn_worker(&myself, &mut state).await?;
        }

        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(events) = state.events.take() {
            events.abort();
        }
        tracing::info!("Render farm supervisor stopped");
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::ArtifactCreated { key } => {
                match &state.watcher {
                    Some(watcher) => watcher.send_message(WatcherMessage::ArtifactCreated { key })?,
                    None => tracing::warn!("No watcher running, dropped event for {}", key),
                }
            }

            // A replacement watcher reconciles on start, so nothing is lost without one.
            SupervisorMessage::Reconcile => {
                if let Some(watcher) = &state.watcher {
                    watcher.send_message(WatcherMessage::Reconcile)?;
                }
            }

            SupervisorMessage::ListWorkers { reply } => {
                let ids = state.workers.values().map(|(id, _)| id.clone()).collect();
                let _ = reply.send(ids);
            }

            SupervisorMessage::GetStats { reply } => {
                let mut stats = Vec::new();
                for (id, worker) in state.workers.values() {
                    let result = ractor::rpc::call(
                        worker,
                        |reply| WorkerMessage::GetStats { reply },
                        Some(STATS_TIMEOUT),
                    )
                    .await;
                    // A worker busy with a long item does not answer in time.
                    if let Ok(ractor::rpc::CallResult::Success(worker_stats)) = result {
                        stats.push((id.clone(), worker_stats));
                    } else {
                        stats.push((id.clone(), WorkerStats::default()));
                    }
                }
                let _ = reply.send(stats);
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down render farm supervisor");
                state.draining = true;
                for (_, worker) in state.workers.values() {
                    let _ = worker.send_message(WorkerMessage::Shutdown);
                }
                if let Some(watcher) = &state.watcher {
                    let _ = watcher.send_message(WatcherMessage::Shutdown);
                }
                if state.is_empty() {
                    myself.stop(None);
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, failure) = match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => (cell, reason),
            SupervisionEvent::ActorFailed(cell, err) => (cell, Some(err.to_string())),
            _ => return Ok(()),
        };

        let id = cell.get_id();
        let was_watcher = state.watcher.as_ref().is_some_and(|w| w.get_id() == id);
        if was_watcher {
            state.watcher = None;
        }
        let worker = state.workers.remove(&id);

        if state.draining {
            if state.is_empty() {
                myself.stop(None);
            }
            return Ok(());
        }

        // Children only stop on request, so anything else is replaced.
        if was_watcher {
            tracing::warn!("Completion watcher stopped unexpectedly: {:?}", failure);
            spawn_watcher(&myself, state).await?;
        } else if let Some((worker_id, _)) = worker {
            tracing::warn!("Worker {} stopped unexpectedly: {:?}", worker_id, failure);
            spawn_worker(&myself, state).await?;
        }

        Ok(())
    }
}

/// Start the supervisor, its watcher and `ctx.settings.workers` workers.
pub async fn start_supervisor(
    ctx: AppContext,
    handlers: HandlerRegistry,
) -> Result<(ActorRef<SupervisorMessage>, JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, Supervisor, SupervisorArgs { ctx, handlers }).await
}
