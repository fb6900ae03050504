//! Node initialization for the render farm.

use std::sync::Arc;

use actors::{
    ActorRef, AppContext, CommandEngine, FarmConfig, HandlerRegistry, RenderEngine,
    SupervisorMessage, start_supervisor,
};
use db::DbConfig;
use storage::Storage;
use tokio::task::JoinHandle;

/// A running node: shared handles plus the supervisor that owns the actors.
pub struct RenderFarm {
    pub ctx: AppContext,
    pub supervisor: ActorRef<SupervisorMessage>,
    handle: JoinHandle<()>,
}

impl RenderFarm {
    /// Start the supervisor with the standard handlers backed by `engine`.
    pub async fn start(
        ctx: AppContext,
        engine: Arc<dyn RenderEngine>,
    ) -> Result<Self, ractor::SpawnErr> {
        let handlers = HandlerRegistry::standard(&ctx, engine);
        let (supervisor, handle) = start_supervisor(ctx.clone(), handlers).await?;
        Ok(Self {
            ctx,
            supervisor,
            handle,
        })
    }

    /// Ask every worker to stop between items and wait for the supervisor.
    pub async fn shutdown(self) -> Result<(), Box<dyn std::error::Error>> {
        tracing::info!("Shutting down render farm...");
        self.supervisor.send_message(SupervisorMessage::Shutdown)?;
        self.handle.await?;
        tracing::info!("Render farm stopped");
        Ok(())
    }
}

/// Initialize a render farm node from the environment.
///
/// This should be called once at startup, before serving requests.
pub async fn init_render_farm() -> Result<RenderFarm, Box<dyn std::error::Error>> {
    tracing::info!("Initializing render farm...");

    let settings = FarmConfig::from_env()?;
    let db = db::init(DbConfig::from_env()).await?;
    let storage = Storage::from_env().await?;
    tracing::info!("Object store ready ({})", storage.kind_str());

    let engine: Arc<dyn RenderEngine> = Arc::new(CommandEngine::from_config(&settings));
    let ctx = AppContext::new(db, &storage, settings);
    let farm = RenderFarm::start(ctx, engine).await?;

    tracing::info!(
        workers = farm.ctx.settings.workers,
        batch_size = farm.ctx.settings.batch_size.get(),
        "Render farm initialized"
    );
    Ok(farm)
}
