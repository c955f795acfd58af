//! Command implementations.

use std::sync::Arc;

use tracing::info;

use crate::app::{AppContext, PortageError, Result, Shutdown, ShutdownController};
use crate::config::Config;
use crate::daemon::Daemon;
use crate::pipeline::{Cycle, CycleOutcome};
use crate::publish::chrome::interactive_login;
use crate::publish::SessionStore;

/// Run the scheduler until a stop signal arrives.
pub async fn run_daemon(ctx: AppContext) -> Result<()> {
    let (controller, shutdown) = ShutdownController::new();
    let orchestrator = Arc::new(ctx.orchestrator(shutdown.clone()));
    Daemon::new(orchestrator, &ctx.config, shutdown)
        .run(controller)
        .await
}

/// Run exactly one pipeline cycle.
pub async fn run_once(ctx: &AppContext) -> CycleOutcome {
    let orchestrator = ctx.orchestrator(Shutdown::never());
    let outcome = orchestrator.run_cycle().await;
    match &outcome {
        CycleOutcome::NoUpdate => println!("No update"),
        CycleOutcome::Published { item_id } => println!("Published item {}", item_id),
        CycleOutcome::Failed { stage, message } => {
            println!("Cycle failed in {}: {}", stage, message)
        }
    }
    outcome
}

/// Interactive sign-in to the publish target.
pub async fn login(config: &Config) -> Result<()> {
    let session_file = config
        .session_file()
        .map_err(|e| PortageError::Config(e.to_string()))?;
    info!(path = %session_file.display(), "Starting interactive login");
    interactive_login(&config.publish, &SessionStore::new(session_file)).await
}
