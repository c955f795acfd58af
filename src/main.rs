use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use portage::app::AppContext;
use portage::cli::{commands, Cli, Command};
use portage::config::Config;
use portage::daemon;
use portage::pipeline::CycleOutcome;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("portage=info")),
        )
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run { interval: None });

    // Loading the config writes a default file on first run; daemon control
    // commands must not leave that behind.
    let mut config = if command.needs_config() {
        Config::load(cli.config.as_deref())?
    } else {
        Config::default()
    };

    match command {
        Command::Run { interval } => {
            if let Some(interval) = interval {
                config.schedule.poll_interval_secs = daemon::parse_interval(&interval)?.as_secs();
            }
            let ctx = AppContext::new(config)?;
            commands::run_daemon(ctx).await?;
        }
        Command::Once => {
            let ctx = AppContext::new(config)?;
            if let CycleOutcome::Failed { stage, message } = commands::run_once(&ctx).await {
                anyhow::bail!("cycle failed in {}: {}", stage, message);
            }
        }
        Command::Status => {
            daemon::daemon_status()?;
        }
        Command::Stop => {
            daemon::stop_daemon()?;
        }
        Command::Login => {
            commands::login(&config).await?;
        }
    }

    Ok(())
}
