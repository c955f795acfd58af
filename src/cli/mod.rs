//! Command-line interface definitions.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "portage", version, about = "Watch a producer feed and republish new items")]
pub struct Cli {
    /// Path to the config file (default: ~/.config/portage/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the daemon (default).
    Run {
        /// Override the poll interval, e.g. "10m", "1h" or "90s".
        #[arg(long)]
        interval: Option<String>,
    },
    /// Run a single pipeline cycle and exit.
    Once,
    /// Show whether the daemon is running.
    Status,
    /// Stop a running daemon.
    Stop,
    /// Sign in to the publish target and save the session.
    Login,
}

impl Command {
    /// Whether this command reads the config file. Loading it has a side
    /// effect (a commented default file is written on first run), so commands
    /// that only talk to the daemon skip it.
    pub fn needs_config(&self) -> bool {
        matches!(
            self,
            Command::Run { .. } | Command::Once | Command::Login
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_parses() {
        let cli = Cli::try_parse_from(["portage"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_run_with_interval() {
        let cli = Cli::try_parse_from(["portage", "run", "--interval", "30m"]).unwrap();
        match cli.command {
            Some(Command::Run { interval }) => assert_eq!(interval.as_deref(), Some("30m")),
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_daemon_control_commands_skip_config() {
        assert!(!Command::Status.needs_config());
        assert!(!Command::Stop.needs_config());
        assert!(Command::Run { interval: None }.needs_config());
        assert!(Command::Once.needs_config());
        assert!(Command::Login.needs_config());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["portage", "once", "--config", "/tmp/p.toml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/p.toml")));
        assert!(matches!(cli.command, Some(Command::Once)));
    }
}
