//! Background scheduler: run pipeline cycles forever on an interval.
//!
//! The scheduler is the component that must not die. A failed cycle is logged
//! and followed by a shorter cooldown sleep; a panicking cycle is absorbed by
//! running it on its own task. Only a shutdown signal ends the loop.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::app::{PortageError, Result, Shutdown, ShutdownController};
use crate::config::Config;
use crate::pipeline::{Cycle, CycleOutcome};

pub struct Daemon {
    cycle: Arc<dyn Cycle>,
    poll_interval: Duration,
    failure_cooldown: Duration,
    run_on_start: bool,
    shutdown: Shutdown,
}

impl Daemon {
    pub fn new(cycle: Arc<dyn Cycle>, config: &Config, shutdown: Shutdown) -> Self {
        Self {
            cycle,
            poll_interval: config.poll_interval(),
            failure_cooldown: config.failure_cooldown(),
            run_on_start: config.schedule.run_on_start,
            shutdown,
        }
    }

    /// Run until shutdown. Registers the PID file and signal handlers, then
    /// hands off to the cycle loop.
    pub async fn run(&self, controller: ShutdownController) -> Result<()> {
        if let Some(pid) = running_instance()? {
            return Err(PortageError::Other(format!(
                "daemon already running with PID {}",
                pid
            )));
        }

        write_pid_file()?;
        install_signal_handlers(controller);
        info!(
            interval = %format_interval(self.poll_interval),
            "Daemon started"
        );

        self.cycle_loop().await;

        remove_pid_file();
        info!("Daemon stopped");
        Ok(())
    }

    async fn cycle_loop(&self) {
        if !self.run_on_start && !self.sleep(self.poll_interval).await {
            return;
        }

        loop {
            if self.shutdown.is_triggered() {
                return;
            }

            // A panic inside a cycle must not take the scheduler down.
            let cycle = self.cycle.clone();
            let outcome = match tokio::spawn(async move { cycle.run_cycle().await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Cycle panicked: {}", e);
                    CycleOutcome::Failed {
                        stage: crate::pipeline::Stage::Detect,
                        message: format!("cycle panicked: {}", e),
                    }
                }
            };

            // A failed cycle retries on the shorter cooldown instead of
            // waiting out the whole interval.
            let pause = match outcome {
                CycleOutcome::NoUpdate => self.poll_interval,
                CycleOutcome::Published { item_id } => {
                    info!(item_id = %item_id, "Cycle published an item");
                    self.poll_interval
                }
                CycleOutcome::Failed { stage, message } => {
                    warn!(%stage, "Cycle failed, cooling down: {}", message);
                    self.failure_cooldown
                }
            };

            if !self.sleep(pause).await {
                return;
            }
        }
    }

    /// Sleep unless shutdown arrives first. Returns false on shutdown.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.triggered() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

fn install_signal_handlers(controller: ShutdownController) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => info!("Received SIGTERM, shutting down"),
            _ = tokio::signal::ctrl_c() => info!("Received interrupt, shutting down"),
        }
        controller.trigger();
    });

    #[cfg(not(unix))]
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down");
        }
        controller.trigger();
    });
}

pub fn pid_file_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("portage.pid")
}

fn write_pid_file() -> Result<()> {
    fs::write(pid_file_path(), process::id().to_string())?;
    Ok(())
}

fn remove_pid_file() {
    let path = pid_file_path();
    if path.exists() {
        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to remove PID file {}: {}", path.display(), e);
        }
    }
}

/// PID of a live daemon instance, if one exists. A PID file pointing at a
/// dead process is stale and removed.
pub fn running_instance() -> Result<Option<u32>> {
    let path = pid_file_path();
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&path)?;
    let pid: u32 = match content.trim().parse() {
        Ok(pid) => pid,
        Err(_) => {
            warn!("Malformed PID file {}, removing", path.display());
            let _ = fs::remove_file(&path);
            return Ok(None);
        }
    };

    if process_exists(pid) {
        Ok(Some(pid))
    } else {
        let _ = fs::remove_file(&path);
        Ok(None)
    }
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(windows)]
fn process_exists(pid: u32) -> bool {
    process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

/// Ask a running daemon to stop and wait for it to exit.
pub fn stop_daemon() -> Result<()> {
    let pid = match running_instance()? {
        Some(pid) => pid,
        None => {
            println!("Daemon is not running");
            return Ok(());
        }
    };

    #[cfg(unix)]
    let ok = process::Command::new("kill")
        .arg(pid.to_string())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    #[cfg(windows)]
    let ok = process::Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if !ok {
        return Err(PortageError::Other(format!(
            "failed to signal daemon (PID {})",
            pid
        )));
    }

    for _ in 0..50 {
        if !process_exists(pid) {
            remove_pid_file();
            println!("Daemon stopped (PID {})", pid);
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    Err(PortageError::Other(format!(
        "daemon (PID {}) did not exit within 10s",
        pid
    )))
}

pub fn daemon_status() -> Result<()> {
    match running_instance()? {
        Some(pid) => println!("Daemon is running (PID {})", pid),
        None => println!("Daemon is not running"),
    }
    Ok(())
}

/// Parse an interval like "30m", "1h" or "90s"; a bare number is seconds.
pub fn parse_interval(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (value, multiplier) = match s.chars().last() {
        Some('h') => (&s[..s.len() - 1], 3600),
        Some('m') => (&s[..s.len() - 1], 60),
        Some('s') => (&s[..s.len() - 1], 1),
        _ => (s, 1),
    };

    let value: u64 = value
        .parse()
        .map_err(|_| PortageError::Other(format!("invalid interval: {}", s)))?;
    if value == 0 {
        return Err(PortageError::Other("interval must be positive".into()));
    }
    Ok(Duration::from_secs(value * multiplier))
}

pub fn format_interval(d: Duration) -> String {
    let secs = d.as_secs();
    if secs % 3600 == 0 && secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 && secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_interval("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_interval("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_interval("45").unwrap(), Duration::from_secs(45));
        assert!(parse_interval("0").is_err());
        assert!(parse_interval("abc").is_err());
        assert!(parse_interval("").is_err());
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(Duration::from_secs(3600)), "1h");
        assert_eq!(format_interval(Duration::from_secs(1800)), "30m");
        assert_eq!(format_interval(Duration::from_secs(90)), "90s");
    }

    fn daemon_config(poll_secs: u64, cooldown_secs: u64) -> Config {
        let mut config = Config::default();
        config.schedule.poll_interval_secs = poll_secs;
        config.schedule.failure_cooldown_secs = cooldown_secs;
        config.schedule.run_on_start = true;
        config
    }

    /// Fails the first `failures` cycles, then publishes, then triggers
    /// shutdown once `total` cycles have run.
    struct FlakyCycle {
        calls: AtomicU32,
        failures: u32,
        total: u32,
        controller: Arc<ShutdownController>,
        panic_instead: bool,
    }

    #[async_trait]
    impl Cycle for FlakyCycle {
        async fn run_cycle(&self) -> CycleOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.total {
                self.controller.trigger();
            }
            if call <= self.failures {
                if self.panic_instead {
                    panic!("cycle blew up");
                }
                CycleOutcome::Failed {
                    stage: crate::pipeline::Stage::Acquire,
                    message: "scripted failure".into(),
                }
            } else {
                CycleOutcome::Published {
                    item_id: format!("item-{}", call),
                }
            }
        }
    }

    async fn run_flaky(failures: u32, total: u32, panic_instead: bool) -> u32 {
        let (controller, shutdown) = ShutdownController::new();
        let controller = Arc::new(controller);
        let cycle = Arc::new(FlakyCycle {
            calls: AtomicU32::new(0),
            failures,
            total,
            controller: controller.clone(),
            panic_instead,
        });

        let daemon = Daemon::new(cycle.clone(), &daemon_config(600, 60), shutdown);
        daemon.cycle_loop().await;
        cycle.calls.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_survives_failed_cycles() {
        let calls = run_flaky(3, 5, false).await;
        assert_eq!(calls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_survives_panicking_cycles() {
        let calls = run_flaky(2, 4, true).await;
        assert_eq!(calls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_sleep_exits_promptly() {
        let (controller, shutdown) = ShutdownController::new();
        let cycle = Arc::new(FlakyCycle {
            calls: AtomicU32::new(0),
            failures: 0,
            total: 1,
            controller: Arc::new(controller),
            panic_instead: false,
        });

        let daemon = Daemon::new(cycle.clone(), &daemon_config(3600, 60), shutdown);
        // The first cycle triggers shutdown; the loop must not wait out the
        // full hour before noticing.
        tokio::time::timeout(Duration::from_secs(7200), daemon.cycle_loop())
            .await
            .unwrap();
        assert_eq!(cycle.calls.load(Ordering::SeqCst), 1);
    }
}
