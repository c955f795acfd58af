//! The republish state machine.
//!
//! Linear progression with one recovery branch:
//!
//! ```text
//! Idle → SessionEstablished → MediaSubmitted → MetadataFilled
//!      → AwaitingTranscode → CoverSelected → Submitted → Confirmed
//! (any state) → Failed (permanent)
//! MediaSubmitted/AwaitingTranscode → ResubmitMedia → MediaSubmitted
//! ```
//!
//! Each polling wait uses a fixed interval under a per-state budget; a spent
//! budget is a permanent `Timeout`. Restarting the whole machine is a
//! cycle-level decision made by the orchestrator, never internal.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::app::Shutdown;
use crate::config::PublishConfig;
use crate::domain::PipelineItem;
use crate::publish::{
    ConfirmSignal, PublishError, PublishMetadata, PublishTarget, ReadinessSignal,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Idle,
    SessionEstablished,
    MediaSubmitted,
    MetadataFilled,
    AwaitingTranscode,
    ResubmitMedia,
    CoverSelected,
    Submitted,
    Confirmed,
    Failed,
}

/// Timeout/retry knobs, lifted out of [`PublishConfig`] so tests can tune
/// them directly.
#[derive(Debug, Clone)]
pub struct PublishTuning {
    pub poll_interval: Duration,
    pub transcode_budget: Duration,
    pub confirm_budget: Duration,
    pub resubmit_cap: u32,
    pub trigger_cap: u32,
    pub title_max_chars: usize,
    pub tags: Vec<String>,
}

impl PublishTuning {
    pub fn from_config(config: &PublishConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            transcode_budget: Duration::from_secs(config.transcode_timeout_secs),
            confirm_budget: Duration::from_secs(config.confirm_timeout_secs),
            resubmit_cap: config.resubmit_cap,
            trigger_cap: config.trigger_cap,
            title_max_chars: config.title_max_chars,
            tags: config.tags.clone(),
        }
    }
}

pub struct PublishMachine {
    target: Arc<dyn PublishTarget>,
    tuning: PublishTuning,
    shutdown: Shutdown,
    state: PublishState,
}

impl PublishMachine {
    pub fn new(target: Arc<dyn PublishTarget>, tuning: PublishTuning, shutdown: Shutdown) -> Self {
        Self {
            target,
            tuning,
            shutdown,
            state: PublishState::Idle,
        }
    }

    pub fn state(&self) -> PublishState {
        self.state
    }

    /// Drive one item to `Confirmed`, releasing the target's resources on
    /// either outcome.
    pub async fn run(&mut self, item: &PipelineItem) -> Result<(), PublishError> {
        let result = self.drive(item).await;
        self.target.close().await;
        if result.is_err() {
            self.state = PublishState::Failed;
        }
        result
    }

    async fn drive(&mut self, item: &PipelineItem) -> Result<(), PublishError> {
        let media_path = item
            .media_path
            .as_deref()
            .ok_or_else(|| PublishError::PreconditionFailed("item has no media path".into()))?;

        // Caller precondition, not a target failure.
        if !media_path.exists() {
            return Err(PublishError::PreconditionFailed(format!(
                "media file missing: {}",
                media_path.display()
            )));
        }

        self.target.establish_session().await?;
        self.state = PublishState::SessionEstablished;

        self.target.submit_media(media_path).await?;
        self.state = PublishState::MediaSubmitted;

        let meta = self.metadata_for(item);
        self.target.fill_metadata(&meta).await?;
        self.state = PublishState::MetadataFilled;

        self.await_transcode(media_path).await?;

        let candidates = self.target.select_cover().await?;
        debug!(candidates, "Cover selection done");
        self.state = PublishState::CoverSelected;

        self.trigger().await?;
        self.confirm().await?;
        self.state = PublishState::Confirmed;

        // Credentials may have rotated; losing them is survivable but
        // degrades the next cycle, so it's only a warning.
        if let Err(e) = self.target.persist_session().await {
            warn!("Failed to persist rotated session: {}", e);
        }

        info!(item_id = %item.item_id, "Publish confirmed");
        Ok(())
    }

    fn metadata_for(&self, item: &PipelineItem) -> PublishMetadata {
        let title: String = item
            .description
            .chars()
            .take(self.tuning.title_max_chars)
            .collect();
        PublishMetadata {
            title,
            tags: self.tuning.tags.clone(),
        }
    }

    /// Poll for upload/transcode readiness under the overall budget,
    /// resubmitting on explicit upload-failure signals up to the cap.
    async fn await_transcode(&mut self, media_path: &std::path::Path) -> Result<(), PublishError> {
        self.state = PublishState::AwaitingTranscode;
        let started = Instant::now();
        let mut resubmits: u32 = 0;

        loop {
            match self.target.check_readiness().await? {
                ReadinessSignal::Ready => return Ok(()),
                ReadinessSignal::Failed => {
                    if resubmits >= self.tuning.resubmit_cap {
                        return Err(PublishError::UploadFailed { attempts: resubmits });
                    }
                    resubmits += 1;
                    warn!(resubmits, "Upload failed signal, resubmitting media");
                    self.state = PublishState::ResubmitMedia;
                    self.target.submit_media(media_path).await?;
                    self.state = PublishState::AwaitingTranscode;
                }
                ReadinessSignal::Pending => {}
            }

            if started.elapsed() >= self.tuning.transcode_budget {
                return Err(PublishError::Timeout {
                    state: PublishState::AwaitingTranscode,
                });
            }
            self.wait().await?;
        }
    }

    /// Fire the publish action. The trigger itself is retried a bounded
    /// number of times when the UI hasn't caught up; whether the publish
    /// actually landed is decided by the confirmation poll.
    async fn trigger(&mut self) -> Result<(), PublishError> {
        let mut landed = false;
        for attempt in 0..self.tuning.trigger_cap.max(1) {
            if self.target.trigger_publish().await? {
                landed = true;
                break;
            }
            debug!(attempt = attempt + 1, "Publish trigger not available yet");
            self.wait().await?;
        }
        if !landed {
            warn!(
                attempts = self.tuning.trigger_cap,
                "Publish trigger never landed; relying on confirmation poll"
            );
        }
        self.state = PublishState::Submitted;
        Ok(())
    }

    /// Poll for confirmation. Two independent success conditions: the
    /// explicit live signal and the management-surface signal; first wins.
    /// A spent budget gets one final probe before it counts as a timeout.
    async fn confirm(&mut self) -> Result<(), PublishError> {
        let started = Instant::now();

        loop {
            match self.target.check_confirmation().await? {
                ConfirmSignal::Live => {
                    info!("Confirmed live via explicit signal");
                    return Ok(());
                }
                ConfirmSignal::Managing => {
                    info!("Confirmed via management surface");
                    return Ok(());
                }
                ConfirmSignal::Pending => {}
            }

            if started.elapsed() >= self.tuning.confirm_budget {
                return match self.target.check_confirmation().await? {
                    ConfirmSignal::Live | ConfirmSignal::Managing => Ok(()),
                    ConfirmSignal::Pending => Err(PublishError::Timeout {
                        state: PublishState::Submitted,
                    }),
                };
            }
            self.wait().await?;
        }
    }

    /// One poll-interval sleep, aborted immediately on shutdown.
    async fn wait(&self) -> Result<(), PublishError> {
        if self.shutdown.is_triggered() {
            return Err(PublishError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.triggered() => Err(PublishError::Cancelled),
            _ = tokio::time::sleep(self.tuning.poll_interval) => Ok(()),
        }
    }
}
