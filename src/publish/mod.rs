//! Republishing: drive the external publish target through its multi-step,
//! asynchronously-completing upload flow.
//!
//! The target is modeled as a remote stateful session answering instantaneous
//! step-actions and probes; all waiting, retry and timeout discipline lives in
//! [`machine::PublishMachine`]. The concrete browser binding is
//! [`chrome::ChromeTarget`]; tests substitute scripted targets.

pub mod chrome;
pub mod machine;
pub mod session;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub use chrome::ChromeTarget;
pub use machine::{PublishMachine, PublishState, PublishTuning};
pub use session::SessionStore;

/// Terminal failure reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    AuthRequired,
    UploadFailed,
    Timeout,
    PreconditionFailed,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("publish target requires authentication")]
    AuthRequired,

    #[error("media upload failed after {attempts} resubmissions")]
    UploadFailed { attempts: u32 },

    #[error("timed out in {state:?}")]
    Timeout { state: PublishState },

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A step-action itself broke (browser/transport). Terminal for the
    /// attempt, reported as a precondition failure of the external surface.
    #[error("publish step failed: {0}")]
    Step(String),

    #[error("publish cancelled")]
    Cancelled,
}

impl PublishError {
    pub fn reason(&self) -> FailureReason {
        match self {
            PublishError::AuthRequired => FailureReason::AuthRequired,
            PublishError::UploadFailed { .. } => FailureReason::UploadFailed,
            PublishError::Timeout { .. } | PublishError::Cancelled => FailureReason::Timeout,
            PublishError::PreconditionFailed(_) | PublishError::Step(_) => {
                FailureReason::PreconditionFailed
            }
        }
    }
}

/// Upload-progress probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessSignal {
    /// The target reports the media is processed and editable.
    Ready,
    /// The target reports the upload failed; recovery is a resubmission.
    Failed,
    Pending,
}

/// Post-submit confirmation probe result. Two independent success conditions;
/// the first to trigger wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmSignal {
    /// Explicit redirect/state signal that the item is live.
    Live,
    /// The management surface is showing, which implies the publish landed
    /// even if the explicit signal was missed.
    Managing,
    Pending,
}

/// Metadata pushed onto the publish form.
#[derive(Debug, Clone)]
pub struct PublishMetadata {
    pub title: String,
    pub tags: Vec<String>,
}

/// Step/action vocabulary of the publish target.
///
/// Every method is a single bounded external interaction; probes return a
/// signal immediately rather than waiting themselves.
#[async_trait]
pub trait PublishTarget: Send + Sync {
    /// Open an authenticated session. Fails with [`PublishError::AuthRequired`]
    /// when credentials are absent or rejected.
    async fn establish_session(&self) -> Result<(), PublishError>;

    /// Hand the local media file to the target. Also used for resubmission.
    async fn submit_media(&self, path: &Path) -> Result<(), PublishError>;

    /// Probe upload/transcode progress.
    async fn check_readiness(&self) -> Result<ReadinessSignal, PublishError>;

    /// Fill title and tags on the publish form.
    async fn fill_metadata(&self, meta: &PublishMetadata) -> Result<(), PublishError>;

    /// Pick a cover image if the target offers one; first candidate wins.
    /// Returns the number of candidates observed (zero is not an error).
    async fn select_cover(&self) -> Result<usize, PublishError>;

    /// Fire the publish action. Returns whether the trigger landed; the
    /// target's UI may lag, so callers retry this idempotently.
    async fn trigger_publish(&self) -> Result<bool, PublishError>;

    /// Probe whether the item is live.
    async fn check_confirmation(&self) -> Result<ConfirmSignal, PublishError>;

    /// Persist (possibly rotated) session credentials after success.
    async fn persist_session(&self) -> Result<(), PublishError>;

    /// Release any resources held for the current attempt.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(PublishError::AuthRequired.reason(), FailureReason::AuthRequired);
        assert_eq!(
            PublishError::UploadFailed { attempts: 3 }.reason(),
            FailureReason::UploadFailed
        );
        assert_eq!(
            PublishError::Timeout {
                state: PublishState::Submitted
            }
            .reason(),
            FailureReason::Timeout
        );
        assert_eq!(
            PublishError::PreconditionFailed("missing file".into()).reason(),
            FailureReason::PreconditionFailed
        );
        assert_eq!(
            PublishError::Step("page crashed".into()).reason(),
            FailureReason::PreconditionFailed
        );
    }
}
