//! Acquisition stage: turn a detected item into a local media file.

pub mod http;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::app::Shutdown;
use crate::domain::PipelineItem;

pub use http::HttpAcquirer;

#[derive(Error, Debug)]
pub enum AcquireError {
    /// The id could not be resolved to a real item.
    #[error("item not found: {0}")]
    NotFound(String),

    /// Retryable within the stage.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Aborts the cycle; the watermark stays put.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),

    #[error("acquisition cancelled")]
    Cancelled,
}

/// A successfully downloaded media file.
#[derive(Debug, Clone)]
pub struct Acquired {
    pub display_name: String,
    pub path: PathBuf,
}

#[async_trait]
pub trait Acquirer: Send + Sync {
    /// Download the item's media to local storage. One attempt; retry policy
    /// lives in [`acquire_with_retry`].
    async fn download(&self, item: &PipelineItem) -> Result<Acquired, AcquireError>;
}

/// Drive one acquisition with bounded retries on transient failures.
///
/// Backoff doubles per attempt starting from `backoff_base`. A transient
/// failure that survives `retry_cap` retries is reported as permanent.
pub async fn acquire_with_retry(
    acquirer: &dyn Acquirer,
    item: &PipelineItem,
    retry_cap: u32,
    backoff_base: Duration,
    shutdown: &Shutdown,
) -> Result<Acquired, AcquireError> {
    let mut attempt: u32 = 0;
    loop {
        match acquirer.download(item).await {
            Ok(acquired) => return Ok(acquired),
            Err(AcquireError::Transient(msg)) => {
                if attempt >= retry_cap {
                    return Err(AcquireError::Permanent(format!(
                        "gave up after {} transient failures: {}",
                        attempt + 1,
                        msg
                    )));
                }
                let backoff = backoff_base * 2u32.saturating_pow(attempt);
                warn!(
                    item_id = %item.item_id,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "Transient acquisition failure: {}", msg
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.triggered() => return Err(AcquireError::Cancelled),
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
