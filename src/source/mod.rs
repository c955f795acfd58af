//! Source platform adapter.
//!
//! Fetches one page of a producer's recent items. Transport or payload
//! failures surface as errors here and are downgraded to "no update" at the
//! detector boundary by the orchestrator.

pub mod http;

use async_trait::async_trait;

use crate::app::Result;
use crate::domain::SourceItem;

pub use http::HttpSource;

#[async_trait]
pub trait SourceFeed: Send + Sync {
    /// Fetch the producer's most recent items, newest-first as far as the
    /// source guarantees anything (it doesn't; callers must scan the page).
    async fn fetch_recent(&self, producer_id: &str) -> Result<Vec<SourceItem>>;
}
