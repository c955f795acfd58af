//! Change detection against the stored watermark.
//!
//! Given one fetched page of a producer's recent items, decides whether a
//! reprocessable novel item exists. Pinned items never qualify. Only the
//! first qualifying item is returned; any backlog behind it is picked up on
//! later cycles once the watermark has advanced past this one.
//!
//! The detector never writes to the store. The watermark is committed by the
//! orchestrator, and only after the downstream stages have fully succeeded,
//! so a failed cycle leaves the same item eligible next time.

use std::sync::Arc;

use tracing::debug;

use crate::app::Result;
use crate::domain::{PipelineItem, SourceItem};
use crate::store::Store;

pub struct ChangeDetector<S: Store> {
    store: Arc<S>,
}

impl<S: Store> ChangeDetector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Select the first novel item for `producer_id` from one fetched page.
    ///
    /// Returns `None` for "no update": an empty page, a page of pinned items,
    /// or nothing newer than the watermark.
    pub fn detect(&self, producer_id: &str, items: &[SourceItem]) -> Result<Option<PipelineItem>> {
        let watermark = self
            .store
            .cursor(producer_id)?
            .map(|cursor| cursor.last_seen_at);

        Ok(first_novel(items, watermark).map(PipelineItem::from_source))
    }
}

/// The first non-pinned item strictly newer than the watermark, scanning the
/// page in the order the source returned it. Absent watermark admits any item.
fn first_novel(items: &[SourceItem], watermark: Option<i64>) -> Option<&SourceItem> {
    items.iter().find(|item| {
        if item.pinned {
            debug!(item_id = %item.id, "Skipping pinned item");
            return false;
        }
        match watermark {
            Some(seen) => item.created_at > seen,
            None => true,
        }
    })
}
