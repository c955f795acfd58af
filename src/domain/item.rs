use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::ProducerRecord;

/// Author metadata embedded in a source item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAuthor {
    pub id: String,
    pub nickname: String,
    pub handle: String,
}

/// One item as returned by the source platform's recent-items endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: String,
    /// Source-side creation time, epoch seconds.
    pub created_at: i64,
    pub description: String,
    /// Pinned/featured items never count as a novel publish event.
    pub pinned: bool,
    pub author: SourceAuthor,
}

/// One unit of work flowing through the pipeline after detection.
///
/// Owned by the orchestrator for the duration of one cycle; persisted only
/// through its effect on the cursor when the cycle fully completes.
#[derive(Debug, Clone)]
pub struct PipelineItem {
    pub producer: ProducerRecord,
    pub item_id: String,
    pub created_at: i64,
    pub description: String,
    pub media_path: Option<PathBuf>,
}

impl PipelineItem {
    pub fn from_source(item: &SourceItem) -> Self {
        Self {
            producer: ProducerRecord::new(
                item.author.id.clone(),
                item.author.nickname.clone(),
                item.author.handle.clone(),
            ),
            item_id: item.id.clone(),
            created_at: item.created_at,
            description: item.description.clone(),
            media_path: None,
        }
    }

    /// Deterministic local filename stem for this item's media.
    pub fn media_stem(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.producer.id.as_bytes());
        hasher.update(self.item_id.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..16])
    }

    /// The item's page URL on the source platform.
    pub fn source_url(&self, base: &str) -> String {
        format!(
            "{}/@{}/video/{}",
            base.trim_end_matches('/'),
            self.producer.handle,
            self.item_id
        )
    }
}
