use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked content producer on the source platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerRecord {
    /// Opaque stable identifier assigned by the source platform.
    pub id: String,
    pub display_name: String,
    /// Mutable alias used to build source-side URLs.
    pub handle: String,
    pub updated_at: DateTime<Utc>,
}

impl ProducerRecord {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            handle: handle.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Per-producer dedup watermark.
///
/// `last_seen_at` is the source-side creation time (epoch seconds) of the most
/// recently accepted item. It never decreases; an item is novel iff its
/// creation time is strictly greater.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorRecord {
    pub producer_id: String,
    pub last_seen_at: i64,
    pub last_item_id: String,
    pub updated_at: DateTime<Utc>,
}

impl CursorRecord {
    pub fn new(producer_id: impl Into<String>, last_seen_at: i64, last_item_id: impl Into<String>) -> Self {
        Self {
            producer_id: producer_id.into(),
            last_seen_at,
            last_item_id: last_item_id.into(),
            updated_at: Utc::now(),
        }
    }

    /// Whether an item with the given creation time is newer than this cursor.
    pub fn admits(&self, created_at: i64) -> bool {
        created_at > self.last_seen_at
    }
}
