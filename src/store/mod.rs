pub mod sqlite;

use crate::app::Result;
use crate::domain::{CursorRecord, ProducerRecord};

pub use sqlite::SqliteStore;

/// Persistent producer/cursor state.
///
/// `commit` must write the producer record and its cursor as a single unit so
/// a crash never leaves one updated without the other.
pub trait Store: Send + Sync {
    fn producer(&self, id: &str) -> Result<Option<ProducerRecord>>;
    fn cursor(&self, producer_id: &str) -> Result<Option<CursorRecord>>;
    fn producers(&self) -> Result<Vec<ProducerRecord>>;

    /// Atomic upsert of a producer and its cursor. The cursor watermark is
    /// never moved backwards: a commit with an older `last_seen_at` leaves
    /// the stored cursor untouched.
    fn commit(&self, producer: &ProducerRecord, cursor: &CursorRecord) -> Result<()>;
}
