pub mod item;
pub mod producer;

pub use item::{PipelineItem, SourceAuthor, SourceItem};
pub use producer::{CursorRecord, ProducerRecord};
