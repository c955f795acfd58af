//! portage: watch a producer's feed on one platform and republish new items
//! to another.
//!
//! The pipeline runs as a periodic daemon: fetch the producer's recent items,
//! detect the first one newer than the stored watermark, download its media,
//! drive the publish target's upload flow to confirmation, and only then
//! advance the watermark.

pub mod acquire;
pub mod app;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod detect;
pub mod domain;
pub mod pipeline;
pub mod publish;
pub mod source;
pub mod store;
