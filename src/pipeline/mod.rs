//! One pipeline cycle: fetch, detect, acquire, republish, commit.
//!
//! The watermark commit is the last step and happens only after the publish
//! is confirmed, so every stage before it can fail (or the process can die)
//! and the same item stays eligible for the next cycle. Delivery is therefore
//! at-least-once; the strictly-greater watermark makes a re-run after a
//! confirmed publish a no-op.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::acquire::{acquire_with_retry, Acquirer};
use crate::app::Shutdown;
use crate::config::Config;
use crate::detect::ChangeDetector;
use crate::domain::CursorRecord;
use crate::publish::{PublishMachine, PublishTarget, PublishTuning};
use crate::source::SourceFeed;
use crate::store::Store;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detect,
    Acquire,
    Publish,
    Commit,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Detect => "detect",
            Stage::Acquire => "acquire",
            Stage::Publish => "publish",
            Stage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Result of one cycle. Failures are data, not errors; the scheduler treats
/// them as a cooldown signal and never dies over them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing novel, or the source was unreachable this cycle.
    NoUpdate,
    /// An item went all the way to a confirmed publish and the watermark
    /// advanced past it.
    Published { item_id: String },
    Failed { stage: Stage, message: String },
}

/// One schedulable unit of work. The daemon only knows this seam.
#[async_trait]
pub trait Cycle: Send + Sync {
    async fn run_cycle(&self) -> CycleOutcome;
}

/// Drives the full pipeline for a single producer.
pub struct Orchestrator<S: Store> {
    store: Arc<S>,
    source: Arc<dyn SourceFeed>,
    acquirer: Arc<dyn Acquirer>,
    target: Arc<dyn PublishTarget>,
    detector: ChangeDetector<S>,
    producer_id: String,
    retry_cap: u32,
    backoff_base: std::time::Duration,
    tuning: PublishTuning,
    shutdown: Shutdown,
}

impl<S: Store> Orchestrator<S> {
    pub fn new(
        store: Arc<S>,
        source: Arc<dyn SourceFeed>,
        acquirer: Arc<dyn Acquirer>,
        target: Arc<dyn PublishTarget>,
        config: &Config,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            detector: ChangeDetector::new(store.clone()),
            store,
            source,
            acquirer,
            target,
            producer_id: config.producer.id.clone(),
            retry_cap: config.acquire.retry_cap,
            backoff_base: config.acquire_backoff_base(),
            tuning: PublishTuning::from_config(&config.publish),
            shutdown,
        }
    }
}

#[async_trait]
impl<S: Store> Cycle for Orchestrator<S> {
    async fn run_cycle(&self) -> CycleOutcome {
        // A source hiccup is indistinguishable from "nothing new" for this
        // cycle; the next cycle retries from the same watermark.
        let items = match self.source.fetch_recent(&self.producer_id).await {
            Ok(items) => items,
            Err(e) => {
                warn!(producer = %self.producer_id, "Source fetch failed: {}", e);
                return CycleOutcome::NoUpdate;
            }
        };

        let mut item = match self.detector.detect(&self.producer_id, &items) {
            Ok(Some(item)) => item,
            Ok(None) => {
                debug!(producer = %self.producer_id, fetched = items.len(), "No novel item");
                return CycleOutcome::NoUpdate;
            }
            Err(e) => {
                return CycleOutcome::Failed {
                    stage: Stage::Detect,
                    message: e.to_string(),
                }
            }
        };

        info!(
            producer = %self.producer_id,
            item_id = %item.item_id,
            created_at = item.created_at,
            "Novel item detected"
        );

        let acquired = match acquire_with_retry(
            self.acquirer.as_ref(),
            &item,
            self.retry_cap,
            self.backoff_base,
            &self.shutdown,
        )
        .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                error!(item_id = %item.item_id, "Acquisition failed: {}", e);
                return CycleOutcome::Failed {
                    stage: Stage::Acquire,
                    message: e.to_string(),
                };
            }
        };
        item.media_path = Some(acquired.path);

        let mut machine = PublishMachine::new(
            self.target.clone(),
            self.tuning.clone(),
            self.shutdown.clone(),
        );
        if let Err(e) = machine.run(&item).await {
            error!(
                item_id = %item.item_id,
                reason = ?e.reason(),
                "Publish failed: {}", e
            );
            return CycleOutcome::Failed {
                stage: Stage::Publish,
                message: e.to_string(),
            };
        }

        // Confirmed. Advance the watermark; a failure here means the item may
        // be published again next cycle, which the target tolerates better
        // than a silently skipped one.
        let cursor = CursorRecord::new(&item.producer.id, item.created_at, &item.item_id);
        if let Err(e) = self.store.commit(&item.producer, &cursor) {
            error!(item_id = %item.item_id, "Watermark commit failed: {}", e);
            return CycleOutcome::Failed {
                stage: Stage::Commit,
                message: e.to_string(),
            };
        }

        info!(
            producer = %self.producer_id,
            item_id = %item.item_id,
            watermark = item.created_at,
            "Item republished"
        );
        CycleOutcome::Published {
            item_id: item.item_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{PortageError, Result as AppResult};
    use crate::acquire::{AcquireError, Acquired};
    use crate::domain::{ProducerRecord, SourceAuthor, SourceItem};
    use crate::publish::{ConfirmSignal, PublishError, PublishMetadata, ReadinessSignal};
    use crate::store::SqliteStore;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn item(id: &str, created_at: i64, pinned: bool) -> SourceItem {
        SourceItem {
            id: id.into(),
            created_at,
            description: format!("desc-{}", id),
            pinned,
            author: SourceAuthor {
                id: "sec-1".into(),
                nickname: "Some Creator".into(),
                handle: "some.creator".into(),
            },
        }
    }

    struct StaticSource {
        items: Vec<SourceItem>,
        fail: bool,
    }

    #[async_trait]
    impl SourceFeed for StaticSource {
        async fn fetch_recent(&self, _producer_id: &str) -> AppResult<Vec<SourceItem>> {
            if self.fail {
                Err(PortageError::Source("connection reset".into()))
            } else {
                Ok(self.items.clone())
            }
        }
    }

    /// Writes a real file per download so publish preconditions hold.
    struct FileAcquirer {
        dir: PathBuf,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Acquirer for FileAcquirer {
        async fn download(&self, item: &crate::domain::PipelineItem) -> Result<Acquired, AcquireError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = self.dir.join(format!("{}.mp4", item.media_stem()));
            std::fs::write(&path, b"media").map_err(|e| AcquireError::Permanent(e.to_string()))?;
            Ok(Acquired {
                display_name: item.description.clone(),
                path,
            })
        }
    }

    /// Publish target that confirms immediately, or fails every attempt.
    struct InstantTarget {
        fail: AtomicBool,
        publishes: AtomicU32,
    }

    impl InstantTarget {
        fn ok() -> Self {
            Self {
                fail: AtomicBool::new(false),
                publishes: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: AtomicBool::new(true),
                publishes: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PublishTarget for InstantTarget {
        async fn establish_session(&self) -> Result<(), PublishError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(PublishError::AuthRequired)
            } else {
                Ok(())
            }
        }
        async fn submit_media(&self, _path: &Path) -> Result<(), PublishError> {
            Ok(())
        }
        async fn check_readiness(&self) -> Result<ReadinessSignal, PublishError> {
            Ok(ReadinessSignal::Ready)
        }
        async fn fill_metadata(&self, _meta: &PublishMetadata) -> Result<(), PublishError> {
            Ok(())
        }
        async fn select_cover(&self) -> Result<usize, PublishError> {
            Ok(1)
        }
        async fn trigger_publish(&self) -> Result<bool, PublishError> {
            Ok(true)
        }
        async fn check_confirmation(&self) -> Result<ConfirmSignal, PublishError> {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            Ok(ConfirmSignal::Live)
        }
        async fn persist_session(&self) -> Result<(), PublishError> {
            Ok(())
        }
        async fn close(&self) {}
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.producer.id = "sec-1".into();
        config.producer.handle = "some.creator".into();
        config.acquire.backoff_base_ms = 1;
        config.publish.poll_interval_ms = 1;
        config
    }

    fn orchestrator(
        store: Arc<SqliteStore>,
        items: Vec<SourceItem>,
        target: Arc<InstantTarget>,
        media_dir: &Path,
    ) -> Orchestrator<SqliteStore> {
        Orchestrator::new(
            store,
            Arc::new(StaticSource { items, fail: false }),
            Arc::new(FileAcquirer {
                dir: media_dir.to_path_buf(),
                calls: AtomicU32::new(0),
            }),
            target,
            &config(),
            Shutdown::never(),
        )
    }

    fn seed_watermark(store: &SqliteStore, seen_at: i64) {
        let producer = ProducerRecord::new("sec-1", "Some Creator", "some.creator");
        store
            .commit(&producer, &CursorRecord::new("sec-1", seen_at, "old"))
            .unwrap();
    }

    #[tokio::test]
    async fn test_published_item_advances_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        seed_watermark(&store, 100);

        let orch = orchestrator(
            store.clone(),
            vec![item("n-150", 150, false), item("n-100", 100, false)],
            Arc::new(InstantTarget::ok()),
            dir.path(),
        );

        let outcome = orch.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Published {
                item_id: "n-150".into()
            }
        );
        let cursor = store.cursor("sec-1").unwrap().unwrap();
        assert_eq!(cursor.last_seen_at, 150);
        assert_eq!(cursor.last_item_id, "n-150");
    }

    #[tokio::test]
    async fn test_second_cycle_after_publish_is_no_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        seed_watermark(&store, 100);

        let orch = orchestrator(
            store.clone(),
            vec![item("n-150", 150, false)],
            Arc::new(InstantTarget::ok()),
            dir.path(),
        );

        assert!(matches!(
            orch.run_cycle().await,
            CycleOutcome::Published { .. }
        ));
        assert_eq!(orch.run_cycle().await, CycleOutcome::NoUpdate);
    }

    #[tokio::test]
    async fn test_nothing_newer_is_no_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        seed_watermark(&store, 100);

        let orch = orchestrator(
            store.clone(),
            vec![item("n-100", 100, false), item("n-90", 90, false)],
            Arc::new(InstantTarget::ok()),
            dir.path(),
        );

        assert_eq!(orch.run_cycle().await, CycleOutcome::NoUpdate);
        assert_eq!(store.cursor("sec-1").unwrap().unwrap().last_seen_at, 100);
    }

    #[tokio::test]
    async fn test_pinned_items_never_selected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        seed_watermark(&store, 100);

        let orch = orchestrator(
            store.clone(),
            vec![item("pinned-200", 200, true)],
            Arc::new(InstantTarget::ok()),
            dir.path(),
        );

        assert_eq!(orch.run_cycle().await, CycleOutcome::NoUpdate);
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_item_eligible() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        seed_watermark(&store, 100);

        let target = Arc::new(InstantTarget::failing());
        let orch = orchestrator(
            store.clone(),
            vec![item("n-150", 150, false)],
            target.clone(),
            dir.path(),
        );

        let outcome = orch.run_cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                stage: Stage::Publish,
                ..
            }
        ));
        // Watermark untouched, so the same item is re-attempted next cycle.
        assert_eq!(store.cursor("sec-1").unwrap().unwrap().last_seen_at, 100);

        target.fail.store(false, Ordering::SeqCst);
        assert_eq!(
            orch.run_cycle().await,
            CycleOutcome::Published {
                item_id: "n-150".into()
            }
        );
        assert_eq!(store.cursor("sec-1").unwrap().unwrap().last_seen_at, 150);
    }

    #[tokio::test]
    async fn test_acquisition_failure_aborts_cycle_without_commit() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        seed_watermark(&store, 100);

        struct GoneAcquirer;

        #[async_trait]
        impl Acquirer for GoneAcquirer {
            async fn download(
                &self,
                item: &crate::domain::PipelineItem,
            ) -> Result<Acquired, AcquireError> {
                Err(AcquireError::NotFound(format!("no item {}", item.item_id)))
            }
        }

        let orch = Orchestrator::new(
            store.clone(),
            Arc::new(StaticSource {
                items: vec![item("n-150", 150, false)],
                fail: false,
            }),
            Arc::new(GoneAcquirer),
            Arc::new(InstantTarget::ok()),
            &config(),
            Shutdown::never(),
        );

        let outcome = orch.run_cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                stage: Stage::Acquire,
                ..
            }
        ));
        // The watermark must not move past an item that was never published.
        assert_eq!(store.cursor("sec-1").unwrap().unwrap().last_seen_at, 100);
    }

    #[tokio::test]
    async fn test_source_failure_is_no_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let orch = Orchestrator::new(
            store,
            Arc::new(StaticSource {
                items: Vec::new(),
                fail: true,
            }),
            Arc::new(FileAcquirer {
                dir: dir.path().to_path_buf(),
                calls: AtomicU32::new(0),
            }),
            Arc::new(InstantTarget::ok()),
            &config(),
            Shutdown::never(),
        );

        assert_eq!(orch.run_cycle().await, CycleOutcome::NoUpdate);
    }

    #[tokio::test]
    async fn test_first_cycle_without_watermark_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let orch = orchestrator(
            store.clone(),
            vec![item("n-50", 50, false)],
            Arc::new(InstantTarget::ok()),
            dir.path(),
        );

        assert!(matches!(
            orch.run_cycle().await,
            CycleOutcome::Published { .. }
        ));
        let producer = store.producer("sec-1").unwrap().unwrap();
        assert_eq!(producer.display_name, "Some Creator");
    }
}
