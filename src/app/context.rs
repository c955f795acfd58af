//! Application context: constructor-time wiring of the pipeline stages.

use std::sync::Arc;

use crate::acquire::{Acquirer, HttpAcquirer};
use crate::app::{PortageError, Result, Shutdown};
use crate::config::Config;
use crate::pipeline::Orchestrator;
use crate::publish::{ChromeTarget, PublishTarget, SessionStore};
use crate::source::{HttpSource, SourceFeed};
use crate::store::SqliteStore;

/// Holds the wired components for one process instance. Built once at
/// startup; commands borrow from it.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub source: Arc<dyn SourceFeed>,
    pub acquirer: Arc<dyn Acquirer>,
    pub target: Arc<dyn PublishTarget>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        config
            .require_producer()
            .map_err(|e| PortageError::Config(e.to_string()))?;

        let db_path = Config::default_db_path().map_err(|e| PortageError::Config(e.to_string()))?;
        let store = Arc::new(SqliteStore::new(&db_path)?);

        let media_dir = config
            .media_dir()
            .map_err(|e| PortageError::Config(e.to_string()))?;
        let session_file = config
            .session_file()
            .map_err(|e| PortageError::Config(e.to_string()))?;

        let source = Arc::new(HttpSource::new(&config.source));
        let acquirer = Arc::new(HttpAcquirer::new(&config.source, &config.acquire, media_dir));
        let target = Arc::new(ChromeTarget::new(
            config.publish.clone(),
            SessionStore::new(session_file),
        ));

        Ok(Self {
            config,
            store,
            source,
            acquirer,
            target,
        })
    }

    pub fn orchestrator(&self, shutdown: Shutdown) -> Orchestrator<SqliteStore> {
        Orchestrator::new(
            self.store.clone(),
            self.source.clone(),
            self.acquirer.clone(),
            self.target.clone(),
            &self.config,
            shutdown,
        )
    }
}
