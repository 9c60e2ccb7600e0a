//! Core service façade and bootstrap helpers.
//!
//! This crate wires a validated [`CoreConfig`] into the shared Rust core: an
//! AnkiConnect note source, a Notion page database and the sync coordinator
//! that runs between them. Desktop hosts typically enable the `desktop-shims`
//! feature (which depends on `bridge-desktop`) to get a reqwest-backed HTTP
//! client; other hosts inject their own through
//! [`CoreConfigBuilder::http_client`](core_runtime::config::CoreConfigBuilder::http_client).
//!
//! ```ignore
//! use core_service::SyncService;
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .notion_token(token)
//!     .notion_database_url("https://www.notion.so/ws/0123456789abcdef0123456789abcdef")
//!     .anki_query_string("deck:Rust")
//!     .build()?;
//! let service = SyncService::from_config(config)?;
//! let report = service.run_sync().await?;
//! let pulled = service.run_pull().await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{
    http::HttpClient,
    source::{NoteSource, SourceUpdate},
    target::PageDatabase,
};
use core_runtime::{
    config::{CoreConfig, RunOptions},
    events::{CoreEvent, EventBus},
};
use core_sync::{PullReport, SyncCoordinator, SyncReport, SyncRunHandle, SyncRunId};
use provider_ankiconnect::AnkiConnectSource;
use provider_notion::NotionConnector;
use tokio::sync::broadcast::Receiver;
use tracing::info;

/// Buffered events per subscriber before it starts lagging
const EVENT_BUS_CAPACITY: usize = 256;

/// Aggregated handle to the two stores a sync runs between.
pub struct CoreDependencies {
    pub source: Arc<dyn NoteSource>,
    pub database: Arc<dyn PageDatabase>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit store handles.
    pub fn new(source: Arc<dyn NoteSource>, database: Arc<dyn PageDatabase>) -> Self {
        Self { source, database }
    }

    /// AnkiConnect and Notion connectors sharing one HTTP client.
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        let http_client = match &config.http_client {
            Some(client) => Arc::clone(client),
            None => default_http_client()?,
        };

        let source = AnkiConnectSource::new(Arc::clone(&http_client), &config.ankiconnect_url);
        let database = NotionConnector::new(http_client, &config.notion_token);

        Ok(Self::new(Arc::new(source), Arc::new(database)))
    }
}

#[cfg(feature = "desktop-shims")]
fn default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()?))
}

#[cfg(not(feature = "desktop-shims"))]
fn default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(CoreError::CapabilityMissing {
        capability: "http_client".to_string(),
        message: "enable `desktop-shims` or inject a client into CoreConfig".to_string(),
    })
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct SyncService {
    config: Arc<CoreConfig>,
    coordinator: Arc<SyncCoordinator>,
    event_bus: Arc<EventBus>,
}

impl SyncService {
    /// Create a service over explicit stores.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate
    pub fn new(config: CoreConfig, deps: CoreDependencies) -> Result<Self> {
        config.validate()?;

        let event_bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
        let coordinator = SyncCoordinator::new(
            deps.source,
            deps.database,
            config.database_id()?,
            Arc::clone(&event_bus),
        )
        .with_body_field(config.body_field.clone());

        info!(
            database_id = coordinator.database_id(),
            body_field = %config.body_field,
            "Sync service ready"
        );

        Ok(Self {
            config: Arc::new(config),
            coordinator: Arc::new(coordinator),
            event_bus,
        })
    }

    /// Create a service talking to AnkiConnect and Notion.
    pub fn from_config(config: CoreConfig) -> Result<Self> {
        let deps = CoreDependencies::from_config(&config)?;
        Self::new(config, deps)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn run_options(&self) -> RunOptions {
        self.config.run_options()
    }

    /// Run one sync with the configured options and wait for its report.
    pub async fn run_sync(&self) -> Result<SyncReport> {
        Ok(self.coordinator.run_sync(self.run_options()).await?)
    }

    /// Run one sync with explicit options.
    pub async fn run_sync_with(&self, options: RunOptions) -> Result<SyncReport> {
        Ok(self.coordinator.run_sync(options).await?)
    }

    /// Import pages tagged ready in Notion into Anki with the configured
    /// options. Fails with `SyncInProgress` while a sync is running.
    pub async fn run_pull(&self) -> Result<PullReport> {
        Ok(self.coordinator.run_pull(self.run_options()).await?)
    }

    /// Start a sync in the background. The handle can cancel or await it.
    pub async fn start_sync(&self) -> Result<SyncRunHandle> {
        Ok(self.coordinator.start_sync(self.run_options()).await?)
    }

    pub async fn cancel_sync(&self, run_id: SyncRunId) -> Result<()> {
        Ok(self.coordinator.cancel_sync(run_id).await?)
    }

    pub async fn is_sync_active(&self) -> bool {
        self.coordinator.is_sync_active().await
    }

    /// Subscribe to run and schema events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    /// Project a Notion page back into a note update, honoring
    /// `retain_notion_children`. Nothing is written to Anki.
    pub async fn preview_pull(&self, page_id: &str) -> Result<SourceUpdate> {
        Ok(self
            .coordinator
            .preview_pull(page_id, self.config.retain_notion_children)
            .await?)
    }
}
