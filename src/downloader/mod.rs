//! Download lifecycle controller split into focused submodules.
//!
//! The [`Downloader`] facade owns the shared services and hands out one
//! [`DownloadSession`] per asset. The session and its methods are organized by
//! concern:
//! - [`session`] - Session state, preparation and task construction
//! - [`control`] - Resume, suspend, cancel and bitrate configuration
//! - [`relay`] - Transfer event relay (persist, then publish)
//! - [`persistence`] - Ordered session record writes
//! - [`offline`] - Offline media queries and removal

mod control;
mod offline;
mod persistence;
mod relay;
mod session;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use session::{DownloadSession, MediaOptionSelector};

use crate::config::Config;
use crate::entitlement::{EntitlementResolver, HttpEntitlementResolver};
use crate::error::Result;
use crate::store::{SessionStore, SqliteSessionStore};
use crate::transfer::TransferEngine;
use crate::types::{AssetId, Event};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Collaborators shared by every session (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Services {
    /// Entitlement resolver
    pub resolver: Arc<dyn EntitlementResolver>,
    /// Session record store
    pub store: Arc<dyn SessionStore>,
    /// Underlying transfer engine
    pub transfer: Arc<dyn TransferEngine>,
    /// HTTP client used by key exchange engines
    pub http: reqwest::Client,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Downloader {
    /// Configuration (wrapped in Arc for sharing across sessions)
    pub(crate) config: Arc<Config>,
    /// Shared collaborators
    pub(crate) services: Services,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// One session per asset
    pub(crate) sessions: Arc<std::sync::Mutex<HashMap<AssetId, DownloadSession>>>,
}

impl Downloader {
    /// Create a new Downloader instance
    ///
    /// This initializes the core components:
    /// - Opens/creates the SQLite session store and runs migrations
    /// - Builds the shared HTTP client and the Exposure entitlement resolver
    /// - Sets up the event broadcast channel
    pub async fn new(config: Config, transfer: Arc<dyn TransferEngine>) -> Result<Self> {
        let store = SqliteSessionStore::new(&config.persistence.database_path).await?;
        let http = config.http_client()?;
        let resolver = HttpEntitlementResolver::new(http.clone(), config.exposure.clone());

        tracing::info!(
            store = store.name(),
            customer = %config.exposure.customer,
            business_unit = %config.exposure.business_unit,
            "downloader initialized"
        );

        let services = Services {
            resolver: Arc::new(resolver),
            store: Arc::new(store),
            transfer,
            http,
        };
        Ok(Self::with_services(config, services))
    }

    /// Create a Downloader around caller-provided collaborators
    pub fn with_services(config: Config, services: Services) -> Self {
        let (event_tx, _rx) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            config: Arc::new(config),
            services,
            event_tx,
            sessions: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Session for `asset_id`, created on first use
    ///
    /// Repeated calls for the same asset return handles to the same session.
    pub fn download(&self, asset_id: impl Into<AssetId>) -> DownloadSession {
        let asset_id = asset_id.into();
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        sessions
            .entry(asset_id.clone())
            .or_insert_with(|| {
                tracing::debug!(asset_id = %asset_id, "creating download session");
                DownloadSession::new(
                    asset_id,
                    self.services.clone(),
                    &self.config.drm,
                    self.event_tx.clone(),
                )
            })
            .clone()
    }

    /// Existing session for `asset_id`, if one was created
    pub(crate) fn session(&self, asset_id: &AssetId) -> Option<DownloadSession> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(asset_id)
            .cloned()
    }

    /// Subscribe to events from every session
    ///
    /// Events carry their asset identifier. A slow subscriber that falls more
    /// than `event_channel_capacity` events behind receives `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Events from every session as a `Stream`
    pub fn event_stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.event_tx.subscribe())
    }

    /// Configuration this downloader was built with
    pub fn config(&self) -> &Config {
        &self.config
    }
}
