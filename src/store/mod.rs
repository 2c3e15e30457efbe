//! Session store: durable (entitlement, location) records per asset
//!
//! A record exists once an asset has started downloading and is replaced
//! as a whole on every suspend, cancel, completion or error, so a relaunch
//! can pick up from the last durable point.
//!
//! ## Submodules
//!
//! - [`migrations`] - SQLite database lifecycle and schema migrations
//! - [`records`] - SQLite record CRUD
//! - [`memory`] - in-process store

use crate::Result;
use crate::types::{AssetId, Entitlement};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use std::path::PathBuf;

mod memory;
mod migrations;
mod records;

pub use memory::MemorySessionStore;

/// Playability of the media a record points at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfflineState {
    /// Media fully downloaded and playable offline
    Completed,
    /// Download underway, interrupted or failed
    NotPlayable,
}

impl OfflineState {
    /// Convert integer state code to OfflineState
    pub fn from_i32(state: i32) -> Self {
        match state {
            1 => OfflineState::Completed,
            _ => OfflineState::NotPlayable,
        }
    }

    /// Convert OfflineState to integer state code
    pub fn to_i32(&self) -> i32 {
        match self {
            OfflineState::NotPlayable => 0,
            OfflineState::Completed => 1,
        }
    }
}

/// Persisted state of one asset
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    /// Asset the record belongs to
    pub asset_id: AssetId,
    /// Entitlement snapshot
    pub entitlement: Entitlement,
    /// Last known local media location
    pub location: Option<PathBuf>,
    /// Whether the media is fully downloaded
    pub state: OfflineState,
    /// When the record was written
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Record for a download that is underway or was interrupted
    pub fn in_progress(
        asset_id: AssetId,
        entitlement: Entitlement,
        location: Option<PathBuf>,
    ) -> Self {
        Self {
            asset_id,
            entitlement,
            location,
            state: OfflineState::NotPlayable,
            updated_at: Utc::now(),
        }
    }

    /// Record for fully downloaded media
    pub fn completed(asset_id: AssetId, entitlement: Entitlement, location: PathBuf) -> Self {
        Self {
            asset_id,
            entitlement,
            location: Some(location),
            state: OfflineState::Completed,
            updated_at: Utc::now(),
        }
    }

    /// Whether the media can be played without touching the network
    pub fn is_completed(&self) -> bool {
        self.state == OfflineState::Completed && self.location.is_some()
    }
}

/// Durable storage for session records
///
/// `save` replaces the whole record for the asset in one write.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Last saved record for the asset
    async fn lookup(&self, asset_id: &AssetId) -> Result<Option<SessionRecord>>;

    /// Insert or replace the record for `record.asset_id`
    async fn save(&self, record: &SessionRecord) -> Result<()>;

    /// All records, ordered by asset id
    async fn list(&self) -> Result<Vec<SessionRecord>>;

    /// Delete the record; returns whether one existed
    async fn remove(&self, asset_id: &AssetId) -> Result<bool>;

    /// Whether the asset is fully downloaded
    async fn is_completed(&self, asset_id: &AssetId) -> Result<bool> {
        Ok(self
            .lookup(asset_id)
            .await?
            .is_some_and(|record| record.is_completed()))
    }

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// SQLite-backed session store
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
