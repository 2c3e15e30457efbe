//! In-process session store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::Result;
use crate::types::AssetId;

use super::{SessionRecord, SessionStore};

/// Session store that keeps records in memory
///
/// Records do not survive the process. Useful for embedding where another
/// layer owns durability, and for tests.
#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<BTreeMap<AssetId, SessionRecord>>,
}

impl MemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<AssetId, SessionRecord>> {
        // a poisoned map is still consistent: every write is a single insert/remove
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn lookup(&self, asset_id: &AssetId) -> Result<Option<SessionRecord>> {
        Ok(self.records().get(asset_id).cloned())
    }

    async fn save(&self, record: &SessionRecord) -> Result<()> {
        self.records()
            .insert(record.asset_id.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.records().values().cloned().collect())
    }

    async fn remove(&self, asset_id: &AssetId) -> Result<bool> {
        Ok(self.records().remove(asset_id).is_some())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
