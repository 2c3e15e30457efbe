//! Ordered session record writes.
//!
//! Each persisting event takes a sequence number when it is received. A write
//! lands only if no later-sequenced write has landed before it, so a slow
//! write for an earlier event can never overwrite the record of a later one.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::store::{SessionRecord, SessionStore};

/// Serializes one session's record writes
pub(crate) struct PersistenceGate {
    sequence: AtomicU64,
    last_written: Mutex<u64>,
}

impl PersistenceGate {
    pub(crate) fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            last_written: Mutex::new(0),
        }
    }

    /// Sequence number for the next persisting event
    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Save `record` unless a later sequence was already written
    ///
    /// Returns whether the record was written.
    pub(crate) async fn write(
        &self,
        store: &dyn SessionStore,
        sequence: u64,
        record: &SessionRecord,
    ) -> Result<bool> {
        let mut last_written = self.last_written.lock().await;
        if sequence < *last_written {
            tracing::debug!(
                asset_id = %record.asset_id,
                sequence,
                last_written = *last_written,
                "skipping stale session record write"
            );
            return Ok(false);
        }

        store.save(record).await?;
        *last_written = sequence;
        Ok(true)
    }
}
