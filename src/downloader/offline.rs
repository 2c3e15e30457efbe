//! Offline media queries and removal.

use crate::error::{DownloadError, Error, Result};
use crate::store::SessionRecord;
use crate::types::{AssetId, DownloadState};
use std::path::Path;

use super::Downloader;

impl Downloader {
    /// Stored record for `asset_id`, complete or not
    pub async fn offline(&self, asset_id: &AssetId) -> Result<Option<SessionRecord>> {
        self.services.store.lookup(asset_id).await
    }

    /// All stored records, ordered by asset identifier
    pub async fn offline_assets(&self) -> Result<Vec<SessionRecord>> {
        self.services.store.list().await
    }

    /// Delete the local media of `asset_id`, then its record
    ///
    /// Refused while the asset's session has a bound transfer task or
    /// entitlement request; cancel it first.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidState`] if the session is busy
    /// - [`DownloadError::NotFound`] if there is no record
    /// - [`DownloadError::RemoveFailed`] if the local media could not be deleted
    pub async fn remove_offline(&self, asset_id: &AssetId) -> Result<()> {
        let session = self.session(asset_id);
        let mut guard = match &session {
            Some(session) => Some(session.ctx.state.lock().await),
            None => None,
        };

        if let Some(state) = &guard {
            if state.is_busy() {
                return Err(Error::Download(DownloadError::InvalidState {
                    asset_id: asset_id.to_string(),
                    operation: "remove".to_string(),
                    current_state: state.lifecycle.to_string(),
                }));
            }
        }

        let record = self.services.store.lookup(asset_id).await?.ok_or_else(|| {
            Error::Download(DownloadError::NotFound {
                asset_id: asset_id.to_string(),
            })
        })?;

        if let Some(location) = &record.location {
            remove_media(location).await?;
        }
        self.services.store.remove(asset_id).await?;

        if let Some(state) = guard.as_mut() {
            state.lifecycle = DownloadState::NotStarted;
            state.entitlement = None;
        }

        tracing::info!(asset_id = %asset_id, "removed offline media");
        Ok(())
    }
}

/// Remove a media file or directory; a location that is already gone is fine
async fn remove_media(location: &Path) -> Result<()> {
    let metadata = match tokio::fs::metadata(location).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(location = %location.display(), "local media already gone");
            return Ok(());
        }
        Err(e) => return Err(remove_failed(location, e)),
    };

    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir_all(location).await
    } else {
        tokio::fs::remove_file(location).await
    };
    removed.map_err(|e| remove_failed(location, e))
}

fn remove_failed(location: &Path, e: std::io::Error) -> Error {
    Error::Download(DownloadError::RemoveFailed {
        path: location.to_path_buf(),
        reason: e.to_string(),
    })
}
