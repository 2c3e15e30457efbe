//! Contract with the underlying transfer engine
//!
//! The byte transfer itself (HLS segment download, asset catalog) belongs to
//! the host. It creates or restores tasks bound to a [`KeyExchangeEngine`],
//! routes the key requests those tasks raise to that engine, and reports
//! lifecycle and progress through the [`TransferEvent`] channel handed to it
//! in the [`TaskBinding`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::drm::KeyExchangeEngine;
use crate::error::TransferError;
use crate::types::{AdditionalMedia, AssetId, MediaOption, Progress};

/// Sender half of a task's event channel
pub type TransferEventSender = mpsc::UnboundedSender<TransferEvent>;

/// Lifecycle and progress reports from a transfer task
#[derive(Debug)]
pub enum TransferEvent {
    /// Task prepared
    Prepared,
    /// Task suspended
    Suspended,
    /// Task resumed
    Resumed,
    /// Task canceled (acknowledgement of [`TransferTask::cancel`])
    Canceled {
        /// Partial media location, if any
        location: Option<PathBuf>,
    },
    /// All media downloaded
    Completed {
        /// Local media location
        location: PathBuf,
    },
    /// Progress update
    Progress(Progress),
    /// Task failed; it stays resumable
    Error {
        /// Best-known local media location
        location: Option<PathBuf>,
        /// The failure
        error: TransferError,
    },
    /// Enough media downloaded for offline playback to start
    PlaybackReady {
        /// Local media location
        location: PathBuf,
    },
    /// The task asks which option of `media` to download
    ShouldDownloadMediaOption {
        /// Offered media
        media: AdditionalMedia,
        /// Where to send the choice (`None` skips the media)
        reply: oneshot::Sender<Option<MediaOption>>,
    },
    /// The task started downloading an additional media option
    DownloadingMediaOption(MediaOption),
}

/// What a task is bound to
#[derive(Clone)]
pub struct TaskBinding {
    /// Asset being transferred
    pub asset_id: AssetId,
    /// Engine answering the task's key requests
    pub key_exchange: Arc<KeyExchangeEngine>,
    /// Channel for the task's events
    pub events: TransferEventSender,
    /// Preferred bitrate in bits per second, if configured
    pub bitrate: Option<u64>,
}

/// Result of looking for a task left over from an earlier run
pub enum RestoreOutcome {
    /// A task was found and re-bound
    Restored(Box<dyn TransferTask>),
    /// Nothing to restore
    NotFound,
}

/// Transfer engine that creates and restores tasks
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Re-bind a task created by an earlier run for `binding.asset_id`
    async fn restore_task(&self, binding: TaskBinding) -> RestoreOutcome;

    /// Create a new task downloading `media_locator`
    async fn create_task(
        &self,
        media_locator: Url,
        binding: TaskBinding,
    ) -> std::result::Result<Box<dyn TransferTask>, TransferError>;
}

/// Handle to one transfer task
///
/// Control calls return immediately; acknowledgements arrive as
/// [`TransferEvent`]s.
pub trait TransferTask: Send + Sync {
    /// Prepare the task; unless `lazily`, start transferring right away
    fn prepare(&self, lazily: bool);

    /// Resume transferring
    fn resume(&self);

    /// Suspend transferring
    fn suspend(&self);

    /// Request cancellation
    fn cancel(&self);
}
