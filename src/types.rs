//! Core types for protected-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Error;

/// Identifier of a protected asset
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    /// Create a new AssetId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty (never resolvable)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AssetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// DRM scheme requested from the entitlement service
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DrmScheme {
    /// FairPlay Streaming, negotiated through the key exchange engine
    #[default]
    Fairplay,
    /// Clear content, no key negotiation
    Unencrypted,
}

impl DrmScheme {
    /// Wire value used in entitlement queries
    pub fn as_str(&self) -> &'static str {
        match self {
            DrmScheme::Fairplay => "FAIRPLAY",
            DrmScheme::Unencrypted => "UNENCRYPTED",
        }
    }
}

/// Media format requested from the entitlement service
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaFormat {
    /// HTTP Live Streaming
    #[default]
    Hls,
}

impl MediaFormat {
    /// Wire value used in entitlement queries
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Hls => "HLS",
        }
    }
}

/// DRM and format parameters for an entitlement request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayRequest {
    /// DRM scheme
    pub drm: DrmScheme,
    /// Media format
    pub format: MediaFormat,
}

/// FairPlay endpoints granted by an entitlement
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FairplayConfiguration {
    /// Application certificate endpoint
    #[serde(default)]
    pub certificate_url: Option<String>,
    /// License (content key context) endpoint
    #[serde(default)]
    pub license_acquisition_url: Option<String>,
    /// Alternative media locator for FairPlay protected playback
    #[serde(default)]
    pub secondary_media_locator: Option<String>,
}

/// Usage rights granted for one asset
///
/// Immutable once resolved. A fresh entitlement may replace a stale one on
/// re-resolution, never by mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    /// Token authorizing playback
    pub play_token: String,
    /// Location of the media manifest
    pub media_locator: String,
    /// FairPlay configuration; absent for unencrypted content
    #[serde(default)]
    pub fairplay: Option<FairplayConfiguration>,
    /// When the license expires
    #[serde(default)]
    pub license_expiration: Option<DateTime<Utc>>,
    /// Why the license expires at that time
    #[serde(default)]
    pub license_expiration_reason: Option<String>,
    /// When the license becomes active
    #[serde(default)]
    pub license_activation: Option<DateTime<Utc>>,
    /// When the play token expires
    #[serde(default)]
    pub play_token_expiration: Option<DateTime<Utc>>,
    /// Kind of entitlement (e.g. "TVOD", "SVOD")
    #[serde(default)]
    pub entitlement_type: Option<String>,
    /// Live stream flag
    #[serde(default)]
    pub live: Option<bool>,
    /// Play session identifier
    #[serde(default)]
    pub play_session_id: Option<String>,
    /// Fast forward allowed
    #[serde(default)]
    pub ff_enabled: Option<bool>,
    /// Timeshift allowed
    #[serde(default)]
    pub timeshift_enabled: Option<bool>,
    /// Rewind allowed
    #[serde(default)]
    pub rw_enabled: Option<bool>,
    /// Minimum bitrate in bits per second
    #[serde(default)]
    pub min_bitrate: Option<u64>,
    /// Maximum bitrate in bits per second
    #[serde(default)]
    pub max_bitrate: Option<u64>,
    /// Maximum resolution height
    #[serde(default)]
    pub max_res_height: Option<u32>,
    /// AirPlay blocked
    #[serde(default)]
    pub airplay_blocked: Option<bool>,
    /// Request router URL for multi-CDN setups
    #[serde(default)]
    pub mdn_request_router_url: Option<String>,
    /// Bookmark offset in milliseconds
    #[serde(default)]
    pub last_viewed_offset: Option<i64>,
    /// Bookmark wall clock time in milliseconds since epoch
    #[serde(default)]
    pub last_viewed_time: Option<i64>,
    /// Live edge time in milliseconds since epoch
    #[serde(default)]
    pub live_time: Option<i64>,
    /// Product that granted the entitlement
    #[serde(default)]
    pub product_id: Option<String>,
}

impl Entitlement {
    /// Minimal entitlement with only the required fields set
    pub fn new(play_token: impl Into<String>, media_locator: impl Into<String>) -> Self {
        Self {
            play_token: play_token.into(),
            media_locator: media_locator.into(),
            fairplay: None,
            license_expiration: None,
            license_expiration_reason: None,
            license_activation: None,
            play_token_expiration: None,
            entitlement_type: None,
            live: None,
            play_session_id: None,
            ff_enabled: None,
            timeshift_enabled: None,
            rw_enabled: None,
            min_bitrate: None,
            max_bitrate: None,
            max_res_height: None,
            airplay_blocked: None,
            mdn_request_router_url: None,
            last_viewed_offset: None,
            last_viewed_time: None,
            live_time: None,
            product_id: None,
        }
    }

    /// Attach FairPlay endpoints
    pub fn with_fairplay(
        mut self,
        certificate_url: impl Into<String>,
        license_acquisition_url: impl Into<String>,
    ) -> Self {
        self.fairplay = Some(FairplayConfiguration {
            certificate_url: Some(certificate_url.into()),
            license_acquisition_url: Some(license_acquisition_url.into()),
            secondary_media_locator: None,
        });
        self
    }

    /// Certificate endpoint, if granted
    pub fn certificate_url(&self) -> Option<&str> {
        self.fairplay.as_ref()?.certificate_url.as_deref()
    }

    /// License endpoint, if granted
    pub fn license_url(&self) -> Option<&str> {
        self.fairplay.as_ref()?.license_acquisition_url.as_deref()
    }

    /// Whether the license has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.license_expiration.is_some_and(|expiry| expiry <= now)
    }
}

/// Response of an entitlement validation request
///
/// The service answers 200 even when the user is not entitled; `status`
/// carries the verdict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementValidation {
    /// Entitlement status (e.g. "SUCCESS", "NOT_ENTITLED")
    pub status: String,
    /// Payment status, when relevant
    #[serde(default)]
    pub payment_done: Option<bool>,
}

/// Lifecycle state of a download session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// No transfer task is running
    #[default]
    NotStarted,
    /// Transfer in progress
    Running,
    /// Transfer paused or halted by an error
    Suspended,
    /// Cancellation requested, awaiting acknowledgement
    Canceling,
    /// Media fully downloaded
    Completed,
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DownloadState::NotStarted => "not_started",
            DownloadState::Running => "running",
            DownloadState::Suspended => "suspended",
            DownloadState::Canceling => "canceling",
            DownloadState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Transfer progress
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Fraction completed (0.0 to 1.0)
    pub current: f64,
}

/// Additional media (audio or subtitle renditions) offered by a transfer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdditionalMedia {
    /// Media characteristic (e.g. "audible", "legible")
    pub characteristic: String,
    /// Options available for this characteristic
    pub options: Vec<MediaOption>,
}

/// A single selectable rendition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaOption {
    /// Display name
    pub display_name: String,
    /// Language tag, if any
    pub language: Option<String>,
}

/// Event emitted by a download session
///
/// Every event names the asset it belongs to, so one subscriber can follow
/// several sessions.
#[derive(Clone, Debug)]
pub enum Event {
    /// Transfer task prepared
    Prepared {
        /// Asset
        asset_id: AssetId,
    },

    /// Transfer suspended
    Suspended {
        /// Asset
        asset_id: AssetId,
    },

    /// Transfer resumed
    Resumed {
        /// Asset
        asset_id: AssetId,
    },

    /// Transfer canceled; the record was already persisted
    Canceled {
        /// Asset
        asset_id: AssetId,
        /// Partial media location, if any
        location: Option<PathBuf>,
    },

    /// Transfer completed; the record was already persisted
    Completed {
        /// Asset
        asset_id: AssetId,
        /// Local media location
        location: PathBuf,
    },

    /// Transfer progress update
    Progress {
        /// Asset
        asset_id: AssetId,
        /// Progress
        progress: Progress,
    },

    /// Error at any stage; the record was already persisted when applicable
    Error {
        /// Asset
        asset_id: AssetId,
        /// Best-known media location, if any
        location: Option<PathBuf>,
        /// The error
        error: Arc<Error>,
    },

    /// Enough media is downloaded to start offline playback
    PlaybackReady {
        /// Asset
        asset_id: AssetId,
        /// Local media location
        location: PathBuf,
    },

    /// The transfer started downloading an additional media option
    DownloadingMediaOption {
        /// Asset
        asset_id: AssetId,
        /// Selected option
        option: MediaOption,
    },

    /// Entitlement request sent
    EntitlementRequestStarted {
        /// Asset
        asset_id: AssetId,
    },

    /// Entitlement received (fresh or from the session store)
    EntitlementResponse {
        /// Asset
        asset_id: AssetId,
        /// The entitlement
        entitlement: Box<Entitlement>,
    },

    /// In-flight entitlement request cancelled
    EntitlementRequestCancelled {
        /// Asset
        asset_id: AssetId,
    },
}

impl Event {
    /// Asset the event belongs to
    pub fn asset_id(&self) -> &AssetId {
        match self {
            Event::Prepared { asset_id }
            | Event::Suspended { asset_id }
            | Event::Resumed { asset_id }
            | Event::Canceled { asset_id, .. }
            | Event::Completed { asset_id, .. }
            | Event::Progress { asset_id, .. }
            | Event::Error { asset_id, .. }
            | Event::PlaybackReady { asset_id, .. }
            | Event::DownloadingMediaOption { asset_id, .. }
            | Event::EntitlementRequestStarted { asset_id }
            | Event::EntitlementResponse { asset_id, .. }
            | Event::EntitlementRequestCancelled { asset_id } => asset_id,
        }
    }
}
