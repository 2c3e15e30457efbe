//! Configuration types for protected-dl

use crate::types::{DrmScheme, MediaFormat};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Exposure backend settings used by the entitlement resolver
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Base URL of the Exposure API (e.g. "https://exposure.example.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Customer group
    #[serde(default)]
    pub customer: String,

    /// Business unit within the customer group
    #[serde(default)]
    pub business_unit: String,

    /// Session token sent as a bearer credential
    #[serde(default)]
    pub session_token: Option<String>,

    /// Timeout applied by the HTTP client to every request (None = client default)
    #[serde(default, with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            customer: String::new(),
            business_unit: String::new(),
            session_token: None,
            request_timeout: None,
        }
    }
}

/// How a fetched content key is handed to the challenge
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDelivery {
    /// Deliver the CKC as received (streaming playback)
    #[default]
    Streaming,
    /// Convert the CKC into a persistable key first (offline playback)
    Persistable,
}

/// Key exchange and entitlement request parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DrmConfig {
    /// DRM scheme requested from the entitlement service (default: FAIRPLAY)
    #[serde(default)]
    pub drm: DrmScheme,

    /// Media format requested from the entitlement service (default: HLS)
    #[serde(default)]
    pub format: MediaFormat,

    /// URI scheme of key requests claimed by the key exchange engine (default: "skd")
    #[serde(default = "default_custom_scheme")]
    pub custom_scheme: String,

    /// Reuse the application certificate across challenges of one engine (default: false)
    ///
    /// Off by default: every challenge fetches a fresh certificate.
    #[serde(default)]
    pub cache_application_certificate: bool,

    /// Key delivery mode
    #[serde(default)]
    pub key_delivery: KeyDelivery,
}

impl Default for DrmConfig {
    fn default() -> Self {
        Self {
            drm: DrmScheme::default(),
            format: MediaFormat::default(),
            custom_scheme: default_custom_scheme(),
            cache_application_certificate: false,
            key_delivery: KeyDelivery::default(),
        }
    }
}

/// Data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path for session records (default: "./protected-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for [`Downloader`](crate::Downloader)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Exposure backend
    #[serde(default)]
    pub exposure: ExposureConfig,

    /// Key exchange and entitlement parameters
    #[serde(default)]
    pub drm: DrmConfig,

    /// Session record storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exposure: ExposureConfig::default(),
            drm: DrmConfig::default(),
            persistence: PersistenceConfig::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Config {
    /// Build the shared HTTP client honoring `exposure.request_timeout`
    pub fn http_client(&self) -> crate::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.exposure.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().map_err(|e| crate::Error::Config {
            message: format!("failed to build HTTP client: {}", e),
            key: Some("exposure.request_timeout".to_string()),
        })
    }
}

fn default_base_url() -> String {
    "https://exposure.api.redbee.live".into()
}

fn default_custom_scheme() -> String {
    "skd".into()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./protected-dl.db")
}

fn default_event_channel_capacity() -> usize {
    1000
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
