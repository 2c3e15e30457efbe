//! # protected-dl
//!
//! Acquisition layer for DRM-protected offline media.
//!
//! ## Design Philosophy
//!
//! protected-dl is designed to be:
//! - **Entitlement-gated** - Nothing is transferred before the user's rights are resolved
//! - **Crash-resilient** - Every lifecycle change is persisted before it is announced
//! - **Library-first** - The host supplies the byte transfer; this crate sequences it
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Components
//!
//! - [`KeyExchangeEngine`] answers FairPlay key requests (certificate, SPC, CKC)
//! - [`DownloadSession`] drives one asset from entitlement to completed download
//! - [`Downloader`] owns the shared services and one session per asset
//!
//! ## Quick Start
//!
//! ```no_run
//! use protected_dl::{Config, Downloader, TransferEngine};
//! use std::sync::Arc;
//!
//! # async fn example(engine: Arc<dyn TransferEngine>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::default();
//! config.exposure.customer = "customer".to_string();
//! config.exposure.business_unit = "unit".to_string();
//! config.exposure.session_token = Some("token".to_string());
//!
//! let downloader = Downloader::new(config, engine).await?;
//!
//! // Subscribe to events
//! let mut events = downloader.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let session = downloader.download("asset-1");
//! session.prepare(false).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Download lifecycle controller (decomposed into focused submodules)
pub mod downloader;
/// FairPlay key exchange
pub mod drm;
/// Entitlement resolution
pub mod entitlement;
/// Error types
pub mod error;
/// Session record persistence
pub mod store;
/// Contract with the underlying transfer engine
pub mod transfer;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, DrmConfig, ExposureConfig, KeyDelivery, PersistenceConfig};
pub use downloader::{DownloadSession, Downloader, MediaOptionSelector, Services};
pub use drm::{
    ChallengeId, ChallengeState, ChallengeTransition, Claim, ContentKeyRequest, KeyExchangeEngine,
    KeyExchangeOptions,
};
pub use entitlement::{EntitlementRequest, EntitlementResolver, HttpEntitlementResolver};
pub use error::{
    DatabaseError, DownloadError, EntitlementError, Error, KeyExchangeError, NetworkError,
    PlatformError, Result, TransferError,
};
pub use store::{MemorySessionStore, OfflineState, SessionRecord, SessionStore, SqliteSessionStore};
pub use transfer::{
    RestoreOutcome, TaskBinding, TransferEngine, TransferEvent, TransferEventSender, TransferTask,
};
pub use types::{
    AdditionalMedia, AssetId, DownloadState, DrmScheme, Entitlement, EntitlementValidation, Event,
    FairplayConfiguration, MediaFormat, MediaOption, PlayRequest, Progress,
};
