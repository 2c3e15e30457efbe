//! Error types for protected-dl
//!
//! This module provides the error taxonomy for the library:
//! - Resolution errors ([`EntitlementError`]) raised while obtaining an entitlement
//! - Key-exchange errors ([`KeyExchangeError`]) that fail a single key request challenge
//! - Transfer errors ([`TransferError`]) relayed from the underlying transfer engine
//! - Persistence errors ([`DatabaseError`]) from the session store
//!
//! None of these are retried by the library. They reach callers through
//! [`Event::Error`](crate::types::Event::Error) or as the return value of the
//! operation that failed locally.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for protected-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for protected-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "base_url")
        key: Option<String>,
    },

    /// Session store operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Entitlement could not be resolved
    #[error("entitlement error: {0}")]
    Entitlement(#[from] EntitlementError),

    /// A key request challenge failed
    #[error("key exchange error: {0}")]
    KeyExchange(#[from] KeyExchangeError),

    /// Download lifecycle error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Failure reported by the underlying transfer engine
    #[error("transfer error: {0}")]
    Transfer(TransferError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<TransferError> for Error {
    /// Key-exchange failures surfaced by the transfer engine keep their own variant
    fn from(error: TransferError) -> Self {
        match error {
            TransferError::KeyExchange(e) => Error::KeyExchange(e),
            other => Error::Transfer(other),
        }
    }
}

/// Session store errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored record could not be decoded
    #[error("corrupt session record for {asset_id}: {reason}")]
    CorruptRecord {
        /// Asset whose record is unreadable
        asset_id: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Transport-level failure of an HTTP exchange
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The request never produced a response (DNS, connect, TLS, body read)
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("server returned status {status}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, if readable
        body: Option<String>,
    },
}

impl NetworkError {
    /// Status code of a non-success response, if this was one
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Status { status, .. } => Some(*status),
            NetworkError::Http(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

/// Errors raised while resolving an entitlement
#[derive(Debug, Error)]
pub enum EntitlementError {
    /// Asset identifier was empty
    #[error("invalid asset id: {0:?}")]
    InvalidAssetId(String),

    /// The request could not be sent or its response could not be read
    #[error("entitlement request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The service answered with a non-success status
    #[error("entitlement service returned status {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Error message from the service envelope, or the raw body
        message: String,
    },

    /// The service refused the entitlement (business response)
    #[error("not entitled: {reason}")]
    NotEntitled {
        /// Refusal reason as reported by the service (e.g. "NOT_ENTITLED")
        reason: String,
    },

    /// The entitlement payload could not be decoded
    #[error("malformed entitlement payload: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Failure reported by the host platform's key-request primitive
///
/// The code is the platform status code; known FairPlay codes get a
/// description attached so logs are readable without a lookup table.
#[derive(Debug, Clone, Error)]
#[error("platform error {code}: {message}")]
pub struct PlatformError {
    /// Platform status code
    pub code: i64,
    /// Diagnostic message
    pub message: String,
}

impl PlatformError {
    /// Wrap a platform status code, attaching the known description if any
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = match describe_platform_code(code) {
            Some(known) if message.is_empty() => known.to_string(),
            Some(known) => format!("{message} ({known})"),
            None => message,
        };
        Self { code, message }
    }
}

/// Descriptions for FairPlay status codes the key-request primitive reports
pub fn describe_platform_code(code: i64) -> Option<&'static str> {
    match code {
        -42656 => Some("lease duration has expired"),
        -42668 => Some("the CKC passed in for processing is not valid"),
        -42672 => Some("a certificate is not supplied when creating SPC"),
        -42673 => Some("asset id is not supplied when creating an SPC"),
        -42674 => Some("version list is not supplied when creating an SPC"),
        -42675 => Some("the asset id supplied to SPC creation is not valid"),
        -42676 => Some("an error occurred during SPC creation"),
        -42679 => Some("the certificate supplied for SPC creation is not valid"),
        -42681 => Some("the version list supplied to SPC creation is not valid"),
        -42783 => Some("the certificate supplied for SPC is not valid and is possibly revoked"),
        _ => None,
    }
}

/// Errors that fail a single key request challenge
#[derive(Debug, Error)]
pub enum KeyExchangeError {
    /// The challenge URI carried no usable content identifier
    #[error("invalid content identifier")]
    InvalidContentIdentifier,

    /// The entitlement has no certificate endpoint
    #[error("missing application certificate url")]
    MissingApplicationCertificateUrl,

    /// Fetching the application certificate failed
    #[error("application certificate request failed: {0}")]
    ApplicationCertificateTransport(#[source] NetworkError),

    /// The certificate envelope or its base64 payload was malformed
    #[error("application certificate data format invalid: {reason}")]
    ApplicationCertificateDataFormatInvalid {
        /// What was wrong with the payload
        reason: String,
    },

    /// The key-request primitive could not build the SPC
    #[error("server playback context could not be created: {0}")]
    ServerPlaybackContext(#[source] PlatformError),

    /// The entitlement has no license endpoint
    #[error("missing content key context url")]
    MissingContentKeyContextUrl,

    /// Posting the SPC to the license endpoint failed
    #[error("content key context request failed: {0}")]
    ContentKeyContextTransport(#[source] NetworkError),

    /// The challenge has no data channel to deliver the key through
    #[error("missing data request")]
    MissingDataRequest,

    /// The license response carried no CKC
    #[error("missing content key context")]
    MissingContentKeyContext,

    /// The license response or its base64 CKC was malformed
    #[error("content key context data format invalid: {reason}")]
    ContentKeyContextDataFormatInvalid {
        /// What was wrong with the payload
        reason: String,
    },

    /// Converting the CKC into a persistable key failed
    #[error("persistable content key could not be created: {0}")]
    PersistableContentKey(#[source] PlatformError),

    /// The engine stopped before the challenge was processed
    #[error("key exchange engine shut down")]
    EngineShutDown,
}

/// Failures reported by the underlying transfer engine
#[derive(Debug, Error)]
pub enum TransferError {
    /// A key request raised by the task failed
    #[error(transparent)]
    KeyExchange(KeyExchangeError),

    /// The engine could not create a task without a destination
    #[error("failed to start task without destination")]
    NoDestination,

    /// Engine-specific failure, relayed verbatim
    #[error("{0}")]
    Engine(String),
}

/// Download lifecycle errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The entitlement's media locator is not a valid URL
    #[error("invalid media url: {path}")]
    InvalidMediaUrl {
        /// The locator as received
        path: String,
    },

    /// No offline record exists for the asset
    #[error("no offline media for asset {asset_id}")]
    NotFound {
        /// The asset that has no record
        asset_id: String,
    },

    /// Local media could not be removed
    #[error("failed to remove local media at {path}: {reason}")]
    RemoveFailed {
        /// Recorded location
        path: PathBuf,
        /// The reason removal failed
        reason: String,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} asset {asset_id} in state {current_state}")]
    InvalidState {
        /// The asset whose session is in an invalid state for the operation
        asset_id: String,
        /// The operation that was attempted (e.g., "remove")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },
}
