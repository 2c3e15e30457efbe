//! Key request challenges raised by the host media pipeline.

use url::Url;

use crate::error::{KeyExchangeError, PlatformError};

/// Identifier of a challenge within one engine
pub type ChallengeId = u64;

/// A key request raised by a transfer task
///
/// The host media pipeline owns the real object; this trait exposes the
/// parts the key exchange needs. `finish` consumes the request, so every
/// challenge is answered exactly once.
pub trait ContentKeyRequest: Send + 'static {
    /// URI of the requested resource (e.g. `skd://<content id>`)
    fn url(&self) -> Option<&Url>;

    /// Whether the request has a data channel the key can be delivered through
    fn has_data_request(&self) -> bool;

    /// Build the SPC from the application certificate and content identifier
    ///
    /// Opaque platform primitive; failures carry the platform status code.
    fn streaming_content_key_request_data(
        &self,
        certificate: &[u8],
        content_identifier: &[u8],
    ) -> std::result::Result<Vec<u8>, PlatformError>;

    /// Convert a CKC into a key that can be stored for offline playback
    fn persistable_content_key(
        &self,
        ckc: &[u8],
    ) -> std::result::Result<Vec<u8>, PlatformError> {
        Ok(ckc.to_vec())
    }

    /// Deliver the content key, or fail the request
    fn finish(self: Box<Self>, outcome: std::result::Result<Vec<u8>, KeyExchangeError>);
}

/// Position of a challenge in the key exchange
///
/// `Fulfilled` and `Failed` are terminal and mutually exclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChallengeState {
    /// Accepted by the engine, waiting for the worker
    Received,
    /// Reading the content identifier from the request URI
    ExtractingIdentifier,
    /// Fetching the application certificate
    AwaitingCertificate,
    /// Running the key-request primitive
    BuildingChallenge,
    /// Posting the SPC to the license endpoint
    AwaitingKeyContext,
    /// Key delivered
    Fulfilled,
    /// Challenge failed with the given reason
    Failed(String),
}

impl ChallengeState {
    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChallengeState::Fulfilled | ChallengeState::Failed(_))
    }
}

/// Published on every state change of a challenge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChallengeTransition {
    /// Challenge
    pub id: ChallengeId,
    /// Content identifier, once extracted
    pub content_id: Option<String>,
    /// New state
    pub state: ChallengeState,
}

/// Content identifier carried by a claimed key request URI
///
/// The host portion of the URI is the identifier, as UTF-8 text.
pub(crate) fn content_identifier(url: &Url) -> Option<String> {
    url.host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
}
