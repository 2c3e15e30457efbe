//! FairPlay key exchange
//!
//! A [`KeyExchangeEngine`] answers the key requests one asset's transfer
//! task raises. For each claimed challenge it:
//!
//! 1. extracts the content identifier from the `skd://` URI
//! 2. fetches the application certificate (see [`protocol`])
//! 3. builds the SPC with the host's key-request primitive
//! 4. posts the SPC to the license endpoint and decodes the CKC
//! 5. delivers the key, or fails the challenge with a [`KeyExchangeError`]
//!
//! Challenges are accepted on the caller's thread and processed one at a
//! time by a worker task owned by the engine, so the handshake for one asset
//! never races with itself. Nothing is retried.

mod challenge;
pub mod protocol;

pub use challenge::{ChallengeId, ChallengeState, ChallengeTransition, ContentKeyRequest};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};

use crate::config::{DrmConfig, KeyDelivery};
use crate::error::KeyExchangeError;
use crate::types::{AssetId, Entitlement};

/// Key exchange settings for one engine
#[derive(Clone, Debug)]
pub struct KeyExchangeOptions {
    /// URI scheme of claimed key requests
    pub custom_scheme: String,
    /// Reuse the application certificate across this engine's challenges
    pub cache_application_certificate: bool,
    /// How the CKC is handed to the request
    pub key_delivery: KeyDelivery,
}

impl Default for KeyExchangeOptions {
    fn default() -> Self {
        Self::from(&DrmConfig::default())
    }
}

impl From<&DrmConfig> for KeyExchangeOptions {
    fn from(config: &DrmConfig) -> Self {
        Self {
            custom_scheme: config.custom_scheme.clone(),
            cache_application_certificate: config.cache_application_certificate,
            key_delivery: config.key_delivery,
        }
    }
}

/// Outcome of offering a request to the engine
pub enum Claim {
    /// The engine took the request and will finish it
    Claimed(ChallengeId),
    /// Not a key request for this engine; handed back untouched
    Declined(Box<dyn ContentKeyRequest>),
}

impl std::fmt::Debug for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Claim::Claimed(id) => f.debug_tuple("Claimed").field(id).finish(),
            Claim::Declined(_) => f.write_str("Declined"),
        }
    }
}

impl Claim {
    /// Whether the engine took the request
    pub fn is_claimed(&self) -> bool {
        matches!(self, Claim::Claimed(_))
    }
}

struct Job {
    id: ChallengeId,
    request: Box<dyn ContentKeyRequest>,
}

/// Answers key requests for one asset
///
/// Must be created inside a tokio runtime; the worker task lives as long as
/// the engine.
pub struct KeyExchangeEngine {
    asset_id: AssetId,
    custom_scheme: String,
    queue: mpsc::UnboundedSender<Job>,
    transitions: broadcast::Sender<ChallengeTransition>,
    next_id: AtomicU64,
}

impl KeyExchangeEngine {
    /// Engine bound to the endpoints granted by `entitlement`
    pub fn new(
        asset_id: AssetId,
        entitlement: &Entitlement,
        client: reqwest::Client,
        options: KeyExchangeOptions,
    ) -> Arc<Self> {
        let (queue, jobs) = mpsc::unbounded_channel();
        let (transitions, _rx) = broadcast::channel(64);

        let worker = Worker {
            asset_id: asset_id.clone(),
            client,
            certificate_url: entitlement.certificate_url().map(str::to_string),
            license_url: entitlement.license_url().map(str::to_string),
            cache_certificate: options.cache_application_certificate,
            key_delivery: options.key_delivery,
            cached_certificate: None,
            transitions: transitions.clone(),
        };
        tokio::spawn(worker.run(jobs));

        Arc::new(Self {
            asset_id,
            custom_scheme: options.custom_scheme,
            queue,
            transitions,
            next_id: AtomicU64::new(1),
        })
    }

    /// Asset this engine answers for
    pub fn asset_id(&self) -> &AssetId {
        &self.asset_id
    }

    /// Subscribe to challenge state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<ChallengeTransition> {
        self.transitions.subscribe()
    }

    /// Offer a key request (or renewal request) to the engine
    ///
    /// Requests without a URI or with a foreign scheme are declined without
    /// side effects. Claimed requests are queued for the worker and always
    /// finished exactly once.
    pub fn handle(&self, request: Box<dyn ContentKeyRequest>) -> Claim {
        let claimed = request
            .url()
            .is_some_and(|url| url.scheme() == self.custom_scheme);
        if !claimed {
            return Claim::Declined(request);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(asset_id = %self.asset_id, challenge_id = id, "key request claimed");
        publish(&self.transitions, id, None, ChallengeState::Received);

        if let Err(mpsc::error::SendError(job)) = self.queue.send(Job { id, request }) {
            let err = KeyExchangeError::EngineShutDown;
            publish(
                &self.transitions,
                job.id,
                None,
                ChallengeState::Failed(err.to_string()),
            );
            job.request.finish(Err(err));
        }

        Claim::Claimed(id)
    }
}

fn publish(
    transitions: &broadcast::Sender<ChallengeTransition>,
    id: ChallengeId,
    content_id: Option<&str>,
    state: ChallengeState,
) {
    transitions
        .send(ChallengeTransition {
            id,
            content_id: content_id.map(str::to_string),
            state,
        })
        .ok();
}

/// Serial executor for one engine's challenges
struct Worker {
    asset_id: AssetId,
    client: reqwest::Client,
    certificate_url: Option<String>,
    license_url: Option<String>,
    cache_certificate: bool,
    key_delivery: KeyDelivery,
    cached_certificate: Option<Vec<u8>>,
    transitions: broadcast::Sender<ChallengeTransition>,
}

impl Worker {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            self.process(job).await;
        }
        tracing::debug!(asset_id = %self.asset_id, "key exchange worker stopped");
    }

    async fn process(&mut self, job: Job) {
        let Job { id, mut request } = job;
        let mut content_id = None;

        let outcome = self.exchange(id, &mut request, &mut content_id).await;

        match &outcome {
            Ok(_) => {
                tracing::info!(asset_id = %self.asset_id, challenge_id = id, "content key delivered");
                self.transition(id, content_id.as_deref(), ChallengeState::Fulfilled);
            }
            Err(e) => {
                tracing::error!(asset_id = %self.asset_id, challenge_id = id, error = %e, "key exchange failed");
                self.transition(
                    id,
                    content_id.as_deref(),
                    ChallengeState::Failed(e.to_string()),
                );
            }
        }

        request.finish(outcome);
    }

    async fn exchange(
        &mut self,
        id: ChallengeId,
        request: &mut Box<dyn ContentKeyRequest>,
        content_id: &mut Option<String>,
    ) -> Result<Vec<u8>, KeyExchangeError> {
        self.transition(id, None, ChallengeState::ExtractingIdentifier);
        let identifier = request
            .url()
            .and_then(challenge::content_identifier)
            .ok_or(KeyExchangeError::InvalidContentIdentifier)?;
        let identifier = content_id.insert(identifier).clone();

        self.transition(id, Some(&identifier), ChallengeState::AwaitingCertificate);
        let certificate = self.application_certificate().await?;

        self.transition(id, Some(&identifier), ChallengeState::BuildingChallenge);
        let spc = request
            .streaming_content_key_request_data(&certificate, identifier.as_bytes())
            .map_err(KeyExchangeError::ServerPlaybackContext)?;

        self.transition(id, Some(&identifier), ChallengeState::AwaitingKeyContext);
        let license_url = self
            .license_url
            .as_deref()
            .ok_or(KeyExchangeError::MissingContentKeyContextUrl)?;
        let ckc =
            protocol::fetch_content_key_context(&self.client, license_url, &identifier, &spc)
                .await?;

        if !request.has_data_request() {
            return Err(KeyExchangeError::MissingDataRequest);
        }

        match self.key_delivery {
            KeyDelivery::Streaming => Ok(ckc),
            KeyDelivery::Persistable => request
                .persistable_content_key(&ckc)
                .map_err(KeyExchangeError::PersistableContentKey),
        }
    }

    async fn application_certificate(&mut self) -> Result<Vec<u8>, KeyExchangeError> {
        if let Some(certificate) = &self.cached_certificate {
            return Ok(certificate.clone());
        }

        let url = self
            .certificate_url
            .as_deref()
            .ok_or(KeyExchangeError::MissingApplicationCertificateUrl)?;
        let certificate = protocol::fetch_application_certificate(&self.client, url).await?;

        if self.cache_certificate {
            self.cached_certificate = Some(certificate.clone());
        }
        Ok(certificate)
    }

    fn transition(&self, id: ChallengeId, content_id: Option<&str>, state: ChallengeState) {
        tracing::debug!(asset_id = %self.asset_id, challenge_id = id, ?state, "challenge transition");
        publish(&self.transitions, id, content_id, state);
    }
}
