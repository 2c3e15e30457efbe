//! Entitlement resolution
//!
//! [`EntitlementResolver`] turns an asset identifier into an [`Entitlement`]
//! with a single network attempt. Retrying is left to whoever observes the
//! error. [`EntitlementRequest`] wraps one in-flight resolution so the
//! download session can suspend, resume or cancel it.

use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::ExposureConfig;
use crate::error::EntitlementError;
use crate::types::{AssetId, Entitlement, EntitlementValidation, PlayRequest};

/// Resolves usage rights for an asset
#[async_trait]
pub trait EntitlementResolver: Send + Sync {
    /// Request an entitlement for downloading `asset_id`
    ///
    /// Single attempt, no internal retry. Does not touch the session store.
    async fn resolve(
        &self,
        asset_id: &AssetId,
        request: PlayRequest,
    ) -> std::result::Result<Entitlement, EntitlementError>;
}

/// Error envelope returned by Exposure on non-success responses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExposureErrorBody {
    #[serde(default)]
    http_code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

/// Messages with which the service refuses an entitlement
const REFUSAL_MESSAGES: &[&str] = &[
    "NOT_ENTITLED",
    "GEO_BLOCKED",
    "DOWNLOAD_BLOCKED",
    "DEVICE_BLOCKED",
    "LICENSE_EXPIRED",
    "NOT_AVAILABLE_IN_FORMAT",
    "DOWNLOAD_TOTAL_LIMIT_REACHED",
    "DOWNLOAD_ASSET_LIMIT_REACHED",
    "CONCURRENT_STREAMS_LIMIT_REACHED",
    "NOT_PUBLISHED",
];

/// Entitlement resolver talking to the Exposure HTTP API
pub struct HttpEntitlementResolver {
    client: reqwest::Client,
    config: ExposureConfig,
}

impl HttpEntitlementResolver {
    /// Create a resolver for the configured customer and business unit
    pub fn new(client: reqwest::Client, config: ExposureConfig) -> Self {
        Self { client, config }
    }

    fn entitlement_url(&self, asset_id: &AssetId) -> String {
        format!(
            "{}/v1/customer/{}/businessunit/{}/entitlement/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.customer),
            urlencoding::encode(&self.config.business_unit),
            urlencoding::encode(asset_id.as_str()),
        )
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.session_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Check whether the user may play `asset_id` without issuing a play token
    ///
    /// The service answers 200 for both outcomes; inspect
    /// [`EntitlementValidation::status`].
    pub async fn validate(
        &self,
        asset_id: &AssetId,
    ) -> std::result::Result<EntitlementValidation, EntitlementError> {
        if asset_id.is_empty() {
            return Err(EntitlementError::InvalidAssetId(asset_id.to_string()));
        }

        let response = self
            .authorized(self.client.get(self.entitlement_url(asset_id)))
            .send()
            .await
            .map_err(EntitlementError::Transport)?;
        let body = Self::success_body(response).await?;
        serde_json::from_slice(&body).map_err(EntitlementError::Malformed)
    }

    /// Read a success body, or classify the failure
    async fn success_body(
        response: reqwest::Response,
    ) -> std::result::Result<Vec<u8>, EntitlementError> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(EntitlementError::Transport)?;

        if status.is_success() {
            return Ok(body.to_vec());
        }

        let envelope = serde_json::from_slice::<ExposureErrorBody>(&body).ok();
        let message = envelope
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
        let code = envelope
            .and_then(|e| e.http_code)
            .unwrap_or(status.as_u16());

        if matches!(code, 401 | 403) && REFUSAL_MESSAGES.contains(&message.as_str()) {
            return Err(EntitlementError::NotEntitled { reason: message });
        }

        Err(EntitlementError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl EntitlementResolver for HttpEntitlementResolver {
    async fn resolve(
        &self,
        asset_id: &AssetId,
        request: PlayRequest,
    ) -> std::result::Result<Entitlement, EntitlementError> {
        if asset_id.is_empty() {
            return Err(EntitlementError::InvalidAssetId(asset_id.to_string()));
        }

        let url = format!("{}/download", self.entitlement_url(asset_id));
        tracing::debug!(
            asset_id = %asset_id,
            drm = request.drm.as_str(),
            format = request.format.as_str(),
            "requesting entitlement"
        );

        let response = self
            .authorized(self.client.get(url))
            .query(&[
                ("drm", request.drm.as_str()),
                ("format", request.format.as_str()),
            ])
            .send()
            .await
            .map_err(EntitlementError::Transport)?;

        let body = Self::success_body(response).await?;
        serde_json::from_slice(&body).map_err(EntitlementError::Malformed)
    }
}

/// Handle to one in-flight entitlement resolution
///
/// Suspending closes a gate: the request is not sent while suspended, and a
/// response that arrives while suspended is held back until resumed.
/// Cancelling drops the request; its completion callback never runs.
pub struct EntitlementRequest {
    id: u64,
    cancel: CancellationToken,
    gate: watch::Sender<bool>,
}

impl EntitlementRequest {
    /// Spawn `resolve` and hand its result to `on_complete`
    ///
    /// `on_complete` only runs if the request was not cancelled first.
    pub fn spawn<R, C, CF>(id: u64, resolve: R, on_complete: C) -> Self
    where
        R: Future<Output = std::result::Result<Entitlement, EntitlementError>> + Send + 'static,
        C: FnOnce(std::result::Result<Entitlement, EntitlementError>) -> CF + Send + 'static,
        CF: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (gate, gate_rx) = watch::channel(true);

        let token = cancel.clone();
        tokio::spawn(async move {
            let gated = async move {
                let mut gate_rx = gate_rx;
                wait_open(&mut gate_rx).await;
                let result = resolve.await;
                wait_open(&mut gate_rx).await;
                result
            };

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = gated => Some(result),
            };

            match result {
                Some(result) if !token.is_cancelled() => on_complete(result).await,
                _ => {
                    tracing::debug!(request_id = id, "entitlement request cancelled before completion");
                }
            }
        });

        Self { id, cancel, gate }
    }

    /// Identifier assigned by the owner
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Hold the request (or its response) until resumed
    pub fn suspend(&self) {
        self.gate.send_replace(false);
    }

    /// Let the request proceed
    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Whether the request is currently held
    pub fn is_suspended(&self) -> bool {
        !*self.gate.borrow()
    }

    /// Request cancellation; completion is never delivered afterwards
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn wait_open(gate: &mut watch::Receiver<bool>) {
    // sender dropped means the owner is gone; let the request finish
    let _ = gate.wait_for(|open| *open).await;
}
