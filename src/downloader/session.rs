//! Download session state, preparation and task construction.
//!
//! All mutation of a session's lifecycle state and of its bound task or
//! entitlement request happens while holding [`SessionContext::state`].
//! Entitlement completions and transfer events re-acquire that lock and check
//! that the request or task they belong to is still bound before acting.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use url::Url;

use super::Services;
use super::persistence::PersistenceGate;
use super::relay;
use crate::config::DrmConfig;
use crate::drm::{KeyExchangeEngine, KeyExchangeOptions};
use crate::entitlement::EntitlementRequest;
use crate::error::{DownloadError, EntitlementError, Error, Result};
use crate::store::{OfflineState, SessionRecord};
use crate::transfer::{RestoreOutcome, TaskBinding, TransferTask};
use crate::types::{
    AdditionalMedia, AssetId, DownloadState, Entitlement, Event, MediaOption, PlayRequest,
};

/// Chooses which additional media option (audio, subtitles) a task downloads
pub trait MediaOptionSelector: Send + Sync {
    /// Pick one of `media.options`, or `None` to skip this media
    fn select(&self, asset_id: &AssetId, media: &AdditionalMedia) -> Option<MediaOption>;
}

impl<F> MediaOptionSelector for F
where
    F: Fn(&AssetId, &AdditionalMedia) -> Option<MediaOption> + Send + Sync,
{
    fn select(&self, asset_id: &AssetId, media: &AdditionalMedia) -> Option<MediaOption> {
        self(asset_id, media)
    }
}

/// A transfer task together with the binding id its events are tagged with
pub(crate) struct BoundTask {
    pub(crate) id: u64,
    pub(crate) task: Box<dyn TransferTask>,
}

/// Mutable session state (guarded by [`SessionContext::state`])
pub(crate) struct SessionState {
    pub(crate) lifecycle: DownloadState,
    pub(crate) entitlement: Option<Entitlement>,
    pub(crate) task: Option<BoundTask>,
    pub(crate) request: Option<EntitlementRequest>,
    pub(crate) bitrate: Option<u64>,
    pub(crate) play_request: PlayRequest,
    next_id: u64,
}

impl SessionState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Whether `id` is the currently bound task
    pub(crate) fn is_bound(&self, id: u64) -> bool {
        self.task.as_ref().is_some_and(|bound| bound.id == id)
    }

    /// Whether a task or an entitlement request is bound
    pub(crate) fn is_busy(&self) -> bool {
        self.task.is_some() || self.request.is_some()
    }
}

/// Context shared by a session handle and its asynchronous continuations
pub(crate) struct SessionContext {
    pub(crate) asset_id: AssetId,
    pub(crate) services: Services,
    pub(crate) key_options: KeyExchangeOptions,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) persistence: PersistenceGate,
    media_selector: std::sync::RwLock<Option<Arc<dyn MediaOptionSelector>>>,
}

impl SessionContext {
    /// Emit an event to all subscribers
    ///
    /// Having no subscribers is not an error.
    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn emit_error(&self, location: Option<std::path::PathBuf>, error: Error) {
        self.emit(Event::Error {
            asset_id: self.asset_id.clone(),
            location,
            error: Arc::new(error),
        });
    }

    pub(crate) fn select_media_option(&self, media: &AdditionalMedia) -> Option<MediaOption> {
        let selector = self
            .media_selector
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        selector.and_then(|selector| selector.select(&self.asset_id, media))
    }

    /// Write `record` through the persistence gate with a fresh sequence number
    pub(crate) async fn persist(&self, record: &SessionRecord) -> Result<()> {
        let sequence = self.persistence.next_sequence();
        self.persistence
            .write(self.services.store.as_ref(), sequence, record)
            .await
            .map(|_| ())
    }

    /// Spawn an entitlement request and bind it to the session
    pub(crate) fn start_entitlement_request(self: &Arc<Self>, state: &mut SessionState, lazily: bool) {
        let id = state.allocate_id();
        let resolver = Arc::clone(&self.services.resolver);
        let asset_id = self.asset_id.clone();
        let play_request = state.play_request;
        let ctx = Arc::clone(self);

        tracing::debug!(
            asset_id = %self.asset_id,
            request_id = id,
            lazily,
            "starting entitlement request"
        );

        let request = EntitlementRequest::spawn(
            id,
            async move { resolver.resolve(&asset_id, play_request).await },
            move |result| ctx.on_entitlement_result(id, lazily, result),
        );
        state.request = Some(request);

        self.emit(Event::EntitlementRequestStarted {
            asset_id: self.asset_id.clone(),
        });
    }

    async fn on_entitlement_result(
        self: Arc<Self>,
        id: u64,
        lazily: bool,
        result: std::result::Result<Entitlement, EntitlementError>,
    ) {
        let mut state = self.state.lock().await;
        let current = state
            .request
            .as_ref()
            .is_some_and(|request| request.id() == id && !request.is_cancelled());
        if !current {
            tracing::debug!(
                asset_id = %self.asset_id,
                request_id = id,
                "dropping result of unbound entitlement request"
            );
            return;
        }
        state.request = None;

        match result {
            Ok(entitlement) => {
                tracing::info!(asset_id = %self.asset_id, "entitlement resolved");
                state.entitlement = Some(entitlement.clone());
                self.emit(Event::EntitlementResponse {
                    asset_id: self.asset_id.clone(),
                    entitlement: Box::new(entitlement.clone()),
                });
                self.configure_task(&mut state, entitlement, None, lazily, true)
                    .await;
            }
            Err(e) => {
                tracing::error!(asset_id = %self.asset_id, error = %e, "entitlement request failed");
                self.emit_error(None, e.into());
            }
        }
    }

    /// Build a key exchange engine and a transfer task for `entitlement`
    ///
    /// A task left over from an earlier run is restored before a new one is
    /// created. `fresh` marks an entitlement that was just resolved, which
    /// gets a placeholder record before the task exists. `location` is the
    /// media location of a stored partial download, if any.
    pub(crate) async fn configure_task(
        self: &Arc<Self>,
        state: &mut SessionState,
        entitlement: Entitlement,
        location: Option<PathBuf>,
        lazily: bool,
        fresh: bool,
    ) {
        let media_locator = match Url::parse(&entitlement.media_locator) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(
                    asset_id = %self.asset_id,
                    media_locator = %entitlement.media_locator,
                    error = %e,
                    "entitlement carries an invalid media locator"
                );
                self.emit_error(
                    None,
                    DownloadError::InvalidMediaUrl {
                        path: entitlement.media_locator.clone(),
                    }
                    .into(),
                );
                return;
            }
        };

        if fresh {
            let placeholder =
                SessionRecord::in_progress(self.asset_id.clone(), entitlement.clone(), None);
            if let Err(e) = self.persist(&placeholder).await {
                tracing::error!(asset_id = %self.asset_id, error = %e, "failed to save placeholder record");
                self.emit_error(None, e);
            }
        }

        let key_exchange = KeyExchangeEngine::new(
            self.asset_id.clone(),
            &entitlement,
            self.services.http.clone(),
            self.key_options.clone(),
        );
        let (events, events_rx) = mpsc::unbounded_channel();
        let binding = TaskBinding {
            asset_id: self.asset_id.clone(),
            key_exchange,
            events,
            bitrate: state.bitrate,
        };

        let task = match self.services.transfer.restore_task(binding.clone()).await {
            RestoreOutcome::Restored(task) => {
                tracing::info!(asset_id = %self.asset_id, "restored transfer task");
                task
            }
            RestoreOutcome::NotFound => {
                match self.services.transfer.create_task(media_locator, binding).await {
                    Ok(task) => task,
                    Err(e) => {
                        tracing::error!(asset_id = %self.asset_id, error = %e, "failed to create transfer task");
                        self.emit_error(None, e.into());
                        return;
                    }
                }
            }
        };

        let id = state.allocate_id();
        tokio::spawn(relay::run(
            Arc::clone(self),
            id,
            entitlement,
            location,
            events_rx,
        ));

        task.prepare(lazily);
        state.lifecycle = if lazily {
            DownloadState::NotStarted
        } else {
            DownloadState::Running
        };
        state.task = Some(BoundTask { id, task });
    }
}

/// Handle to the download of one asset
///
/// Obtained from [`Downloader::download`](crate::Downloader::download);
/// clones share the same session.
#[derive(Clone)]
pub struct DownloadSession {
    pub(crate) ctx: Arc<SessionContext>,
}

impl DownloadSession {
    pub(crate) fn new(
        asset_id: AssetId,
        services: Services,
        drm: &DrmConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let state = SessionState {
            lifecycle: DownloadState::NotStarted,
            entitlement: None,
            task: None,
            request: None,
            bitrate: None,
            play_request: PlayRequest {
                drm: drm.drm,
                format: drm.format,
            },
            next_id: 0,
        };

        Self {
            ctx: Arc::new(SessionContext {
                asset_id,
                services,
                key_options: KeyExchangeOptions::from(drm),
                event_tx,
                state: Mutex::new(state),
                persistence: PersistenceGate::new(),
                media_selector: std::sync::RwLock::new(None),
            }),
        }
    }

    /// Asset this session downloads
    pub fn asset_id(&self) -> &AssetId {
        &self.ctx.asset_id
    }

    /// Current lifecycle state
    pub async fn state(&self) -> DownloadState {
        self.ctx.state.lock().await.lifecycle
    }

    /// Entitlement the session currently works with, if resolved or restored
    pub async fn entitlement(&self) -> Option<Entitlement> {
        self.ctx.state.lock().await.entitlement.clone()
    }

    /// Subscribe to events (from every session; filter on [`Event::asset_id`])
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.ctx.event_tx.subscribe()
    }

    /// DRM scheme and format used by the next entitlement request
    pub async fn use_play_request(&self, play_request: PlayRequest) {
        self.ctx.state.lock().await.play_request = play_request;
    }

    /// Install the selector answering additional media option questions
    ///
    /// Without a selector, additional media is skipped.
    pub fn set_media_selector(&self, selector: Arc<dyn MediaOptionSelector>) {
        *self
            .ctx
            .media_selector
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(selector);
    }

    /// Prepare the download
    ///
    /// - A completed record fires [`Event::Completed`] without any network call.
    /// - A partial record rebuilds the transfer task from the stored
    ///   entitlement and, unless `lazily`, starts it.
    /// - Without a record an entitlement request is started; on success a
    ///   placeholder record is saved and a new task is built.
    ///
    /// Only a failing store lookup is returned; every later failure arrives as
    /// [`Event::Error`]. Preparing a session that already has a task or an
    /// entitlement request in flight is a no-op.
    pub async fn prepare(&self, lazily: bool) -> Result<()> {
        let ctx = &self.ctx;
        let record = ctx.services.store.lookup(&ctx.asset_id).await?;

        let mut state = ctx.state.lock().await;
        if state.is_busy() {
            tracing::debug!(asset_id = %ctx.asset_id, "session already prepared");
            return Ok(());
        }

        match record {
            Some(SessionRecord {
                state: OfflineState::Completed,
                location: Some(location),
                entitlement,
                ..
            }) => {
                tracing::info!(
                    asset_id = %ctx.asset_id,
                    location = %location.display(),
                    "asset already downloaded"
                );
                state.entitlement = Some(entitlement.clone());
                state.lifecycle = DownloadState::Completed;
                ctx.emit(Event::EntitlementResponse {
                    asset_id: ctx.asset_id.clone(),
                    entitlement: Box::new(entitlement),
                });
                ctx.emit(Event::Completed {
                    asset_id: ctx.asset_id.clone(),
                    location,
                });
            }
            Some(record) => {
                tracing::debug!(asset_id = %ctx.asset_id, "resuming from stored entitlement");
                if record.entitlement.is_expired(Utc::now()) {
                    tracing::warn!(
                        asset_id = %ctx.asset_id,
                        "stored entitlement has expired; the license service may refuse its keys"
                    );
                }
                state.entitlement = Some(record.entitlement.clone());
                ctx.configure_task(
                    &mut state,
                    record.entitlement,
                    record.location,
                    lazily,
                    false,
                )
                .await;
            }
            None => ctx.start_entitlement_request(&mut state, lazily),
        }

        Ok(())
    }
}
