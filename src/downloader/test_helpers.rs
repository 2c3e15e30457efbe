//! Shared test helpers: scripted collaborators and a Downloader built on them.

use crate::config::Config;
use crate::downloader::{Downloader, Services};
use crate::entitlement::EntitlementResolver;
use crate::error::{EntitlementError, TransferError};
use crate::store::SqliteSessionStore;
use crate::transfer::{RestoreOutcome, TaskBinding, TransferEngine, TransferEvent, TransferTask};
use crate::types::{AssetId, Entitlement, Event, PlayRequest};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::{Semaphore, broadcast};
use url::Url;

/// How long to wait for an expected event
pub(crate) const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Entitlement with FairPlay endpoints for `asset_id`
pub(crate) fn test_entitlement(asset_id: &str) -> Entitlement {
    Entitlement::new(
        format!("token-{asset_id}"),
        format!("https://cdn.example.com/{asset_id}/master.m3u8"),
    )
    .with_fairplay(
        "https://drm.example.com/fairplay/certificate",
        "https://drm.example.com/fairplay/license",
    )
}

enum Outcome {
    Grant(Entitlement),
    Refuse(String),
}

/// Entitlement resolver with a fixed answer and a call counter
///
/// A gated resolver holds every call until the test adds permits.
pub(crate) struct ScriptedResolver {
    outcome: Outcome,
    calls: AtomicUsize,
    requests: Mutex<Vec<PlayRequest>>,
    gate: Arc<Semaphore>,
}

impl ScriptedResolver {
    pub(crate) fn granting(entitlement: Entitlement) -> Self {
        Self::new(Outcome::Grant(entitlement), Semaphore::MAX_PERMITS)
    }

    pub(crate) fn refusing(reason: &str) -> Self {
        Self::new(Outcome::Refuse(reason.to_string()), Semaphore::MAX_PERMITS)
    }

    /// Resolver whose calls stay in flight until `gate().add_permits(n)`
    pub(crate) fn gated(entitlement: Entitlement) -> Self {
        Self::new(Outcome::Grant(entitlement), 0)
    }

    fn new(outcome: Outcome, permits: usize) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            gate: Arc::new(Semaphore::new(permits)),
        }
    }

    pub(crate) fn gate(&self) -> Arc<Semaphore> {
        Arc::clone(&self.gate)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<PlayRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntitlementResolver for ScriptedResolver {
    async fn resolve(
        &self,
        _asset_id: &AssetId,
        request: PlayRequest,
    ) -> Result<Entitlement, EntitlementError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        self.gate.acquire().await.unwrap().forget();

        match &self.outcome {
            Outcome::Grant(entitlement) => Ok(entitlement.clone()),
            Outcome::Refuse(reason) => Err(EntitlementError::NotEntitled {
                reason: reason.clone(),
            }),
        }
    }
}

/// Test-side view of a scripted transfer task
pub(crate) struct TaskHandle {
    pub(crate) binding: TaskBinding,
    /// `None` for restored tasks
    pub(crate) media_locator: Option<Url>,
    calls: Mutex<Vec<&'static str>>,
    suspended: AtomicBool,
}

impl TaskHandle {
    /// Send an event as the task would
    pub(crate) fn send(&self, event: TransferEvent) {
        self.binding.events.send(event).ok();
    }

    /// Control calls received, in order
    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn partial_location(&self) -> PathBuf {
        PathBuf::from(format!("partial/{}", self.binding.asset_id))
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Task that acknowledges control calls the way a transfer engine does
struct ScriptedTask {
    handle: Arc<TaskHandle>,
}

impl TransferTask for ScriptedTask {
    fn prepare(&self, lazily: bool) {
        self.handle.record("prepare");
        self.handle.send(TransferEvent::Prepared);
        if !lazily {
            self.handle.send(TransferEvent::Resumed);
        }
    }

    fn resume(&self) {
        self.handle.record("resume");
        self.handle.suspended.store(false, Ordering::SeqCst);
        self.handle.send(TransferEvent::Resumed);
    }

    fn suspend(&self) {
        self.handle.record("suspend");
        if !self.handle.suspended.swap(true, Ordering::SeqCst) {
            self.handle.send(TransferEvent::Suspended);
        }
    }

    fn cancel(&self) {
        self.handle.record("cancel");
        self.handle.send(TransferEvent::Canceled {
            location: Some(self.handle.partial_location()),
        });
    }
}

/// Transfer engine handing out scripted tasks
#[derive(Default)]
pub(crate) struct ScriptedTransferEngine {
    restore_next: AtomicBool,
    fail_create: AtomicBool,
    restore_calls: AtomicUsize,
    tasks: Mutex<Vec<Arc<TaskHandle>>>,
}

impl ScriptedTransferEngine {
    /// Make the next `restore_task` call find a task
    pub(crate) fn restore_next(&self) {
        self.restore_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub(crate) fn restore_calls(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn tasks(&self) -> Vec<Arc<TaskHandle>> {
        self.tasks.lock().unwrap().clone()
    }

    /// Number of tasks created (not restored)
    pub(crate) fn created(&self) -> usize {
        self.tasks()
            .iter()
            .filter(|handle| handle.media_locator.is_some())
            .count()
    }

    /// Wait until `count` tasks exist and return the last one
    pub(crate) async fn wait_for_task(&self, count: usize) -> Arc<TaskHandle> {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                let tasks = self.tasks();
                if tasks.len() >= count {
                    return Arc::clone(&tasks[count - 1]);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for transfer task")
    }

    fn bind(&self, binding: TaskBinding, media_locator: Option<Url>) -> Box<dyn TransferTask> {
        let handle = Arc::new(TaskHandle {
            binding,
            media_locator,
            calls: Mutex::new(Vec::new()),
            suspended: AtomicBool::new(false),
        });
        self.tasks.lock().unwrap().push(Arc::clone(&handle));
        Box::new(ScriptedTask { handle })
    }
}

#[async_trait]
impl TransferEngine for ScriptedTransferEngine {
    async fn restore_task(&self, binding: TaskBinding) -> RestoreOutcome {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        if self.restore_next.swap(false, Ordering::SeqCst) {
            RestoreOutcome::Restored(self.bind(binding, None))
        } else {
            RestoreOutcome::NotFound
        }
    }

    async fn create_task(
        &self,
        media_locator: Url,
        binding: TaskBinding,
    ) -> Result<Box<dyn TransferTask>, TransferError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransferError::NoDestination);
        }
        Ok(self.bind(binding, Some(media_locator)))
    }
}

/// Downloader over scripted collaborators and a SQLite store in a tempdir
pub(crate) struct TestHarness {
    pub(crate) downloader: Downloader,
    pub(crate) resolver: Arc<ScriptedResolver>,
    pub(crate) transfer: Arc<ScriptedTransferEngine>,
    pub(crate) store: Arc<SqliteSessionStore>,
    pub(crate) temp_dir: tempfile::TempDir,
}

/// Helper to create a test Downloader instance with a persistent database.
/// The harness owns the tempdir, which must be kept alive.
pub(crate) async fn create_test_downloader(resolver: ScriptedResolver) -> TestHarness {
    let temp_dir = tempdir().unwrap();

    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");

    let store = Arc::new(
        SqliteSessionStore::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let resolver = Arc::new(resolver);
    let transfer = Arc::new(ScriptedTransferEngine::default());

    let services = Services {
        resolver: resolver.clone(),
        store: store.clone(),
        transfer: transfer.clone(),
        http: reqwest::Client::new(),
    };

    TestHarness {
        downloader: Downloader::with_services(config, services),
        resolver,
        transfer,
        store,
        temp_dir,
    }
}

/// Next event, failing the test if none arrives in time
pub(crate) async fn next_event(rx: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Collect events until one matches `done`; returns all of them, match last
pub(crate) async fn events_until(
    rx: &mut broadcast::Receiver<Event>,
    done: impl Fn(&Event) -> bool,
) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

/// Assert nothing is emitted for a short while
pub(crate) async fn assert_quiet(rx: &mut broadcast::Receiver<Event>) {
    if let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpected event: {:?}", event);
    }
}

/// Short name of an event, for comparing sequences
pub(crate) fn kind(event: &Event) -> &'static str {
    match event {
        Event::Prepared { .. } => "prepared",
        Event::Suspended { .. } => "suspended",
        Event::Resumed { .. } => "resumed",
        Event::Canceled { .. } => "canceled",
        Event::Completed { .. } => "completed",
        Event::Progress { .. } => "progress",
        Event::Error { .. } => "error",
        Event::PlaybackReady { .. } => "playback_ready",
        Event::DownloadingMediaOption { .. } => "downloading_media_option",
        Event::EntitlementRequestStarted { .. } => "entitlement_request_started",
        Event::EntitlementResponse { .. } => "entitlement_response",
        Event::EntitlementRequestCancelled { .. } => "entitlement_request_cancelled",
    }
}

pub(crate) fn kinds(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(kind).collect()
}
