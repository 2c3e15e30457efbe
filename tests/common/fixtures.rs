//! Fake transfer engine that drives real key exchanges
//!
//! Tasks raise one FairPlay key request when started. A delivered key is
//! written into the asset's media directory and the task completes; a failed
//! key exchange is reported as a transfer error, like a real HLS pipeline
//! would.

use async_trait::async_trait;
use protected_dl::{
    Claim, ContentKeyRequest, KeyExchangeError, PlatformError, Progress, RestoreOutcome,
    TaskBinding, TransferEngine, TransferError, TransferEvent, TransferTask,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use url::Url;

/// Content identifier carried by every key request the fake tasks raise
pub const CONTENT_ID: &str = "content-a1";

/// Name of the file the delivered key is written to
pub const KEY_FILE: &str = "content.key";

/// Key request handed to the key exchange engine by a fake task
pub struct FakeKeyRequest {
    url: Url,
    outcome: oneshot::Sender<Result<Vec<u8>, KeyExchangeError>>,
}

impl ContentKeyRequest for FakeKeyRequest {
    fn url(&self) -> Option<&Url> {
        Some(&self.url)
    }

    fn has_data_request(&self) -> bool {
        true
    }

    fn streaming_content_key_request_data(
        &self,
        certificate: &[u8],
        content_identifier: &[u8],
    ) -> Result<Vec<u8>, PlatformError> {
        if certificate.is_empty() {
            return Err(PlatformError::new(-42672, ""));
        }
        let mut spc = b"SPC:".to_vec();
        spc.extend_from_slice(content_identifier);
        Ok(spc)
    }

    fn finish(self: Box<Self>, outcome: Result<Vec<u8>, KeyExchangeError>) {
        let this = *self;
        this.outcome.send(outcome).ok();
    }
}

/// Base64 of the SPC a fake task's key request produces
pub fn expected_spc() -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(format!("SPC:{CONTENT_ID}"))
}

struct TaskShared {
    binding: TaskBinding,
    media_dir: PathBuf,
    running: AtomicBool,
}

/// Task that fetches its key and then "downloads" by writing it to disk
pub struct FakeTask {
    shared: Arc<TaskShared>,
}

impl FakeTask {
    fn send(shared: &TaskShared, event: TransferEvent) {
        shared.binding.events.send(event).ok();
    }

    fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        Self::send(&self.shared, TransferEvent::Resumed);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let (outcome, key) = oneshot::channel();
            let request = FakeKeyRequest {
                url: Url::parse(&format!("skd://{CONTENT_ID}")).unwrap(),
                outcome,
            };

            if let Claim::Declined(_) = shared.binding.key_exchange.handle(Box::new(request)) {
                shared.running.store(false, Ordering::SeqCst);
                Self::send(
                    &shared,
                    TransferEvent::Error {
                        location: None,
                        error: TransferError::Engine("key request declined".into()),
                    },
                );
                return;
            }

            match key.await {
                Ok(Ok(key)) => {
                    Self::send(&shared, TransferEvent::Progress(Progress { current: 0.5 }));
                    tokio::fs::create_dir_all(&shared.media_dir).await.unwrap();
                    tokio::fs::write(shared.media_dir.join(KEY_FILE), &key)
                        .await
                        .unwrap();
                    Self::send(
                        &shared,
                        TransferEvent::PlaybackReady {
                            location: shared.media_dir.clone(),
                        },
                    );
                    Self::send(&shared, TransferEvent::Progress(Progress { current: 1.0 }));
                    Self::send(
                        &shared,
                        TransferEvent::Completed {
                            location: shared.media_dir.clone(),
                        },
                    );
                }
                Ok(Err(e)) => {
                    shared.running.store(false, Ordering::SeqCst);
                    Self::send(
                        &shared,
                        TransferEvent::Error {
                            location: Some(shared.media_dir.clone()),
                            error: TransferError::KeyExchange(e),
                        },
                    );
                }
                Err(_) => {
                    shared.running.store(false, Ordering::SeqCst);
                    Self::send(
                        &shared,
                        TransferEvent::Error {
                            location: None,
                            error: TransferError::Engine("key request dropped".into()),
                        },
                    );
                }
            }
        });
    }
}

impl TransferTask for FakeTask {
    fn prepare(&self, lazily: bool) {
        Self::send(&self.shared, TransferEvent::Prepared);
        if !lazily {
            self.start();
        }
    }

    fn resume(&self) {
        self.start();
    }

    fn suspend(&self) {
        Self::send(&self.shared, TransferEvent::Suspended);
    }

    fn cancel(&self) {
        Self::send(
            &self.shared,
            TransferEvent::Canceled {
                location: Some(self.shared.media_dir.clone()),
            },
        );
    }
}

/// Transfer engine creating [`FakeTask`]s under a media root
pub struct FakeTransferEngine {
    media_root: PathBuf,
    created: AtomicUsize,
    locators: Mutex<Vec<Url>>,
}

impl FakeTransferEngine {
    pub fn new(media_root: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            media_root,
            created: AtomicUsize::new(0),
            locators: Mutex::new(Vec::new()),
        })
    }

    /// Number of tasks created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Media locators tasks were created for
    pub fn locators(&self) -> Vec<Url> {
        self.locators.lock().unwrap().clone()
    }

    /// Where the media of `asset_id` ends up
    pub fn media_dir(&self, asset_id: &str) -> PathBuf {
        self.media_root.join(asset_id)
    }
}

#[async_trait]
impl TransferEngine for FakeTransferEngine {
    async fn restore_task(&self, _binding: TaskBinding) -> RestoreOutcome {
        RestoreOutcome::NotFound
    }

    async fn create_task(
        &self,
        media_locator: Url,
        binding: TaskBinding,
    ) -> Result<Box<dyn TransferTask>, TransferError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.locators.lock().unwrap().push(media_locator);
        let media_dir = self.media_dir(binding.asset_id.as_str());
        Ok(Box::new(FakeTask {
            shared: Arc::new(TaskShared {
                binding,
                media_dir,
                running: AtomicBool::new(false),
            }),
        }))
    }
}
