//! Transfer event relay.
//!
//! One relay runs per bound transfer task. Suspended, canceled, completed
//! and error events update the session record before the public event is
//! emitted, so an observer reacting to the event always finds durable state.
//! The relay remembers the last media location the task reported; a report
//! without a location keeps the known one.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::session::SessionContext;
use crate::error::Error;
use crate::store::SessionRecord;
use crate::transfer::TransferEvent;
use crate::types::{DownloadState, Entitlement, Event};

/// What a persisting event does to the session after its record is written
struct Settlement {
    record: SessionRecord,
    next: DownloadState,
    unbind: bool,
    event: Event,
}

/// Relay events of the task bound as `task_id` until its channel closes
pub(crate) async fn run(
    ctx: Arc<SessionContext>,
    task_id: u64,
    entitlement: Entitlement,
    location: Option<PathBuf>,
    mut events: mpsc::UnboundedReceiver<TransferEvent>,
) {
    let mut known_location = location;
    while let Some(event) = events.recv().await {
        relay_event(&ctx, task_id, &entitlement, &mut known_location, event).await;
    }
    tracing::debug!(asset_id = %ctx.asset_id, task_id, "transfer event channel closed");
}

async fn relay_event(
    ctx: &SessionContext,
    task_id: u64,
    entitlement: &Entitlement,
    known_location: &mut Option<PathBuf>,
    event: TransferEvent,
) {
    let asset_id = ctx.asset_id.clone();
    let in_progress = |location: Option<PathBuf>| {
        SessionRecord::in_progress(ctx.asset_id.clone(), entitlement.clone(), location)
    };

    match event {
        TransferEvent::Prepared => publish(ctx, task_id, None, Event::Prepared { asset_id }).await,
        TransferEvent::Suspended => {
            settle(
                ctx,
                task_id,
                Settlement {
                    record: in_progress(known_location.clone()),
                    next: DownloadState::Suspended,
                    unbind: false,
                    event: Event::Suspended { asset_id },
                },
            )
            .await
        }
        TransferEvent::Resumed => {
            publish(
                ctx,
                task_id,
                Some(DownloadState::Running),
                Event::Resumed { asset_id },
            )
            .await
        }
        TransferEvent::Progress(progress) => {
            publish(ctx, task_id, None, Event::Progress { asset_id, progress }).await
        }
        TransferEvent::PlaybackReady { location } => {
            *known_location = Some(location.clone());
            publish(
                ctx,
                task_id,
                None,
                Event::PlaybackReady { asset_id, location },
            )
            .await
        }
        TransferEvent::DownloadingMediaOption(option) => {
            publish(
                ctx,
                task_id,
                None,
                Event::DownloadingMediaOption { asset_id, option },
            )
            .await
        }
        TransferEvent::ShouldDownloadMediaOption { media, reply } => {
            let choice = ctx.select_media_option(&media);
            tracing::debug!(
                asset_id = %asset_id,
                characteristic = %media.characteristic,
                selected = ?choice.as_ref().map(|option| &option.display_name),
                "answering media option request"
            );
            if reply.send(choice).is_err() {
                tracing::debug!(asset_id = %asset_id, "transfer task stopped waiting for media option");
            }
        }
        TransferEvent::Canceled { location } => {
            tracing::info!(asset_id = %asset_id, "transfer task canceled");
            let location = location.or_else(|| known_location.clone());
            *known_location = location.clone();
            settle(
                ctx,
                task_id,
                Settlement {
                    record: in_progress(location.clone()),
                    next: DownloadState::NotStarted,
                    unbind: true,
                    event: Event::Canceled { asset_id, location },
                },
            )
            .await
        }
        TransferEvent::Completed { location } => {
            tracing::info!(
                asset_id = %asset_id,
                location = %location.display(),
                "transfer task completed"
            );
            settle(
                ctx,
                task_id,
                Settlement {
                    record: SessionRecord::completed(
                        asset_id.clone(),
                        entitlement.clone(),
                        location.clone(),
                    ),
                    next: DownloadState::Completed,
                    unbind: true,
                    event: Event::Completed { asset_id, location },
                },
            )
            .await
        }
        TransferEvent::Error { location, error } => {
            tracing::error!(asset_id = %asset_id, error = %error, "transfer task failed");
            let location = location.or_else(|| known_location.clone());
            *known_location = location.clone();
            settle(
                ctx,
                task_id,
                Settlement {
                    record: in_progress(location.clone()),
                    next: DownloadState::Suspended,
                    unbind: false,
                    event: Event::Error {
                        asset_id,
                        location,
                        error: Arc::new(Error::from(error)),
                    },
                },
            )
            .await
        }
    }
}

/// Emit `event` for a bound task, moving the lifecycle to `next` if given
async fn publish(ctx: &SessionContext, task_id: u64, next: Option<DownloadState>, event: Event) {
    let mut state = ctx.state.lock().await;
    if !state.is_bound(task_id) {
        tracing::warn!(asset_id = %ctx.asset_id, task_id, "ignoring event from unbound transfer task");
        return;
    }

    if let Some(next) = next {
        // a pending cancellation is only left through the task's canceled event
        if state.lifecycle != DownloadState::Canceling {
            state.lifecycle = next;
        }
    }
    ctx.emit(event);
}

/// Persist the record of a lifecycle-changing event, then apply and emit it
async fn settle(ctx: &SessionContext, task_id: u64, settlement: Settlement) {
    let sequence = ctx.persistence.next_sequence();
    let mut state = ctx.state.lock().await;
    if !state.is_bound(task_id) {
        tracing::warn!(asset_id = %ctx.asset_id, task_id, "ignoring event from unbound transfer task");
        return;
    }

    let Settlement {
        record,
        next,
        unbind,
        event,
    } = settlement;

    if let Err(e) = ctx
        .persistence
        .write(ctx.services.store.as_ref(), sequence, &record)
        .await
    {
        tracing::error!(asset_id = %ctx.asset_id, error = %e, "failed to persist session record");
        ctx.emit_error(record.location.clone(), e);
    }

    if !(state.lifecycle == DownloadState::Canceling && next == DownloadState::Suspended) {
        state.lifecycle = next;
    }
    if unbind {
        state.task = None;
    }
    ctx.emit(event);
}
