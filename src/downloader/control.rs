//! Download lifecycle control: resume, suspend, cancel, bitrate.
//!
//! Control calls never wait for the transfer engine. Acknowledgements arrive
//! through the relay and update the lifecycle state there.

use crate::types::{DownloadState, Event};

use super::DownloadSession;

impl DownloadSession {
    /// Resume the download
    ///
    /// Resumes the bound transfer task if there is one, otherwise the
    /// in-flight entitlement request. With neither, a fresh non-lazy
    /// entitlement request is started. A completed session is left alone.
    pub async fn resume(&self) {
        let ctx = &self.ctx;
        let mut state = ctx.state.lock().await;

        if let Some(bound) = &state.task {
            tracing::debug!(asset_id = %ctx.asset_id, "resuming transfer task");
            bound.task.resume();
            return;
        }

        if let Some(request) = &state.request {
            tracing::debug!(asset_id = %ctx.asset_id, "resuming entitlement request");
            request.resume();
            return;
        }

        if state.lifecycle == DownloadState::Completed {
            tracing::debug!(asset_id = %ctx.asset_id, "download already completed");
            return;
        }

        ctx.start_entitlement_request(&mut state, false);
    }

    /// Suspend the download
    ///
    /// Suspends whichever of transfer task or entitlement request is bound;
    /// no-op if neither is. A task that already acknowledged a suspension is
    /// not asked again.
    pub async fn suspend(&self) {
        let ctx = &self.ctx;
        let state = ctx.state.lock().await;

        if let Some(bound) = &state.task {
            if state.lifecycle == DownloadState::Suspended {
                tracing::debug!(asset_id = %ctx.asset_id, "transfer task already suspended");
                return;
            }
            bound.task.suspend();
            return;
        }

        if let Some(request) = &state.request {
            if !request.is_suspended() {
                tracing::debug!(asset_id = %ctx.asset_id, "suspending entitlement request");
                request.suspend();
            }
        }
    }

    /// Cancel the download
    ///
    /// A bound transfer task is asked to cancel; its own cancellation event
    /// persists the record and unbinds it. An in-flight entitlement request is
    /// cancelled and unbound right away, firing
    /// [`Event::EntitlementRequestCancelled`] once. Cancelling again is a no-op.
    pub async fn cancel(&self) {
        let ctx = &self.ctx;
        let mut state = ctx.state.lock().await;

        if let Some(bound) = &state.task {
            if state.lifecycle == DownloadState::Canceling {
                tracing::debug!(asset_id = %ctx.asset_id, "cancellation already requested");
                return;
            }
            tracing::info!(asset_id = %ctx.asset_id, "canceling transfer task");
            bound.task.cancel();
            state.lifecycle = DownloadState::Canceling;
            return;
        }

        if let Some(request) = state.request.take() {
            tracing::info!(
                asset_id = %ctx.asset_id,
                request_id = request.id(),
                "canceling entitlement request"
            );
            request.cancel();
            ctx.emit(Event::EntitlementRequestCancelled {
                asset_id: ctx.asset_id.clone(),
            });
        }
    }

    /// Target bitrate (bits per second) for tasks built from now on
    ///
    /// An already constructed task keeps its representation; the value takes
    /// effect the next time a task is built for this session.
    pub async fn use_bitrate(&self, bitrate: Option<u64>) {
        let mut state = self.ctx.state.lock().await;
        state.bitrate = bitrate;
        if state.task.is_some() {
            tracing::debug!(
                asset_id = %self.ctx.asset_id,
                ?bitrate,
                "bitrate recorded; bound task keeps its current representation"
            );
        }
    }
}
