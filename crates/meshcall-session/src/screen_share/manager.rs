use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use meshcall_common::{CallId, Event, SessionError, SlotIndex};

use crate::deps::SessionDeps;
use crate::media::{LocalMedia, LocalMediaState, MediaSource};
use crate::membership::Registration;
use crate::mesh::{MeshController, MeshHandle, MeshParams};
use crate::negotiator::LinkState;

// ---------------------------------------------------------------------------
// Screen Share Manager
// ---------------------------------------------------------------------------

struct ActiveShare {
    slot: SlotIndex,
    source: Arc<MediaSource>,
    handle: MeshHandle,
    /// Owns the media the virtual mesh sends.
    _media: LocalMedia,
}

struct Inner {
    deps: SessionDeps,
    call: CallId,
    sharer: SlotIndex,
    sharer_name: String,
    active: Mutex<Option<ActiveShare>>,
}

/// Runs at most one screen share for one participant.
#[derive(Clone)]
pub struct ScreenShareManager {
    inner: Arc<Inner>,
}

impl ScreenShareManager {
    pub fn new(deps: SessionDeps, call: CallId, sharer: SlotIndex, sharer_name: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                call,
                sharer,
                sharer_name: sharer_name.to_string(),
                active: Mutex::new(None),
            }),
        }
    }

    /// Publish `source` as a new slot. Returns the virtual slot index.
    pub async fn start(&self, source: Arc<MediaSource>) -> Result<SlotIndex, SessionError> {
        let inner = &self.inner;
        let mut active = inner.active.lock().await;
        if active.is_some() {
            return Err(SessionError::AlreadySharing);
        }

        let membership = inner.deps.membership();
        let claim = match membership
            .register(
                &inner.call,
                Registration::screen_share(&inner.sharer_name, inner.sharer),
            )
            .await
        {
            Ok(claim) => claim,
            Err(e) => {
                source.stop();
                return Err(e);
            }
        };
        let slot = claim.index;
        let incarnation = claim.incarnation.clone();

        let media = LocalMedia::new(LocalMediaState::from_screen(&source));
        let params = MeshParams {
            claim,
            sharer: Some(inner.sharer),
            media: media.subscribe(),
            report_participants: false,
        };
        let handle = match MeshController::start(params, inner.deps.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(call = %inner.call, slot, error = %e, "Screen share mesh failed to start");
                if let Err(e) = membership
                    .leave_incarnation(&inner.call, slot, Some(incarnation.as_str()))
                    .await
                {
                    warn!(call = %inner.call, slot, error = %e, "Could not release share slot");
                }
                source.stop();
                return Err(e);
            }
        };

        Self::watch_source(Arc::downgrade(&self.inner), Arc::clone(&source));
        *active = Some(ActiveShare {
            slot,
            source,
            handle,
            _media: media,
        });

        info!(call = %inner.call, sharer = inner.sharer, slot, "Screen share started");
        inner.deps.events.publish(Event::ScreenShareStarted {
            virtual_slot: slot,
            sharer: inner.sharer,
        });
        Ok(slot)
    }

    /// End the active share, if any. Returns whether one was running.
    pub async fn stop(&self) -> Result<bool, SessionError> {
        Self::stop_inner(&self.inner, None).await
    }

    /// Abnormal teardown: stop the source and let the virtual mesh publish
    /// its departure within the flush timeout.
    pub async fn terminate(&self) {
        let share = self.inner.active.lock().await.take();
        if let Some(share) = share {
            share.source.stop();
            share.handle.terminate().await;
        }
    }

    pub async fn active_slot(&self) -> Option<SlotIndex> {
        self.inner.active.lock().await.as_ref().map(|s| s.slot)
    }

    /// Links of the virtual slot, ordered by remote slot.
    pub async fn link_states(&self) -> Vec<(SlotIndex, LinkState)> {
        let handle = self
            .inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|s| s.handle.clone());
        match handle {
            Some(handle) => handle.link_states().await,
            None => Vec::new(),
        }
    }

    /// Stop the share once its source ends. Holds the manager weakly so a
    /// dropped session is not kept alive by a running capture.
    fn watch_source(inner: Weak<Inner>, source: Arc<MediaSource>) {
        tokio::spawn(async move {
            source.ended().await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            debug!(source = source.id(), "Capture source ended");
            if let Err(e) = Self::stop_inner(&inner, Some(source.id())).await {
                warn!(error = %e, "Stopping ended screen share failed");
            }
        });
    }

    /// Stop the active share; with `source_id`, only if it still publishes
    /// that source.
    async fn stop_inner(inner: &Inner, source_id: Option<&str>) -> Result<bool, SessionError> {
        let share = {
            let mut active = inner.active.lock().await;
            let matches = match (active.as_ref(), source_id) {
                (None, _) => false,
                (Some(share), Some(id)) => share.source.id() == id,
                (Some(_), None) => true,
            };
            if !matches {
                return Ok(false);
            }
            active.take()
        };
        let Some(share) = share else {
            return Ok(false);
        };

        share.source.stop();
        let result = share.handle.hangup().await;
        info!(call = %inner.call, sharer = inner.sharer, slot = share.slot, "Screen share stopped");
        inner.deps.events.publish(Event::ScreenShareStopped {
            virtual_slot: share.slot,
            sharer: inner.sharer,
        });
        result.map(|_| true)
    }
}
