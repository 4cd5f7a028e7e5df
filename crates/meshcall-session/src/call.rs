//! One participant's call: local media, its slot, the primary mesh and an
//! optional screen share.

use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use meshcall_common::{CallId, ParticipantUpdate, SessionError, SlotIndex, TrackKind};

use crate::deps::SessionDeps;
use crate::media::{LocalMedia, LocalMediaState, MediaSource, MediaTrack, VideoSource};
use crate::membership::SlotClaim;
use crate::mesh::{MeshController, MeshHandle, MeshParams};
use crate::negotiator::LinkState;
use crate::screen_share::ScreenShareManager;

/// A joined call.
///
/// Dropping the session without [`hangup`](Self::hangup) or
/// [`terminate`](Self::terminate) stops it without a word to the other
/// participants; they evict the slot after the grace period.
pub struct CallSession {
    deps: SessionDeps,
    claim: SlotClaim,
    display_name: String,
    media: Arc<LocalMedia>,
    microphone: Arc<MediaSource>,
    camera: Mutex<Option<Arc<MediaSource>>>,
    mesh: MeshHandle,
    screen: ScreenShareManager,
}

impl CallSession {
    /// Start a new call under a freshly generated id.
    pub async fn create(deps: SessionDeps, display_name: &str) -> Result<Self, SessionError> {
        Self::join(deps, CallId::generate(), display_name).await
    }

    /// Acquire local media, take a slot in `call` and start linking.
    /// Nothing is left behind when any step fails.
    pub async fn join(
        deps: SessionDeps,
        call: CallId,
        display_name: &str,
    ) -> Result<Self, SessionError> {
        let settings = &deps.settings;
        let microphone = deps.media.acquire_microphone().await?;
        let camera = if settings.start_with_camera {
            match deps.media.acquire_camera().await {
                Ok(camera) => Some(camera),
                Err(e) => {
                    microphone.stop();
                    return Err(e.into());
                }
            }
        } else {
            None
        };
        let release = |camera: &Option<Arc<MediaSource>>| {
            microphone.stop();
            if let Some(camera) = camera {
                camera.stop();
            }
        };

        let mut audio = microphone.track(TrackKind::Audio).cloned();
        if let Some(track) = audio.as_mut() {
            track.enabled = settings.start_with_mic;
        }
        let (video, video_source) = match camera
            .as_ref()
            .and_then(|c| c.track(TrackKind::Video).cloned())
        {
            Some(track) => (track, VideoSource::Camera),
            None => (
                MediaTrack::placeholder(settings.placeholder_label.as_str()),
                VideoSource::Placeholder,
            ),
        };
        let media = Arc::new(LocalMedia::new(LocalMediaState {
            audio,
            video: Some(video),
            video_source,
        }));

        let membership = deps.membership();
        let claim = match membership.join(&call, display_name).await {
            Ok(claim) => claim,
            Err(e) => {
                release(&camera);
                return Err(e);
            }
        };

        let params = MeshParams {
            claim: claim.clone(),
            sharer: None,
            media: media.subscribe(),
            report_participants: true,
        };
        let mesh = match MeshController::start(params, deps.clone()).await {
            Ok(mesh) => mesh,
            Err(e) => {
                warn!(%call, slot = claim.index, error = %e, "Mesh failed to start");
                if let Err(e) = membership
                    .leave_incarnation(&call, claim.index, Some(claim.incarnation.as_str()))
                    .await
                {
                    warn!(%call, slot = claim.index, error = %e, "Could not release slot");
                }
                release(&camera);
                return Err(e);
            }
        };

        if let Some(camera) = &camera {
            watch_camera(
                Arc::downgrade(&media),
                Arc::clone(camera),
                settings.placeholder_label.clone(),
            );
        }
        let screen = ScreenShareManager::new(deps.clone(), call.clone(), claim.index, display_name);
        info!(%call, slot = claim.index, name = display_name, "Joined call");

        Ok(Self {
            deps,
            claim,
            display_name: display_name.to_string(),
            media,
            microphone,
            camera: Mutex::new(camera),
            mesh,
            screen,
        })
    }

    pub fn call_id(&self) -> &CallId {
        &self.claim.call
    }

    pub fn slot(&self) -> SlotIndex {
        self.claim.index
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Shareable link that joins this call.
    pub fn invite_link(&self, base_url: &str) -> String {
        self.claim.call.invite_link(base_url)
    }

    pub fn local_media(&self) -> Arc<LocalMediaState> {
        self.media.snapshot()
    }

    /// Whether the session is still in the call.
    pub fn is_active(&self) -> bool {
        self.mesh.is_running()
    }

    /// Mute or unmute. The audio track stays on every link.
    pub fn set_mic_enabled(&self, enabled: bool) {
        self.media.update(|state| {
            if let Some(audio) = state.audio.as_mut() {
                audio.enabled = enabled;
            }
        });
        debug!(slot = self.claim.index, enabled, "Microphone toggled");
    }

    /// Swap between the camera and the placeholder image. The video track
    /// kind never changes, so no link renegotiates.
    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        let mut camera = self.camera.lock().await;
        if enabled {
            if camera.as_ref().is_some_and(|c| !c.is_ended()) {
                return Ok(());
            }
            let source = self.deps.media.acquire_camera().await?;
            let track = source.track(TrackKind::Video).cloned();
            self.media.update(|state| {
                if let Some(track) = track {
                    state.video = Some(track);
                    state.video_source = VideoSource::Camera;
                }
            });
            watch_camera(
                Arc::downgrade(&self.media),
                Arc::clone(&source),
                self.deps.settings.placeholder_label.clone(),
            );
            *camera = Some(source);
        } else {
            if let Some(source) = camera.take() {
                source.stop();
            }
            show_placeholder(&self.media, &self.deps.settings.placeholder_label);
        }
        debug!(slot = self.claim.index, enabled, "Camera toggled");
        Ok(())
    }

    /// Publish the screen as a new slot. Returns its index.
    pub async fn start_screen_share(&self) -> Result<SlotIndex, SessionError> {
        if self.screen.active_slot().await.is_some() {
            return Err(SessionError::AlreadySharing);
        }
        let source = self.deps.media.acquire_screen().await?;
        self.screen.start(source).await
    }

    /// Returns whether a share was running.
    pub async fn stop_screen_share(&self) -> Result<bool, SessionError> {
        self.screen.stop().await
    }

    pub async fn screen_share_slot(&self) -> Option<SlotIndex> {
        self.screen.active_slot().await
    }

    /// Remote participants with their connectivity, ordered by slot.
    pub async fn participants(&self) -> Vec<ParticipantUpdate> {
        self.mesh.participants().await
    }

    pub async fn link_states(&self) -> Vec<(SlotIndex, LinkState)> {
        self.mesh.link_states().await
    }

    /// Report that the app went to the background or came back.
    pub async fn set_visibility(&self, hidden: bool) {
        self.mesh.set_visibility(hidden).await;
    }

    /// Leave the call. Safe to call more than once.
    pub async fn hangup(&self) -> Result<(), SessionError> {
        if let Err(e) = self.screen.stop().await {
            warn!(slot = self.claim.index, error = %e, "Screen share did not stop cleanly");
        }
        let result = self.mesh.hangup().await;
        self.release_media().await;
        result
    }

    /// Abnormal exit: publish the departure if it fits in the flush
    /// timeout, then release everything.
    pub async fn terminate(&self) {
        self.screen.terminate().await;
        self.mesh.terminate().await;
        self.release_media().await;
    }

    async fn release_media(&self) {
        self.microphone.stop();
        if let Some(camera) = self.camera.lock().await.take() {
            camera.stop();
        }
    }
}

fn show_placeholder(media: &LocalMedia, label: &str) {
    media.update(|state| {
        state.video = Some(MediaTrack::placeholder(label));
        state.video_source = VideoSource::Placeholder;
    });
}

/// Fall back to the placeholder when the camera goes away underneath us,
/// unless something else replaced it first.
fn watch_camera(media: Weak<LocalMedia>, camera: Arc<MediaSource>, label: String) {
    let Some(track_id) = camera.track(TrackKind::Video).map(|t| t.id.clone()) else {
        return;
    };
    tokio::spawn(async move {
        camera.ended().await;
        let Some(media) = media.upgrade() else {
            return;
        };
        let current = media.snapshot();
        if current.video.as_ref().is_some_and(|t| t.id == track_id) {
            info!(source = camera.id(), "Camera ended, sending placeholder");
            show_placeholder(&media, &label);
        }
    });
}
