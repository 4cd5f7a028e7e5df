//! The negotiator itself.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use meshcall_common::{EngineError, SessionError, SlotIndex, TrackKind};

use super::types::{LinkContext, LinkState, Role, SignalSink, TickOutcome};
use crate::engine::{LinkConnectivity, PeerConnection, SessionDescription};
use crate::media::LocalMediaState;
use crate::protocol::{IceCandidate, MessageKind, SignalEnvelope, SignalingMessage, StorePath};
use crate::settings::NegotiationSettings;
use crate::signaling::{Delivery, DeliveryCallback, SignalingStore, Subscription};

/// Drives one link from first offer to close.
///
/// Not shared: the owning mesh controller calls it from a single task, one
/// event at a time.
pub struct PeerLinkNegotiator {
    ctx: LinkContext,
    role: Role,
    state: LinkState,
    store: Arc<dyn SignalingStore>,
    connection: Arc<dyn PeerConnection>,
    settings: NegotiationSettings,
    /// Initiator: last offered generation. Responder: last answered one.
    generation: u32,
    negotiated_kinds: Vec<TrackKind>,
    has_remote_description: bool,
    pending_remote: VecDeque<IceCandidate>,
    seen_remote: HashSet<String>,
    local_candidates: Vec<IceCandidate>,
    candidate_batch: u32,
    transport_up: bool,
    /// The transport came up at least once.
    reached: bool,
    renegotiating: bool,
    last_progress: Instant,
    disconnected_since: Option<Instant>,
    subscriptions: Vec<Subscription>,
    released: bool,
}

impl PeerLinkNegotiator {
    pub fn new(
        ctx: LinkContext,
        store: Arc<dyn SignalingStore>,
        connection: Arc<dyn PeerConnection>,
        settings: NegotiationSettings,
    ) -> Self {
        let role = Role::for_pair(ctx.local, ctx.remote);
        Self {
            ctx,
            role,
            state: LinkState::Idle,
            store,
            connection,
            settings,
            generation: 0,
            negotiated_kinds: Vec::new(),
            has_remote_description: false,
            pending_remote: VecDeque::new(),
            seen_remote: HashSet::new(),
            local_candidates: Vec::new(),
            candidate_batch: 0,
            transport_up: false,
            reached: false,
            renegotiating: false,
            last_progress: Instant::now(),
            disconnected_since: None,
            subscriptions: Vec::new(),
            released: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn remote(&self) -> SlotIndex {
        self.ctx.remote
    }

    pub fn remote_incarnation(&self) -> &str {
        &self.ctx.remote_incarnation
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_renegotiating(&self) -> bool {
        self.renegotiating
    }

    pub fn transport_up(&self) -> bool {
        self.transport_up
    }

    /// Remote candidates waiting for a remote description.
    pub fn buffered_candidates(&self) -> usize {
        self.pending_remote.len()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Subscribe to the counterpart's paths and take the first step of the
    /// role: the initiator offers, the responder waits.
    pub async fn start(
        &mut self,
        media: &LocalMediaState,
        sink: SignalSink,
    ) -> Result<(), SessionError> {
        if self.state != LinkState::Idle {
            return Ok(());
        }
        for kind in MessageKind::ALL {
            let path = StorePath::link(&self.ctx.call, self.ctx.remote, self.ctx.local, kind);
            let sink = Arc::clone(&sink);
            let callback: DeliveryCallback = Arc::new(move |delivery: Delivery| {
                match serde_json::from_value::<SignalEnvelope>(delivery.value) {
                    Ok(envelope) => sink(envelope),
                    Err(e) => warn!(path = %delivery.path, error = %e, "Malformed signal"),
                }
            });
            match self.store.subscribe(&path, callback).await {
                Ok(sub) => self.subscriptions.push(sub),
                Err(e) => return Err(self.fail(e.into()).await),
            }
        }

        self.last_progress = Instant::now();
        match self.role {
            Role::Initiator => {
                if let Err(e) = self.send_offer(media).await {
                    return Err(self.fail(e).await);
                }
            }
            Role::Responder => self.state = LinkState::AwaitingOffer,
        }
        debug!(
            call = %self.ctx.call,
            local = self.ctx.local,
            remote = self.ctx.remote,
            role = ?self.role,
            "Peer link started"
        );
        Ok(())
    }

    /// Release subscriptions and the connection, then retire the paths this
    /// side authored. Safe from any state; repeated calls do nothing.
    pub async fn close(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        self.release().await;
        if self.state != LinkState::Failed {
            self.state = LinkState::Closed;
        }
        for kind in MessageKind::ALL {
            let path = StorePath::link(&self.ctx.call, self.ctx.local, self.ctx.remote, kind);
            if let Err(e) = self.store.clear(&path).await {
                debug!(%path, error = %e, "Could not clear link path");
            }
        }
        info!(
            call = %self.ctx.call,
            local = self.ctx.local,
            remote = self.ctx.remote,
            "Peer link closed"
        );
    }

    /// Drop the connection without touching the store, as a crashed
    /// process would.
    pub async fn abandon(&mut self) {
        self.release().await;
        if !self.state.is_terminal() {
            self.state = LinkState::Closed;
        }
    }

    async fn release(&mut self) {
        for sub in self.subscriptions.drain(..) {
            sub.unsubscribe();
        }
        self.pending_remote.clear();
        if !self.released {
            self.released = true;
            self.connection.close().await;
        }
    }

    async fn fail(&mut self, err: SessionError) -> SessionError {
        warn!(
            call = %self.ctx.call,
            local = self.ctx.local,
            remote = self.ctx.remote,
            state = %self.state,
            error = %err,
            "Peer link failed"
        );
        self.release().await;
        self.state = LinkState::Failed;
        err
    }

    // -----------------------------------------------------------------------
    // Inbound signals
    // -----------------------------------------------------------------------

    pub async fn handle_signal(
        &mut self,
        envelope: SignalEnvelope,
        media: &LocalMediaState,
    ) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        if !self.addressed_here(&envelope) {
            debug!(
                remote = self.ctx.remote,
                from = envelope.from,
                "Ignoring signal for another incarnation"
            );
            return Ok(());
        }

        let result = match envelope.message {
            SignalingMessage::Offer { sdp, generation } => {
                self.on_offer(sdp, generation, media).await
            }
            SignalingMessage::Answer { sdp, generation } => self.on_answer(sdp, generation).await,
            SignalingMessage::CandidateBatch { batch, candidates } => {
                self.on_candidates(batch, candidates).await;
                Ok(())
            }
            SignalingMessage::RenegotiationRequest { generation } => {
                self.on_renegotiation_request(generation, media).await
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    fn addressed_here(&self, envelope: &SignalEnvelope) -> bool {
        envelope.from == self.ctx.remote
            && envelope.to == self.ctx.local
            && envelope.from_incarnation == self.ctx.remote_incarnation
            && envelope.to_incarnation == self.ctx.local_incarnation
    }

    async fn on_offer(
        &mut self,
        sdp: String,
        generation: u32,
        media: &LocalMediaState,
    ) -> Result<(), SessionError> {
        if self.role == Role::Initiator {
            warn!(remote = self.ctx.remote, "Ignoring offer from the responding side");
            return Ok(());
        }
        if generation <= self.generation {
            debug!(remote = self.ctx.remote, generation, "Ignoring stale offer");
            return Ok(());
        }

        self.connection
            .set_remote_description(&SessionDescription::offer(sdp))
            .await?;
        self.has_remote_description = true;
        self.flush_pending().await;

        let answer = self.connection.create_answer(media).await?;
        self.connection.set_local_description(&answer).await?;
        self.generation = generation;
        self.negotiated_kinds = media.kinds();
        self.publish_reliably(SignalingMessage::Answer {
            sdp: answer.sdp,
            generation,
        })
        .await?;

        self.renegotiating = false;
        self.exchange_complete();
        info!(
            call = %self.ctx.call,
            local = self.ctx.local,
            remote = self.ctx.remote,
            generation,
            "Answer sent"
        );
        Ok(())
    }

    async fn on_answer(&mut self, sdp: String, generation: u32) -> Result<(), SessionError> {
        if self.role == Role::Responder {
            return Ok(());
        }
        if self.state != LinkState::OfferSent || generation != self.generation {
            debug!(
                remote = self.ctx.remote,
                generation,
                outstanding = self.generation,
                "Ignoring answer with no matching offer"
            );
            return Ok(());
        }

        self.connection
            .set_remote_description(&SessionDescription::answer(sdp))
            .await?;
        self.has_remote_description = true;
        self.flush_pending().await;

        self.renegotiating = false;
        self.exchange_complete();
        info!(
            call = %self.ctx.call,
            local = self.ctx.local,
            remote = self.ctx.remote,
            generation,
            "Answer applied"
        );
        Ok(())
    }

    fn exchange_complete(&mut self) {
        self.last_progress = Instant::now();
        self.state = if self.transport_up {
            LinkState::Connected
        } else {
            LinkState::AnswerExchanged
        };
    }

    async fn on_candidates(&mut self, batch: u32, candidates: Vec<IceCandidate>) {
        let mut fresh = 0usize;
        for candidate in candidates {
            if !self.seen_remote.insert(candidate.candidate.clone()) {
                continue;
            }
            fresh += 1;
            if self.has_remote_description {
                self.apply_candidate(candidate).await;
            } else {
                self.pending_remote.push_back(candidate);
            }
        }
        debug!(
            remote = self.ctx.remote,
            batch,
            fresh,
            buffered = self.pending_remote.len(),
            "Candidate batch received"
        );
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        match self.connection.add_remote_candidate(&candidate).await {
            Ok(()) => {}
            Err(EngineError::NoRemoteDescription) => {
                // Engine lost the description we applied. Forget the
                // candidate so the next cumulative batch retries it.
                warn!(
                    remote = self.ctx.remote,
                    candidate = %candidate.candidate,
                    "Remote candidate rejected without a remote description"
                );
                self.seen_remote.remove(&candidate.candidate);
            }
            Err(e) => warn!(remote = self.ctx.remote, error = %e, "Remote candidate rejected"),
        }
    }

    /// Apply buffered candidates in arrival order.
    async fn flush_pending(&mut self) {
        while let Some(candidate) = self.pending_remote.pop_front() {
            if let Err(e) = self.connection.add_remote_candidate(&candidate).await {
                warn!(remote = self.ctx.remote, error = %e, "Buffered candidate rejected");
            }
        }
    }

    async fn on_renegotiation_request(
        &mut self,
        generation: u32,
        media: &LocalMediaState,
    ) -> Result<(), SessionError> {
        if self.role == Role::Responder {
            return Ok(());
        }
        if generation < self.generation || self.state == LinkState::OfferSent {
            debug!(
                remote = self.ctx.remote,
                generation, "Renegotiation already under way"
            );
            return Ok(());
        }
        info!(remote = self.ctx.remote, "Renegotiation requested by responder");
        self.renegotiating = true;
        self.send_offer(media).await
    }

    // -----------------------------------------------------------------------
    // Local events
    // -----------------------------------------------------------------------

    /// Publish everything gathered so far as one cumulative batch, so a
    /// dropped batch is replaced by the next one.
    pub async fn on_local_candidate(&mut self, candidate: IceCandidate) {
        if self.state.is_terminal() || self.local_candidates.contains(&candidate) {
            return;
        }
        self.local_candidates.push(candidate);
        self.candidate_batch += 1;
        let message = SignalingMessage::CandidateBatch {
            batch: self.candidate_batch,
            candidates: self.local_candidates.clone(),
        };
        if let Err(e) = self.publish_once(message).await {
            warn!(
                remote = self.ctx.remote,
                batch = self.candidate_batch,
                error = %e,
                "Candidate batch dropped; the next batch supersedes it"
            );
        }
    }

    pub fn on_connectivity(&mut self, event: LinkConnectivity, now: Instant) {
        if self.state.is_terminal() {
            return;
        }
        match event {
            LinkConnectivity::Reachable => {
                self.transport_up = true;
                self.reached = true;
                self.disconnected_since = None;
                if matches!(
                    self.state,
                    LinkState::AnswerExchanged | LinkState::Disconnected
                ) {
                    self.state = LinkState::Connected;
                    info!(
                        call = %self.ctx.call,
                        local = self.ctx.local,
                        remote = self.ctx.remote,
                        "Peer link connected"
                    );
                }
            }
            LinkConnectivity::Unreachable | LinkConnectivity::Lost => {
                self.transport_up = false;
                if self.state == LinkState::Connected {
                    self.state = LinkState::Disconnected;
                    self.disconnected_since = Some(now);
                    warn!(
                        call = %self.ctx.call,
                        local = self.ctx.local,
                        remote = self.ctx.remote,
                        ?event,
                        "Peer link disconnected"
                    );
                } else if self.renegotiating && self.disconnected_since.is_none() {
                    self.disconnected_since = Some(now);
                }
            }
        }
    }

    /// Swap outbound content; renegotiate only when the kind set changes.
    pub async fn on_media_changed(&mut self, media: &LocalMediaState) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        if let Err(e) = self.connection.replace_outbound(media).await {
            warn!(remote = self.ctx.remote, error = %e, "Track replacement failed");
        }

        let kinds = media.kinds();
        if kinds == self.negotiated_kinds || self.generation == 0 {
            return Ok(());
        }

        info!(
            remote = self.ctx.remote,
            from = ?self.negotiated_kinds,
            to = ?kinds,
            "Track kinds changed; renegotiating"
        );
        self.renegotiating = true;
        let result = match self.role {
            Role::Initiator => self.send_offer(media).await,
            Role::Responder => {
                self.negotiated_kinds = kinds;
                self.last_progress = Instant::now();
                self.state = LinkState::AwaitingOffer;
                self.publish_reliably(SignalingMessage::RenegotiationRequest {
                    generation: self.generation,
                })
                .await
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Enforce the grace period and the negotiation timeout.
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.state.is_terminal() {
            return TickOutcome::Idle;
        }

        if let Some(since) = self.disconnected_since {
            let waiting = self.state == LinkState::Disconnected
                || (self.state.is_negotiating() && !self.transport_up);
            if waiting && now.saturating_duration_since(since) >= self.settings.disconnect_grace {
                warn!(
                    call = %self.ctx.call,
                    local = self.ctx.local,
                    remote = self.ctx.remote,
                    grace_ms = self.settings.disconnect_grace.as_millis() as u64,
                    "No recovery within grace period"
                );
                self.close().await;
                return TickOutcome::GraceExpired;
            }
        }

        if self.state.is_negotiating()
            && now.saturating_duration_since(self.last_progress)
                >= self.settings.negotiation_timeout
        {
            let err = SessionError::NegotiationTimeout {
                remote: self.ctx.remote,
            };
            self.fail(err).await;
            return if self.reached {
                TickOutcome::TimedOut
            } else {
                TickOutcome::NeverReached
            };
        }

        TickOutcome::Idle
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    async fn send_offer(&mut self, media: &LocalMediaState) -> Result<(), SessionError> {
        let offer = self.connection.create_offer(media).await?;
        self.connection.set_local_description(&offer).await?;
        self.generation += 1;
        self.negotiated_kinds = media.kinds();
        self.publish_reliably(SignalingMessage::Offer {
            sdp: offer.sdp,
            generation: self.generation,
        })
        .await?;
        self.state = LinkState::OfferSent;
        self.last_progress = Instant::now();
        info!(
            call = %self.ctx.call,
            local = self.ctx.local,
            remote = self.ctx.remote,
            generation = self.generation,
            "Offer sent"
        );
        Ok(())
    }

    fn envelope(&self, message: SignalingMessage) -> SignalEnvelope {
        SignalEnvelope {
            from: self.ctx.local,
            to: self.ctx.remote,
            from_incarnation: self.ctx.local_incarnation.clone(),
            to_incarnation: self.ctx.remote_incarnation.clone(),
            message,
        }
    }

    fn outbound_path(&self, kind: MessageKind) -> StorePath {
        StorePath::link(&self.ctx.call, self.ctx.local, self.ctx.remote, kind)
    }

    async fn publish_once(&self, message: SignalingMessage) -> Result<(), SessionError> {
        let path = self.outbound_path(message.kind());
        let value = serde_json::to_value(self.envelope(message))?;
        self.store.publish(&path, value).await?;
        Ok(())
    }

    /// Offers, answers and renegotiation requests are never dropped
    /// silently: retry, then fail the link.
    async fn publish_reliably(&self, message: SignalingMessage) -> Result<(), SessionError> {
        let path = self.outbound_path(message.kind());
        let value = serde_json::to_value(self.envelope(message))?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.publish(&path, value.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < self.settings.publish_attempts => {
                    warn!(%path, attempt, error = %e, "Publish failed, retrying");
                    tokio::time::sleep(self.settings.publish_retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
