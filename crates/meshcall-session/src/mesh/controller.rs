use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use meshcall_common::{
    CallId, Connectivity, Event, ParticipantUpdate, SessionError, SlotIndex,
};

use super::handle::MeshHandle;
use super::topology::should_link;
use super::MeshParams;
use crate::deps::SessionDeps;
use crate::engine::{EngineEvent, EngineEventSink, LinkKey};
use crate::media::LocalMediaState;
use crate::membership::SessionMembership;
use crate::negotiator::{LinkContext, LinkState, PeerLinkNegotiator, SignalSink, TickOutcome};
use crate::protocol::{DepartureMarker, Roster, SignalEnvelope, SlotRecord};
use crate::shutdown::flush_with_timeout;
use crate::signaling::Subscription;

const COMMAND_CAPACITY: usize = 32;

pub(crate) enum Command {
    Hangup {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Terminate {
        reply: oneshot::Sender<()>,
    },
    SetVisibility {
        hidden: bool,
    },
    Participants {
        reply: oneshot::Sender<Vec<ParticipantUpdate>>,
    },
    LinkStates {
        reply: oneshot::Sender<Vec<(SlotIndex, LinkState)>>,
    },
}

/// Inputs produced by store subscriptions and engine callbacks.
enum Inbound {
    Roster(Roster),
    Departed(DepartureMarker),
    Signal {
        remote: SlotIndex,
        epoch: u64,
        envelope: SignalEnvelope,
    },
    Engine {
        remote: SlotIndex,
        epoch: u64,
        event: EngineEvent,
    },
}

enum Flow {
    Continue,
    Stop,
}

struct LinkEntry {
    negotiator: PeerLinkNegotiator,
    /// Deliveries tagged with an older epoch belong to a closed link.
    epoch: u64,
    incarnation: String,
}

/// Entry point for running a mesh. See the module docs.
pub struct MeshController {
    call: CallId,
    local: SlotIndex,
    incarnation: String,
    sharer: Option<SlotIndex>,
    report_participants: bool,
    deps: SessionDeps,
    membership: SessionMembership,
    media: watch::Receiver<Arc<LocalMediaState>>,
    media_open: bool,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    links: BTreeMap<SlotIndex, LinkEntry>,
    participants: BTreeMap<SlotIndex, ParticipantUpdate>,
    /// Incarnations evicted after the grace period, never linked again.
    tombstones: HashSet<(SlotIndex, String)>,
    next_epoch: u64,
    background_deadline: Option<Instant>,
    subscriptions: Vec<Subscription>,
}

impl MeshController {
    /// Subscribe to the call's roster and departures and spawn the
    /// controller task.
    pub async fn start(params: MeshParams, deps: SessionDeps) -> Result<MeshHandle, SessionError> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let membership = deps.membership();
        let call = params.claim.call.clone();

        let tx = inbox_tx.clone();
        let roster_sub = membership
            .watch(&call, move |roster| {
                let _ = tx.send(Inbound::Roster(roster));
            })
            .await?;
        let tx = inbox_tx.clone();
        let departure_sub = membership
            .watch_departures(&call, move |marker| {
                let _ = tx.send(Inbound::Departed(marker));
            })
            .await?;

        let controller = Self {
            call: call.clone(),
            local: params.claim.index,
            incarnation: params.claim.incarnation,
            sharer: params.sharer,
            report_participants: params.report_participants,
            deps,
            membership,
            media: params.media,
            media_open: true,
            inbox_tx,
            links: BTreeMap::new(),
            participants: BTreeMap::new(),
            tombstones: HashSet::new(),
            next_epoch: 0,
            background_deadline: None,
            subscriptions: vec![roster_sub, departure_sub],
        };

        info!(%call, slot = controller.local, sharer = ?controller.sharer, "Mesh controller started");
        let handle = MeshHandle::new(call, controller.local, command_tx);
        tokio::spawn(controller.run(command_rx, inbox_rx));
        Ok(handle)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbox: mpsc::UnboundedReceiver<Inbound>,
    ) {
        let mut ticker = time::interval(self.deps.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.background_deadline;
            let flow = tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.stop_silently().await;
                        Flow::Stop
                    }
                },

                Some(inbound) = inbox.recv() => self.on_inbound(inbound).await,

                changed = self.media.changed(), if self.media_open => {
                    if changed.is_ok() {
                        let snapshot = self.media.borrow_and_update().clone();
                        self.on_media_changed(&snapshot).await;
                    } else {
                        self.media_open = false;
                    }
                    Flow::Continue
                }

                _ = ticker.tick() => self.on_tick().await,

                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    info!(call = %self.call, slot = self.local, "Hidden too long, leaving call");
                    if let Err(e) = self.hangup().await {
                        warn!(call = %self.call, error = %e, "Background leave failed");
                    }
                    Flow::Stop
                }
            };
            if let Flow::Stop = flow {
                break;
            }
        }
        debug!(call = %self.call, slot = self.local, "Mesh controller stopped");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Hangup { reply } => {
                let result = self.hangup().await;
                let _ = reply.send(result);
                Flow::Stop
            }
            Command::Terminate { reply } => {
                self.terminate().await;
                let _ = reply.send(());
                Flow::Stop
            }
            Command::SetVisibility { hidden } => {
                self.background_deadline = match (hidden, self.deps.settings.background_leave_after) {
                    (true, Some(after)) => {
                        debug!(call = %self.call, after_secs = after.as_secs(), "Background leave armed");
                        Some(Instant::now() + after)
                    }
                    _ => None,
                };
                Flow::Continue
            }
            Command::Participants { reply } => {
                let _ = reply.send(self.participants.values().cloned().collect());
                Flow::Continue
            }
            Command::LinkStates { reply } => {
                let states = self
                    .links
                    .iter()
                    .map(|(slot, entry)| (*slot, entry.negotiator.state()))
                    .collect();
                let _ = reply.send(states);
                Flow::Continue
            }
        }
    }

    async fn hangup(&mut self) -> Result<(), SessionError> {
        info!(call = %self.call, slot = self.local, "Hanging up");
        self.close_all_links().await;
        let result = self
            .membership
            .leave_incarnation(&self.call, self.local, Some(self.incarnation.as_str()))
            .await
            .map(|_| ());
        self.finish();
        result
    }

    async fn terminate(&mut self) {
        warn!(call = %self.call, slot = self.local, "Terminating");
        let limit = self.deps.settings.departure_flush_timeout;
        let departure =
            self.membership
                .leave_incarnation(&self.call, self.local, Some(self.incarnation.as_str()));
        if let Some(Err(e)) = flush_with_timeout(limit, departure).await {
            warn!(call = %self.call, error = %e, "Departure not published");
        }
        for entry in self.links.values_mut() {
            entry.negotiator.abandon().await;
        }
        self.links.clear();
        self.finish();
    }

    /// Handles are gone: release the connections and write nothing.
    async fn stop_silently(&mut self) {
        debug!(call = %self.call, slot = self.local, "All handles dropped, stopping silently");
        for entry in self.links.values_mut() {
            entry.negotiator.abandon().await;
        }
        self.links.clear();
        self.subscriptions.clear();
    }

    /// Local side is out of the call: drop the list and tell the bus.
    fn finish(&mut self) {
        self.subscriptions.clear();
        let slots: Vec<_> = self.participants.keys().copied().collect();
        for slot in slots {
            self.remove_participant(slot);
        }
        if self.report_participants {
            self.deps.events.publish(Event::CallLeft {
                call_id: self.call.to_string(),
                slot: self.local,
            });
        }
    }

    async fn close_all_links(&mut self) {
        for entry in self.links.values_mut() {
            entry.negotiator.close().await;
        }
        self.links.clear();
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn on_inbound(&mut self, inbound: Inbound) -> Flow {
        match inbound {
            Inbound::Roster(roster) => return self.on_roster(roster).await,
            Inbound::Departed(marker) => self.on_departed(marker).await,
            Inbound::Signal {
                remote,
                epoch,
                envelope,
            } => {
                let media = self.media.borrow().clone();
                let entry = self
                    .links
                    .get_mut(&remote)
                    .filter(|entry| entry.epoch == epoch);
                if let Some(entry) = entry {
                    if let Err(e) = entry.negotiator.handle_signal(envelope, &media).await {
                        warn!(call = %self.call, remote, error = %e, "Link negotiation failed");
                    }
                    self.refresh_participant(remote);
                }
            }
            Inbound::Engine {
                remote,
                epoch,
                event,
            } => self.on_engine_event(remote, epoch, event).await,
        }
        Flow::Continue
    }

    async fn on_roster(&mut self, roster: Roster) -> Flow {
        if !roster.holds(self.local, &self.incarnation) {
            warn!(call = %self.call, slot = self.local, "Local slot no longer in the roster");
            self.close_all_links().await;
            self.finish();
            return Flow::Stop;
        }

        self.tombstones
            .retain(|(slot, incarnation)| roster.holds(*slot, incarnation));

        let gone: Vec<SlotIndex> = self
            .links
            .iter()
            .filter(|(slot, entry)| !roster.holds(**slot, &entry.incarnation))
            .map(|(slot, _)| *slot)
            .collect();
        for slot in gone {
            self.drop_link(slot).await;
        }

        let candidates: Vec<(SlotIndex, SlotRecord)> = roster
            .slots
            .iter()
            .filter(|(slot, record)| {
                should_link(self.local, self.sharer, **slot, record.sharer)
                    && !self.links.contains_key(*slot)
                    && !self
                        .tombstones
                        .contains(&(**slot, record.incarnation.clone()))
            })
            .map(|(slot, record)| (*slot, record.clone()))
            .collect();
        for (slot, record) in candidates {
            self.open_link(slot, record).await;
        }
        Flow::Continue
    }

    async fn on_departed(&mut self, marker: DepartureMarker) {
        let matches = self
            .links
            .get(&marker.slot)
            .is_some_and(|entry| entry.incarnation == marker.incarnation);
        if matches {
            info!(call = %self.call, slot = self.local, remote = marker.slot, "Peer departed");
            self.drop_link(marker.slot).await;
        }
    }

    async fn on_engine_event(&mut self, remote: SlotIndex, epoch: u64, event: EngineEvent) {
        let report = self.report_participants;
        let events = Arc::clone(&self.deps.events);
        let Some(entry) = self
            .links
            .get_mut(&remote)
            .filter(|entry| entry.epoch == epoch)
        else {
            return;
        };
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                entry.negotiator.on_local_candidate(candidate).await;
            }
            EngineEvent::Connectivity(connectivity) => {
                entry.negotiator.on_connectivity(connectivity, Instant::now());
            }
            EngineEvent::RemoteTrack { track_id, kind } => {
                debug!(remote, %track_id, %kind, "Remote track");
                if report {
                    events.publish(Event::RemoteTrackAdded {
                        slot: remote,
                        track_id,
                        kind,
                    });
                }
            }
        }
        self.refresh_participant(remote);
    }

    async fn on_media_changed(&mut self, media: &LocalMediaState) {
        let slots: Vec<SlotIndex> = self.links.keys().copied().collect();
        for slot in slots {
            if let Some(entry) = self.links.get_mut(&slot) {
                if let Err(e) = entry.negotiator.on_media_changed(media).await {
                    warn!(call = %self.call, remote = slot, error = %e, "Renegotiation failed");
                }
            }
            self.refresh_participant(slot);
        }
    }

    async fn on_tick(&mut self) -> Flow {
        let now = Instant::now();
        let slots: Vec<SlotIndex> = self.links.keys().copied().collect();
        for slot in slots {
            let Some(entry) = self.links.get_mut(&slot) else {
                continue;
            };
            let outcome = entry.negotiator.tick(now).await;
            match outcome {
                TickOutcome::Idle => {}
                TickOutcome::TimedOut => self.refresh_participant(slot),
                TickOutcome::GraceExpired | TickOutcome::NeverReached => self.evict(slot).await,
            }
        }
        Flow::Continue
    }

    /// A peer stayed unreachable past the grace period, or never became
    /// reachable at all: forget it and take its slot out of the roster on
    /// its behalf.
    async fn evict(&mut self, slot: SlotIndex) {
        let Some(entry) = self.links.remove(&slot) else {
            return;
        };
        warn!(
            call = %self.call,
            slot = self.local,
            remote = slot,
            "Peer vanished, evicting"
        );
        self.tombstones.insert((slot, entry.incarnation.clone()));
        self.remove_participant(slot);
        match self
            .membership
            .leave_incarnation(&self.call, slot, Some(entry.incarnation.as_str()))
            .await
        {
            Ok(true) => info!(call = %self.call, remote = slot, "Vanished peer evicted"),
            Ok(false) => debug!(call = %self.call, remote = slot, "Vanished peer already gone"),
            Err(e) => warn!(call = %self.call, remote = slot, error = %e, "Eviction failed"),
        }
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    async fn open_link(&mut self, remote: SlotIndex, record: SlotRecord) {
        self.next_epoch += 1;
        let epoch = self.next_epoch;

        self.participants.insert(
            remote,
            ParticipantUpdate {
                slot: remote,
                display_name: record.display_name.clone(),
                sharer: record.sharer,
                connectivity: Connectivity::Joining,
            },
        );
        self.announce(remote);

        let key = LinkKey {
            call: self.call.clone(),
            local: self.local,
            remote,
        };
        let tx = self.inbox_tx.clone();
        let engine_sink: EngineEventSink = Arc::new(move |event| {
            let _ = tx.send(Inbound::Engine {
                remote,
                epoch,
                event,
            });
        });
        let connection = match self
            .deps
            .engine
            .create(&key, &self.deps.settings.ice, engine_sink)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                warn!(call = %self.call, remote, error = %e, "Could not create peer connection");
                self.set_connectivity(remote, Connectivity::Failed);
                return;
            }
        };

        let ctx = LinkContext {
            call: self.call.clone(),
            local: self.local,
            local_incarnation: self.incarnation.clone(),
            remote,
            remote_incarnation: record.incarnation.clone(),
        };
        let mut negotiator = PeerLinkNegotiator::new(
            ctx,
            Arc::clone(&self.deps.store),
            connection,
            self.deps.settings.negotiation.clone(),
        );
        let tx = self.inbox_tx.clone();
        let signal_sink: SignalSink = Arc::new(move |envelope| {
            let _ = tx.send(Inbound::Signal {
                remote,
                epoch,
                envelope,
            });
        });

        let media = self.media.borrow().clone();
        if let Err(e) = negotiator.start(&media, signal_sink).await {
            warn!(call = %self.call, remote, error = %e, "Link could not start");
        }
        self.links.insert(
            remote,
            LinkEntry {
                negotiator,
                epoch,
                incarnation: record.incarnation,
            },
        );
        self.refresh_participant(remote);
    }

    async fn drop_link(&mut self, remote: SlotIndex) {
        if let Some(mut entry) = self.links.remove(&remote) {
            entry.negotiator.close().await;
        }
        self.remove_participant(remote);
    }

    // -----------------------------------------------------------------------
    // Participant feed
    // -----------------------------------------------------------------------

    fn refresh_participant(&mut self, remote: SlotIndex) {
        let Some(entry) = self.links.get(&remote) else {
            return;
        };
        let connectivity = entry
            .negotiator
            .state()
            .connectivity(entry.negotiator.transport_up());
        self.set_connectivity(remote, connectivity);
    }

    fn set_connectivity(&mut self, remote: SlotIndex, connectivity: Connectivity) {
        let changed = match self.participants.get_mut(&remote) {
            Some(update) if update.connectivity != connectivity => {
                update.connectivity = connectivity;
                true
            }
            _ => false,
        };
        if changed {
            self.announce(remote);
        }
    }

    fn remove_participant(&mut self, remote: SlotIndex) {
        if let Some(mut update) = self.participants.remove(&remote) {
            update.connectivity = Connectivity::Left;
            self.publish(update);
        }
    }

    fn announce(&self, remote: SlotIndex) {
        if let Some(update) = self.participants.get(&remote) {
            self.publish(update.clone());
        }
    }

    fn publish(&self, update: ParticipantUpdate) {
        if !self.report_participants {
            return;
        }
        debug!(
            call = %self.call,
            slot = self.local,
            remote = update.slot,
            connectivity = ?update.connectivity,
            "Participant changed"
        );
        self.deps.events.publish(Event::ParticipantChanged(update));
    }
}
