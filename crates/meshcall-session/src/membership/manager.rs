use std::sync::Arc;

use tracing::{debug, info, warn};

use meshcall_common::{new_id, CallId, SessionError, SignalingError, SlotIndex};

use super::{Registration, SlotClaim};
use crate::protocol::{DepartureMarker, Roster, SlotRecord, StorePath};
use crate::settings::MembershipSettings;
use crate::signaling::{publish_json, Delivery, DeliveryCallback, SignalingStore, Subscription};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Admits and removes occupants of calls held in one signaling store.
#[derive(Clone)]
pub struct SessionMembership {
    store: Arc<dyn SignalingStore>,
    settings: MembershipSettings,
}

impl SessionMembership {
    pub fn new(store: Arc<dyn SignalingStore>, settings: MembershipSettings) -> Self {
        Self { store, settings }
    }

    /// Take the lowest free slot as a regular participant.
    pub async fn join(&self, call: &CallId, display_name: &str) -> Result<SlotClaim, SessionError> {
        self.register(call, Registration::participant(display_name))
            .await
    }

    /// Take the lowest free, non-quarantined slot.
    pub async fn register(
        &self,
        call: &CallId,
        registration: Registration,
    ) -> Result<SlotClaim, SessionError> {
        let path = StorePath::roster(call);
        let incarnation = new_id();
        let attempts = self.settings.join_attempts;

        for attempt in 1..=attempts {
            let (version, mut roster) = self.read_roster(&path).await?;
            roster.prune_quarantine(now_ms());

            if roster.slots.len() as u32 >= self.settings.max_slots {
                warn!(%call, occupied = roster.slots.len(), "Call is full");
                return Err(SessionError::CallFull {
                    max_slots: self.settings.max_slots,
                });
            }

            let index = roster.lowest_free();
            roster.slots.insert(
                index,
                SlotRecord {
                    display_name: registration.display_name.clone(),
                    sharer: registration.sharer,
                    incarnation: incarnation.clone(),
                    joined_at: chrono::Utc::now().to_rfc3339(),
                },
            );

            let value = serde_json::to_value(&roster)?;
            match self.store.compare_and_set(&path, version, value).await {
                Ok(_) => {
                    info!(
                        %call,
                        slot = index,
                        sharer = ?registration.sharer,
                        name = %registration.display_name,
                        "Slot registered"
                    );
                    return Ok(SlotClaim {
                        call: call.clone(),
                        index,
                        incarnation,
                    });
                }
                Err(SignalingError::Conflict { current }) => {
                    debug!(%call, attempt, current, "Roster changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(%call, attempts, "Gave up registering a slot");
        Err(SessionError::MembershipConflict { attempts })
    }

    /// Remove `slot` whoever holds it. Idempotent.
    pub async fn leave(&self, call: &CallId, slot: SlotIndex) -> Result<bool, SessionError> {
        self.leave_incarnation(call, slot, None).await
    }

    /// Remove `slot` only if it is still held by `incarnation` (any holder
    /// when `None`). Screen shares owned by the slot go with it, every
    /// removed index is quarantined and gets a departure marker.
    ///
    /// Returns `false` when there was nothing to remove.
    pub async fn leave_incarnation(
        &self,
        call: &CallId,
        slot: SlotIndex,
        incarnation: Option<&str>,
    ) -> Result<bool, SessionError> {
        let path = StorePath::roster(call);
        let attempts = self.settings.join_attempts;

        for attempt in 1..=attempts {
            let (version, mut roster) = self.read_roster(&path).await?;
            let held = match (roster.get(slot), incarnation) {
                (None, _) => false,
                (Some(record), Some(expected)) => record.incarnation == expected,
                (Some(_), None) => true,
            };
            if !held {
                debug!(%call, slot, "Slot already vacated");
                return Ok(false);
            }

            let now = now_ms();
            roster.prune_quarantine(now);
            let mut departed = Vec::new();
            for index in std::iter::once(slot).chain(roster.shares_of(slot)) {
                if let Some(record) = roster.slots.remove(&index) {
                    departed.push(DepartureMarker {
                        slot: index,
                        incarnation: record.incarnation,
                    });
                }
                if !self.settings.quarantine.is_zero() {
                    let until = now + self.settings.quarantine.as_millis() as i64;
                    roster.quarantine.insert(index, until);
                }
            }

            let value = serde_json::to_value(&roster)?;
            match self.store.compare_and_set(&path, version, value).await {
                Ok(_) => {
                    let departures = StorePath::departures(call);
                    for marker in &departed {
                        if let Err(e) = publish_json(self.store.as_ref(), &departures, marker).await
                        {
                            warn!(%call, slot = marker.slot, error = %e, "Departure marker not published");
                        }
                    }
                    info!(%call, slot, removed = departed.len(), "Slot left");
                    return Ok(true);
                }
                Err(SignalingError::Conflict { current }) => {
                    debug!(%call, attempt, current, "Roster changed concurrently, retrying leave");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SessionError::MembershipConflict { attempts })
    }

    /// Current roster of `call`; empty if nobody joined yet.
    pub async fn roster(&self, call: &CallId) -> Result<Roster, SessionError> {
        let (_, roster) = self.read_roster(&StorePath::roster(call)).await?;
        Ok(roster)
    }

    /// Deliver every roster revision, starting with the current one.
    pub async fn watch(
        &self,
        call: &CallId,
        on_change: impl Fn(Roster) + Send + Sync + 'static,
    ) -> Result<Subscription, SessionError> {
        let callback: DeliveryCallback = Arc::new(move |delivery: Delivery| {
            match serde_json::from_value::<Roster>(delivery.value) {
                Ok(roster) => on_change(roster),
                Err(e) => warn!(path = %delivery.path, error = %e, "Malformed roster"),
            }
        });
        Ok(self
            .store
            .subscribe(&StorePath::roster(call), callback)
            .await?)
    }

    /// Deliver every departure marker, past and future.
    pub async fn watch_departures(
        &self,
        call: &CallId,
        on_departure: impl Fn(DepartureMarker) + Send + Sync + 'static,
    ) -> Result<Subscription, SessionError> {
        let callback: DeliveryCallback = Arc::new(move |delivery: Delivery| {
            match serde_json::from_value::<DepartureMarker>(delivery.value) {
                Ok(marker) => on_departure(marker),
                Err(e) => warn!(path = %delivery.path, error = %e, "Malformed departure marker"),
            }
        });
        Ok(self
            .store
            .subscribe(&StorePath::departures(call), callback)
            .await?)
    }

    async fn read_roster(&self, path: &StorePath) -> Result<(u64, Roster), SessionError> {
        match self.store.read(path).await? {
            Some(entry) => Ok((entry.version, serde_json::from_value(entry.value)?)),
            None => Ok((0, Roster::default())),
        }
    }
}
