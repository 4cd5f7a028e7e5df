use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use meshcall_common::{CallId, SessionError, SignalingError};

use super::*;
use crate::protocol::{DepartureMarker, Roster, StorePath};
use crate::settings::{MembershipSettings, SessionSettings};
use crate::signaling::{
    DeliveryCallback, MemoryStore, SignalingStore, Subscription, Versioned,
};

fn call() -> CallId {
    CallId::parse("ROSTER").unwrap()
}

fn settings() -> MembershipSettings {
    SessionSettings::default().membership
}

fn membership(store: &MemoryStore, settings: MembershipSettings) -> SessionMembership {
    SessionMembership::new(Arc::new(store.clone()), settings)
}

fn departures(store: &MemoryStore) -> Vec<DepartureMarker> {
    store
        .history(&StorePath::departures(&call()))
        .into_iter()
        .map(|d| serde_json::from_value(d.value).unwrap())
        .collect()
}

/// Store that lets another writer win the next `conflicts` roster updates.
struct ContendedStore {
    inner: MemoryStore,
    conflicts: AtomicUsize,
}

#[async_trait]
impl SignalingStore for ContendedStore {
    async fn publish(&self, path: &StorePath, value: Value) -> Result<u64, SignalingError> {
        self.inner.publish(path, value).await
    }

    async fn subscribe(
        &self,
        path: &StorePath,
        callback: DeliveryCallback,
    ) -> Result<Subscription, SignalingError> {
        self.inner.subscribe(path, callback).await
    }

    async fn read(&self, path: &StorePath) -> Result<Option<Versioned>, SignalingError> {
        self.inner.read(path).await
    }

    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected: u64,
        value: Value,
    ) -> Result<u64, SignalingError> {
        let remaining = self.conflicts.load(Ordering::Acquire);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::Release);
            let current = self.inner.read_now(path);
            let version = current.as_ref().map(|v| v.version).unwrap_or(0);
            let rival = current
                .map(|v| v.value)
                .unwrap_or_else(|| serde_json::to_value(Roster::default()).unwrap());
            self.inner.compare_and_set_now(path, version, rival)?;
        }
        self.inner.compare_and_set(path, expected, value).await
    }

    async fn clear(&self, path: &StorePath) -> Result<(), SignalingError> {
        self.inner.clear(path).await
    }
}

#[tokio::test]
async fn joins_take_the_lowest_free_index() {
    let store = MemoryStore::new();
    let members = membership(&store, settings());

    let a = members.join(&call(), "ada").await.unwrap();
    let b = members.join(&call(), "bob").await.unwrap();
    let c = members.join(&call(), "cy").await.unwrap();

    assert_eq!((a.index, b.index, c.index), (0, 1, 2));
    assert_ne!(a.incarnation, b.incarnation);

    let roster = members.roster(&call()).await.unwrap();
    assert_eq!(roster.occupied(), vec![0, 1, 2]);
    assert_eq!(roster.get(1).unwrap().display_name, "bob");
    assert!(roster.holds(2, &c.incarnation));
}

#[tokio::test]
async fn departed_index_is_quarantined() {
    let store = MemoryStore::new();
    let members = membership(&store, settings());
    members.join(&call(), "ada").await.unwrap();
    members.join(&call(), "bob").await.unwrap();

    assert!(members.leave(&call(), 0).await.unwrap());
    let next = members.join(&call(), "cy").await.unwrap();

    assert_eq!(next.index, 2);
    let roster = members.roster(&call()).await.unwrap();
    assert!(roster.quarantine.contains_key(&0));
}

#[tokio::test]
async fn zero_quarantine_reuses_index_with_new_incarnation() {
    let store = MemoryStore::new();
    let members = membership(
        &store,
        MembershipSettings {
            quarantine: Duration::ZERO,
            ..settings()
        },
    );
    let first = members.join(&call(), "ada").await.unwrap();
    members.leave(&call(), first.index).await.unwrap();

    let again = members.join(&call(), "ada").await.unwrap();
    assert_eq!(again.index, first.index);
    assert_ne!(again.incarnation, first.incarnation);
}

#[tokio::test]
async fn leave_is_idempotent() {
    let store = MemoryStore::new();
    let members = membership(&store, settings());
    members.join(&call(), "ada").await.unwrap();
    let bob = members.join(&call(), "bob").await.unwrap();

    assert!(members.leave(&call(), 1).await.unwrap());
    assert!(!members.leave(&call(), 1).await.unwrap());

    let markers = departures(&store);
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].slot, 1);
    assert_eq!(markers[0].incarnation, bob.incarnation);
    assert_eq!(members.roster(&call()).await.unwrap().occupied(), vec![0]);
}

#[tokio::test]
async fn leave_of_a_previous_incarnation_is_ignored() {
    let store = MemoryStore::new();
    let members = membership(&store, settings());
    let ada = members.join(&call(), "ada").await.unwrap();

    let removed = members
        .leave_incarnation(&call(), ada.index, Some("someone-else"))
        .await
        .unwrap();
    assert!(!removed);
    assert!(members
        .roster(&call())
        .await
        .unwrap()
        .holds(ada.index, &ada.incarnation));

    let removed = members
        .leave_incarnation(&call(), ada.index, Some(ada.incarnation.as_str()))
        .await
        .unwrap();
    assert!(removed);
}

#[tokio::test]
async fn leaving_sharer_takes_its_screen_share_along() {
    let store = MemoryStore::new();
    let members = membership(&store, settings());
    members.join(&call(), "ada").await.unwrap();
    let bob = members.join(&call(), "bob").await.unwrap();
    let share = members
        .register(&call(), Registration::screen_share("bob", bob.index))
        .await
        .unwrap();

    let roster = members.roster(&call()).await.unwrap();
    assert_eq!(share.index, 2);
    assert_eq!(roster.get(2).unwrap().display_name, "bob's screen");
    assert_eq!(roster.shares_of(1), vec![2]);

    members.leave(&call(), bob.index).await.unwrap();
    assert_eq!(members.roster(&call()).await.unwrap().occupied(), vec![0]);
    let slots: Vec<_> = departures(&store).iter().map(|m| m.slot).collect();
    assert_eq!(slots, vec![1, 2]);
}

#[tokio::test]
async fn full_call_rejects_joiners() {
    let store = MemoryStore::new();
    let members = membership(
        &store,
        MembershipSettings {
            max_slots: 2,
            ..settings()
        },
    );
    members.join(&call(), "ada").await.unwrap();
    members.join(&call(), "bob").await.unwrap();

    let err = members.join(&call(), "cy").await.unwrap_err();
    assert!(matches!(err, SessionError::CallFull { max_slots: 2 }));
}

#[tokio::test]
async fn conflicts_are_retried() {
    let store = ContendedStore {
        inner: MemoryStore::new(),
        conflicts: AtomicUsize::new(3),
    };
    let members = SessionMembership::new(Arc::new(store), settings());

    let claim = members.join(&call(), "ada").await.unwrap();
    assert_eq!(claim.index, 0);
}

#[tokio::test]
async fn persistent_conflicts_exhaust_the_budget() {
    let store = ContendedStore {
        inner: MemoryStore::new(),
        conflicts: AtomicUsize::new(usize::MAX),
    };
    let members = SessionMembership::new(
        Arc::new(store),
        MembershipSettings {
            join_attempts: 4,
            ..settings()
        },
    );

    let err = members.join(&call(), "ada").await.unwrap_err();
    assert!(matches!(err, SessionError::MembershipConflict { attempts: 4 }));
}

#[tokio::test]
async fn watchers_see_current_and_later_rosters() {
    let store = MemoryStore::new();
    let members = membership(&store, settings());
    members.join(&call(), "ada").await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = members
        .watch(&call(), move |roster| {
            sink.lock().unwrap().push(roster.occupied())
        })
        .await
        .unwrap();

    members.join(&call(), "bob").await.unwrap();
    members.leave(&call(), 0).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec![0], vec![0, 1], vec![1]]
    );
}

#[tokio::test]
async fn departure_watchers_receive_markers() {
    let store = MemoryStore::new();
    let members = membership(&store, settings());
    let ada = members.join(&call(), "ada").await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = members
        .watch_departures(&call(), move |marker| sink.lock().unwrap().push(marker))
        .await
        .unwrap();

    members.leave(&call(), ada.index).await.unwrap();
    sub.unsubscribe();
    members.join(&call(), "bob").await.unwrap();
    members.leave(&call(), 1).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].incarnation, ada.incarnation);
}
