//! Slot assignment and the roster document of a call.
//!
//! The roster is the single source of truth for who is in a call. Every
//! change is a read-modify-compare-and-set on the whole document, retried
//! on conflict within a bounded budget.

mod manager;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

use meshcall_common::{CallId, SlotIndex};

pub use manager::SessionMembership;

/// What a new occupant registers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub display_name: String,
    /// Owning participant when registering a screen share.
    pub sharer: Option<SlotIndex>,
}

impl Registration {
    pub fn participant(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            sharer: None,
        }
    }

    pub fn screen_share(sharer_name: &str, sharer: SlotIndex) -> Self {
        Self {
            display_name: format!("{sharer_name}'s screen"),
            sharer: Some(sharer),
        }
    }
}

/// A slot held by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotClaim {
    pub call: CallId,
    pub index: SlotIndex,
    pub incarnation: String,
}
