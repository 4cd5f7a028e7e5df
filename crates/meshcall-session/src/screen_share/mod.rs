//! Screen sharing as a short-lived extra participant.
//!
//! Starting a share registers a new slot tagged with the sharer and runs a
//! second mesh from it, so every other real participant receives the screen
//! over a link of its own. The share ends when the owner stops it or the
//! capture source ends on its own, whichever comes first.

mod manager;


pub use manager::ScreenShareManager;
