//! Per-pair state machine driving one direct media link.
//!
//! The lower slot index initiates (offers), the higher one responds, so two
//! peers never offer to each other at the same time. Each side reads only
//! the paths its counterpart authors and writes only its own.

mod machine;
mod types;


pub use machine::PeerLinkNegotiator;
pub use types::{LinkContext, LinkState, Role, SignalSink, TickOutcome};
