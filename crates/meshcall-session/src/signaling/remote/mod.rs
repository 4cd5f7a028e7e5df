//! Signaling store client for a `meshcall-relay` server.
//!
//! Speaks the JSON frames in [`super::wire`] over `tokio-tungstenite`.
//! Handles heartbeats, request/reply correlation, auto-reconnect with
//! backoff, and resubscription that resumes after the last delivered
//! sequence number of every subscription.

mod client;
mod connection;
mod types;

pub use client::RemoteStore;
pub use types::RemoteStoreConfig;
