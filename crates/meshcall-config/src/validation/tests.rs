//! Tests for the full validation pipeline.

use super::*;
use crate::schema::*;

#[test]
fn default_config_validates() {
    let config = MeshcallConfig::default();
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_max_slots_too_small() {
    let mut config = MeshcallConfig::default();
    config.membership.max_slots = 1;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("membership.max_slots"));
}

#[test]
fn catches_zero_join_attempts() {
    let mut config = MeshcallConfig::default();
    config.membership.join_attempts = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("membership.join_attempts"));
}

#[test]
fn catches_negotiation_timeout_too_short() {
    let mut config = MeshcallConfig::default();
    config.negotiation.negotiation_timeout_ms = 10;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("negotiation.negotiation_timeout_ms"));
}

#[test]
fn zero_grace_is_allowed() {
    let mut config = MeshcallConfig::default();
    config.negotiation.disconnect_grace_ms = 0;
    config.membership.quarantine_ms = 0;
    config.shutdown.background_leave_after_secs = 0;
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_bad_signaling_url() {
    let mut config = MeshcallConfig::default();
    config.signaling.url = "http://relay.example".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("signaling.url"));
}

#[test]
fn catches_reconnect_delay_above_max() {
    let mut config = MeshcallConfig::default();
    config.signaling.reconnect_delay_secs = 60;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("signaling.reconnect_delay_secs"));
}

#[test]
fn catches_unknown_ice_scheme() {
    let mut config = MeshcallConfig::default();
    config.ice.servers.push(IceServerConfig {
        urls: vec!["http://stun.example".into()],
        username: None,
        credential: None,
    });
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("unknown scheme"));
}

#[test]
fn turn_without_credentials_is_rejected() {
    let mut config = MeshcallConfig::default();
    config.ice.servers.push(IceServerConfig {
        urls: vec!["turn:turn.example:3478".into()],
        username: Some("u".into()),
        credential: None,
    });
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("requires username and credential"));
}

#[test]
fn catches_privileged_relay_port() {
    let mut config = MeshcallConfig::default();
    config.relay.port = 80;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("relay.port"));
}

#[test]
fn collects_multiple_errors() {
    let mut config = MeshcallConfig::default();
    config.membership.max_slots = 0;
    config.negotiation.publish_attempts = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("membership.max_slots"));
    assert!(err.contains("negotiation.publish_attempts"));
    assert!(err.contains("; "));
}
