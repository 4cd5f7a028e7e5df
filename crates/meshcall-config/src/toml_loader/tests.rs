//! Tests for TOML config loading, creation, and path resolution.

use super::loader::resolve_config_path;
use super::*;
use std::path::{Path, PathBuf};

#[test]
fn load_from_nonexistent_returns_file_not_found() {
    let result = load_from_path(Path::new("/tmp/nonexistent_meshcall_config.toml"));
    let err = result.unwrap_err();
    assert!(matches!(err, meshcall_common::ConfigError::FileNotFound(_)));
}

#[test]
fn load_valid_partial_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r##"
[negotiation]
disconnect_grace_ms = 3000

[signaling]
url = "ws://relay.example:9000"
"##,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.negotiation.disconnect_grace_ms, 3000);
    assert_eq!(config.signaling.url, "ws://relay.example:9000");
    // Defaults preserved
    assert_eq!(config.negotiation.negotiation_timeout_ms, 20_000);
    assert_eq!(config.membership.max_slots, 8);
}

#[test]
fn load_invalid_toml_returns_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is not valid toml {{{").unwrap();

    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, meshcall_common::ConfigError::ParseError(_)));
}

#[test]
fn load_config_with_invalid_values_is_returned_as_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[membership]
max_slots = 1
"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.membership.max_slots, 1);
}

#[test]
fn create_and_load_default_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meshcall").join("config.toml");

    create_default_config(&path).unwrap();
    assert!(path.exists());

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.membership.max_slots, 8);
    assert_eq!(config.ice.servers[0].urls.len(), 2);
}

#[test]
fn default_template_is_valid_toml() {
    let content = super::template::default_config_toml();
    let parsed: Result<crate::schema::MeshcallConfig, _> = toml::from_str(&content);
    assert!(parsed.is_ok(), "template failed to parse: {parsed:?}");
}

#[test]
fn default_config_path_ends_with_meshcall() {
    let path = resolve_config_path(None, dirs::config_dir()).unwrap();
    assert!(path.ends_with("meshcall/config.toml"));
}

#[test]
fn explicit_config_path_wins() {
    let path = resolve_config_path(
        Some(PathBuf::from("/etc/meshcall/relay.toml")),
        Some(PathBuf::from("/home/ada/.config")),
    )
    .unwrap();
    assert_eq!(path, PathBuf::from("/etc/meshcall/relay.toml"));
}

#[test]
fn empty_override_falls_back_to_config_dir() {
    let path = resolve_config_path(
        Some(PathBuf::new()),
        Some(PathBuf::from("/home/ada/.config")),
    )
    .unwrap();
    assert_eq!(path, PathBuf::from("/home/ada/.config/meshcall/config.toml"));
    assert!(resolve_config_path(None, None).is_err());
}

#[test]
fn create_default_config_keeps_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[relay]\nport = 9000\n").unwrap();

    create_default_config(&path).unwrap();
    let config = load_from_path(&path).unwrap();
    assert_eq!(config.relay.port, 9000);
}
