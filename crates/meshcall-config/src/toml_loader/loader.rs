//! Core TOML config loading: read from path or platform default.

use crate::schema::MeshcallConfig;
use crate::validation;
use meshcall_common::ConfigError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::template::default_config_toml;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "MESHCALL_CONFIG";

/// Load config from a specific TOML file path.
///
/// Missing fields take their defaults. Validation failures are logged and
/// the parsed config is returned as-is; callers that need a hard failure
/// run [`validation::validate`] themselves.
pub fn load_from_path(path: &Path) -> Result<MeshcallConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.to_path_buf())
        } else {
            ConfigError::ParseError(format!("failed to read {}: {e}", path.display()))
        }
    })?;

    let config: MeshcallConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    if let Err(e) = validation::validate(&config) {
        warn!("config validation warning: {e}");
    }

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Where [`load_default`] looks: `$MESHCALL_CONFIG` when set, otherwise
/// `meshcall/config.toml` under the platform config directory.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    resolve_config_path(
        std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from),
        dirs::config_dir(),
    )
}

pub(crate) fn resolve_config_path(
    explicit: Option<PathBuf>,
    config_dir: Option<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    match (explicit, config_dir) {
        (Some(path), _) if !path.as_os_str().is_empty() => Ok(path),
        (_, Some(dir)) => Ok(dir.join("meshcall").join("config.toml")),
        _ => Err(ConfigError::ParseError(format!(
            "no config directory on this platform; set {CONFIG_PATH_ENV}"
        ))),
    }
}

/// Write the commented template to `path`, creating parent directories.
///
/// An existing file is left untouched, so a relay and a client starting
/// together cannot clobber each other's config.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    let write_err = |what: &str, target: &Path, e: std::io::Error| {
        ConfigError::ParseError(format!("failed to {what} {}: {e}", target.display()))
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err("create", parent, e))?;
    }
    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(()),
        Err(e) => return Err(write_err("create", path, e)),
    };
    file.write_all(default_config_toml().as_bytes())
        .map_err(|e| write_err("write", path, e))?;

    info!("created default config at {}", path.display());
    Ok(())
}

/// Load config from the platform-specific default path.
///
/// On macOS: `~/Library/Application Support/meshcall/config.toml`
/// On Linux: `~/.config/meshcall/config.toml`
/// `$MESHCALL_CONFIG` overrides both.
///
/// If the file does not exist, creates a default config file and returns defaults.
pub fn load_default() -> Result<MeshcallConfig, ConfigError> {
    let path = default_config_path()?;

    match load_from_path(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(_)) => {
            info!("no config found at {}, creating default", path.display());
            create_default_config(&path)?;
            Ok(MeshcallConfig::default())
        }
        Err(e) => Err(e),
    }
}
