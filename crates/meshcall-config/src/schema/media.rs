//! ICE servers and local media defaults.

use serde::{Deserialize, Serialize};

/// One STUN/TURN server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// ICE configuration handed to every peer connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<IceServerConfig>,
    /// Candidate pool size hint for the engine.
    pub candidate_pool_size: u32,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![IceServerConfig {
                urls: vec![
                    "stun:stun1.l.google.com:19302".into(),
                    "stun:stun2.l.google.com:19302".into(),
                ],
                username: None,
                credential: None,
            }],
            candidate_pool_size: 10,
        }
    }
}

/// Initial state of local capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub start_with_mic: bool,
    pub start_with_camera: bool,
    /// Label of the placeholder video shown while the camera is off.
    pub placeholder_label: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            start_with_mic: true,
            start_with_camera: true,
            placeholder_label: "camera-disabled".into(),
        }
    }
}
