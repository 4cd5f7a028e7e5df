use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters used for generated call ids (no 0/O or 1/I look-alikes).
const CALL_ID_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CALL_ID_LEN: usize = 8;
const CALL_ID_MAX_LEN: usize = 32;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn new_correlation_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3]
    )
}

/// Short, human-shareable identifier of a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Generate a fresh id. 32^8 ids keeps collisions inside one store
    /// namespace negligible.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id: String = (0..CALL_ID_LEN)
            .map(|_| CALL_ID_ALPHABET[rng.gen_range(0..CALL_ID_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// Validate a user-supplied id (e.g. pasted from an invite link).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid_len = (4..=CALL_ID_MAX_LEN).contains(&raw.len());
        let valid_chars = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        (valid_len && valid_chars).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shareable link that joins this call when opened.
    pub fn invite_link(&self, base_url: &str) -> String {
        let sep = if base_url.contains('?') { '&' } else { '?' };
        format!("{base_url}{sep}id={}", self.0)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
