use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hlc::Hlc;

const OVN_CONTEXT: &str = "airspace 2024-01-01 opaque version number v1";

/// Opaque version token fencing concurrent writers.
///
/// Derived from the server-assigned `updated_at` and the entity id; never
/// stored. Callers echo it back unchanged on their next update.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ovn(String);

impl Ovn {
    pub fn derive(updated_at: Hlc, id: &[u8; 16]) -> Self {
        Self(digest(updated_at, id).to_hex().to_string())
    }

    /// Wrap a caller-presented token without checking it.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, updated_at: Hlc, id: &[u8; 16]) -> bool {
        validate(&self.0, updated_at, id)
    }
}

impl fmt::Debug for Ovn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.0.get(..12).unwrap_or(&self.0);
        write!(f, "Ovn({prefix})")
    }
}

impl fmt::Display for Ovn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digest(updated_at: Hlc, id: &[u8; 16]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new_derive_key(OVN_CONTEXT);
    hasher.update(&updated_at.to_bytes());
    hasher.update(id);
    hasher.finalize()
}

/// True when `token` is the current version token of the row. A token that
/// does not decode is a mismatch, not an error.
pub fn validate(token: &str, updated_at: Hlc, id: &[u8; 16]) -> bool {
    match blake3::Hash::from_hex(token) {
        Ok(presented) => presented == digest(updated_at, id),
        Err(_) => false,
    }
}
