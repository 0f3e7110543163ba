//! Node identity generation.
//!
//! A [`NodeId`] is minted once per process from several entropy sources
//! hashed together, and never changes afterwards. It is the key peers use to
//! recognise each other across address changes.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the digest
pub const NODE_ID_LEN: usize = 16;

/// Stable identifier of one running node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generate a fresh identifier.
    ///
    /// Hashes 256 random bits, the wall clock and 16 OS-random bytes, then
    /// keeps the first [`NODE_ID_LEN`] hex characters of the SHA-256 digest.
    pub fn generate() -> Self {
        let mut random_bits = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut random_bits);

        let mut os_bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut os_bytes);

        let now = chrono::Utc::now();
        let seed = format!(
            "{}-{}.{:09}-{}",
            hex::encode(random_bits),
            now.timestamp(),
            now.timestamp_subsec_nanos(),
            hex::encode(os_bytes)
        );

        let digest = Sha256::digest(seed.as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(NODE_ID_LEN);
        Self(id)
    }

    /// Wrap an identifier received from the wire or loaded from storage
    pub fn from_string<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Default human-readable name, `Node_` plus the first 8 characters
    pub fn display_name(&self) -> String {
        default_display_name(&self.0)
    }
}

/// `Node_{first 8 chars}` for any peer id, however short
pub fn default_display_name(node_id: &str) -> String {
    let short: String = node_id.chars().take(8).collect();
    format!("Node_{short}")
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
