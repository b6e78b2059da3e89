//! ABOUTME: Foundational identifier types for rs-floe
//! ABOUTME: Provides BlueprintId (content-addressed) and RunId

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Content-addressed identity of a blueprint.
///
/// The id is the SHA-256 digest of the blueprint's normalized JSON,
/// truncated to 128 bits and hex-encoded. Two blueprints with identical
/// normalized content share an id; any content change produces a new one.
///
/// # Examples
///
/// ```
/// use floe_core::BlueprintId;
///
/// let a = BlueprintId::from_content(b"{\"nodes\":[]}");
/// let b = BlueprintId::from_content(b"{\"nodes\":[]}");
/// let c = BlueprintId::from_content(b"{\"nodes\":[1]}");
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// assert_eq!(a.as_str().len(), 32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlueprintId(String);

impl BlueprintId {
    /// Hash normalized content into an id.
    pub fn from_content(content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        let mut hex = String::with_capacity(32);
        for byte in &digest[..16] {
            use fmt::Write;
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlueprintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
