//! Identity identifier.
//!
//! A UUID newtype so store keys cannot be confused with other UUIDs.
//!
//! # Example
//!
//! ```
//! use dirsync_core::IdentityId;
//!
//! let id = IdentityId::new();
//! let parsed: IdentityId = id.to_string().parse().unwrap();
//! assert_eq!(id, parsed);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when an identity id is not a valid UUID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to parse IdentityId: {message}")]
pub struct ParseIdError {
    pub message: String,
}

/// Identifier of an identity in the internal identity store.
///
/// Assigned once when the identity is created and never changed by
/// synchronization, regardless of the conflict strategy in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(Uuid);

impl IdentityId {
    /// Creates a new random ID using UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for IdentityId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for IdentityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IdentityId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self).map_err(|e| ParseIdError {
            message: e.to_string(),
        })
    }
}
