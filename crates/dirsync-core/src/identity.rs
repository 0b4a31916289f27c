//! Identity model shared by the connector and engine crates.
//!
//! An [`Identity`] is the durable record owned by the identity store. A
//! [`CandidateIdentity`] is the transient, mapped form of one directory entry
//! that lives only for the duration of a sync pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ids::IdentityId;

/// Free-form attributes carried alongside the core identity fields.
pub type AttributeBag = BTreeMap<String, serde_json::Value>;

/// Account status of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    /// The account can authenticate.
    #[default]
    Active,
    /// Disabled, either in the source directory or because it disappeared from it.
    Inactive,
    /// Locked out.
    Locked,
    /// Waiting for the owner to verify contact details.
    PendingVerification,
}

impl IdentityStatus {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Inactive => "inactive",
            IdentityStatus::Locked => "locked",
            IdentityStatus::PendingVerification => "pending_verification",
        }
    }
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IdentityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(IdentityStatus::Active),
            "inactive" | "disabled" => Ok(IdentityStatus::Inactive),
            "locked" => Ok(IdentityStatus::Locked),
            "pending_verification" => Ok(IdentityStatus::PendingVerification),
            _ => Err(format!("Unknown identity status: {s}")),
        }
    }
}

/// How a remote record is reconciled with an identity that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The directory is authoritative for every synchronized field.
    #[default]
    RemoteWins,
    /// Local values are kept; the remote record is only noted in history.
    LocalWins,
    /// Fields empty on the local side are filled from the remote record.
    Merge,
}

impl ConflictStrategy {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::RemoteWins => "remote_wins",
            ConflictStrategy::LocalWins => "local_wins",
            ConflictStrategy::Merge => "merge",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote_wins" | "remote" => Ok(ConflictStrategy::RemoteWins),
            "local_wins" | "local" => Ok(ConflictStrategy::LocalWins),
            "merge" => Ok(ConflictStrategy::Merge),
            _ => Err(format!("Unknown conflict strategy: {s}")),
        }
    }
}

/// One entry of an identity's append-only merge history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// When the merge was resolved.
    pub merged_at: DateTime<Utc>,
    /// Strategy that produced the result.
    pub strategy: ConflictStrategy,
    /// External identifiers of the records that took part.
    pub source_ids: Vec<String>,
}

impl MergeRecord {
    pub fn new(merged_at: DateTime<Utc>, strategy: ConflictStrategy, source_ids: Vec<String>) -> Self {
        Self {
            merged_at,
            strategy,
            source_ids,
        }
    }
}

/// A directory entry after schema mapping, before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateIdentity {
    /// External identifier of the record this candidate came from.
    pub external_id: String,
    /// Directory source the record was read from.
    pub source_id: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub attributes: AttributeBag,
    /// Status derived from account control flags or lifecycle rules, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IdentityStatus>,
    /// External identifiers of other records collapsed into this candidate.
    #[serde(default)]
    pub merged_from: Vec<String>,
    #[serde(default)]
    pub merge_history: Vec<MergeRecord>,
}

impl CandidateIdentity {
    /// Create an empty candidate linked to a source record.
    pub fn new(source_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            source_id: source_id.into(),
            username: String::new(),
            email: String::new(),
            phone: String::new(),
            attributes: AttributeBag::new(),
            status: None,
            merged_from: Vec::new(),
            merge_history: Vec::new(),
        }
    }

    /// All external identifiers this candidate represents, its own first.
    pub fn external_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.external_id.as_str()).chain(self.merged_from.iter().map(String::as_str))
    }
}

/// Identity record owned by the identity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub status: IdentityStatus,
    #[serde(default)]
    pub attributes: AttributeBag,
    /// External identifier in the directory this identity is linked to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Directory source this identity is linked to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Never read or written by synchronization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub merge_history: Vec<MergeRecord>,
}

impl Identity {
    /// Build a new identity from a candidate that matched nothing in the store.
    ///
    /// The status defaults to active unless the candidate carries one.
    pub fn from_candidate(candidate: CandidateIdentity, at: DateTime<Utc>) -> Self {
        Self {
            id: IdentityId::new(),
            username: candidate.username,
            email: candidate.email,
            phone: candidate.phone,
            status: candidate.status.unwrap_or_default(),
            attributes: candidate.attributes,
            external_id: Some(candidate.external_id),
            source_id: Some(candidate.source_id),
            credential_hash: None,
            created_at: at,
            updated_at: at,
            merge_history: candidate.merge_history,
        }
    }

    /// Whether this identity is linked to the given directory source.
    pub fn is_linked_to(&self, source_id: &str) -> bool {
        self.source_id.as_deref() == Some(source_id)
    }

    /// Compare the synchronized profile of two identities.
    ///
    /// Timestamps, credentials and merge history are ignored.
    pub fn same_profile(&self, other: &Identity) -> bool {
        self.username == other.username
            && self.email == other.email
            && self.phone == other.phone
            && self.status == other.status
            && self.attributes == other.attributes
            && self.external_id == other.external_id
            && self.source_id == other.source_id
    }
}
