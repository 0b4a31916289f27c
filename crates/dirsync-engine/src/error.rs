//! Sync error types.

use std::fmt;
use thiserror::Error;

use dirsync_connector::ConnectorError;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Pipeline stage an error is attributed to.
///
/// Used as the `stage` label on error metrics and the `stage` field in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStage {
    Connect,
    Search,
    Mapping,
    Lookup,
    Upsert,
    Reconcile,
    StateUpdate,
    Listen,
    Apply,
}

impl SyncStage {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::Connect => "connect",
            SyncStage::Search => "search",
            SyncStage::Mapping => "mapping",
            SyncStage::Lookup => "lookup",
            SyncStage::Upsert => "upsert",
            SyncStage::Reconcile => "reconcile",
            SyncStage::StateUpdate => "state_update",
            SyncStage::Listen => "listen",
            SyncStage::Apply => "apply",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single directory record could not be mapped.
///
/// Only the offending record is skipped; the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// A required field had no value in the primary or fallback attribute.
    #[error("record {record_id}: required field '{field}' has no value (attribute '{attribute}')")]
    MissingRequiredField {
        record_id: String,
        field: String,
        attribute: String,
    },

    /// The record cannot be linked back to the directory.
    #[error("record {dn}: {message}")]
    InvalidRecord { dn: String, message: String },

    /// An unmapped attribute has the same name as a mapped attribute-bag key.
    #[error("record {record_id}: attribute '{key}' collides with a mapped field of the same name")]
    AttributeCollision { record_id: String, key: String },
}

/// Errors that can occur during synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Directory access failed.
    #[error("Connector error during {stage}: {source}")]
    Connector {
        stage: SyncStage,
        #[source]
        source: ConnectorError,
    },

    /// Mapping error.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Identity or sync-state persistence failed.
    #[error("Store error during {stage}: {source}")]
    Store {
        stage: SyncStage,
        #[source]
        source: StoreError,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The run was cancelled before it completed.
    #[error("Sync cancelled")]
    Cancelled,

    /// The change stream terminated.
    #[error("Change stream ended: {source}")]
    StreamEnded {
        #[source]
        source: ConnectorError,
    },

    /// Invalid state transition.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl SyncError {
    /// Create a connector error attributed to a stage.
    pub fn connector(stage: SyncStage, source: ConnectorError) -> Self {
        Self::Connector { stage, source }
    }

    /// Create a store error attributed to a stage.
    pub fn store(stage: SyncStage, source: StoreError) -> Self {
        Self::Store { stage, source }
    }

    /// Create an invalid state transition error.
    pub fn invalid_state_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Check if a fresh run has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connector { source, .. } | Self::StreamEnded { source } => source.is_transient(),
            Self::Store { .. } => true,
            Self::Mapping(_)
            | Self::Configuration(_)
            | Self::Cancelled
            | Self::InvalidStateTransition { .. } => false,
        }
    }

    /// Stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<SyncStage> {
        match self {
            Self::Connector { stage, .. } | Self::Store { stage, .. } => Some(*stage),
            Self::Mapping(_) => Some(SyncStage::Mapping),
            Self::StreamEnded { .. } => Some(SyncStage::Listen),
            Self::Configuration(_) | Self::Cancelled | Self::InvalidStateTransition { .. } => None,
        }
    }

    /// Check if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
