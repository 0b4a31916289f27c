//! Persistence seams used by the orchestrator.
//!
//! The engine never owns identities or sync state. It reads and writes them
//! through [`IdentityStore`] and [`SyncStateStore`]; [`memory`] provides
//! in-process implementations.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use dirsync_core::Identity;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint was violated.
    #[error("Duplicate {field}: {value}")]
    Conflict { field: &'static str, value: String },

    /// The backing store cannot be reached.
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    /// Any other backend failure.
    #[error("Store operation failed: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a backend error with source.
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Offset pagination for [`IdentityStore::list_users`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Pagination {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// The page following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

/// Identity persistence.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn create_user(&self, identity: Identity) -> StoreResult<Identity>;

    async fn update_user(&self, identity: Identity) -> StoreResult<Identity>;

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<Identity>>;

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<Identity>>;

    /// Find the identity linked to an external record of a source.
    async fn get_user_by_external_id(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> StoreResult<Option<Identity>>;

    /// Insert or replace identities by id in a single call.
    ///
    /// Returns the number of identities written.
    async fn upsert_batch(&self, identities: Vec<Identity>) -> StoreResult<usize>;

    /// List identities in a stable order.
    async fn list_users(&self, page: Pagination) -> StoreResult<Vec<Identity>>;
}

/// Status of the most recent run for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl SyncRunStatus {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Idle => "idle",
            SyncRunStatus::Running => "running",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted progress of full syncs for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub source_id: String,
    /// Completion time of the last successful full sync.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Records processed by the current or most recent run.
    pub records_processed: u64,
    pub status: SyncRunStatus,
    pub last_error: Option<String>,
}

impl SyncState {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            last_sync_at: None,
            records_processed: 0,
            status: SyncRunStatus::Idle,
            last_error: None,
        }
    }
}

/// Sync-state persistence. Every operation is an idempotent upsert.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get_last_sync_state(&self, source_id: &str) -> StoreResult<Option<SyncState>>;

    /// Record that a run started; resets progress and the last error.
    async fn mark_started(&self, source_id: &str, at: DateTime<Utc>) -> StoreResult<()>;

    async fn update_progress(&self, source_id: &str, records_processed: u64) -> StoreResult<()>;

    async fn mark_completed(
        &self,
        source_id: &str,
        at: DateTime<Utc>,
        records_processed: u64,
    ) -> StoreResult<()>;

    /// Record a failed run, keeping the progress reached so far.
    async fn mark_failed(&self, source_id: &str, error: &str) -> StoreResult<()>;
}
