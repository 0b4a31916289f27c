//! Run statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::resolver::DeferredConflict;

/// Statistics of one full sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FullSyncReport {
    pub source_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Pages fetched from the directory.
    pub pages: usize,
    /// Records fetched, including those that failed mapping.
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    /// Existing identities whose profile did not change.
    pub unchanged: usize,
    /// Identities deactivated because they disappeared from the directory.
    pub deactivated: usize,
    pub mapping_failures: usize,
    /// Candidates collapsed into another one by deduplication.
    pub duplicates_merged: usize,
    pub deferred: Vec<DeferredConflict>,
    pub duration: Duration,
}

impl FullSyncReport {
    pub fn new(source_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            started_at: Some(started_at),
            ..Self::default()
        }
    }

    /// Number of identity writes the run performed.
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deactivated
    }
}

/// Statistics of one incremental listener session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IncrementalSummary {
    pub source_id: String,
    /// Change notifications received.
    pub received: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records that failed mapping or persistence.
    pub failed: usize,
    pub deferred: Vec<DeferredConflict>,
}

impl IncrementalSummary {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Self::default()
        }
    }
}
