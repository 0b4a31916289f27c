//! Sync orchestration.
//!
//! [`SyncOrchestrator`] drives both sync algorithms for one directory source:
//!
//! - **Full sync** ([`SyncOrchestrator::run_full_sync`]) pages through every
//!   matching entry, persists changes one page at a time and finally
//!   deactivates identities that are no longer present in the directory.
//! - **Incremental sync** ([`SyncOrchestrator::run_incremental`]) applies
//!   change notifications one record at a time until the stream ends or the
//!   run is cancelled.
//!
//! ## Full sync states
//!
//! ```text
//! Idle ──► Paging ──► Processing ──► Upserting ──┬──► ReconcilingAbsent ──► Completed
//!            ▲                                   │
//!            └───────────── next page ◄──────────┘
//!
//! (any non-terminal state) ──► Failed
//! ```

mod full;
mod incremental;
pub mod report;

pub use report::{FullSyncReport, IncrementalSummary};

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use dirsync_connector::{DirectoryConnector, ExternalRecord};
use dirsync_connector_ldap::LdapConnector;
use dirsync_core::{CandidateIdentity, ConflictStrategy, Identity};

use crate::config::{ConfigError, SyncEngineConfig};
use crate::dedup::Deduplicator;
use crate::error::{MappingError, SyncError, SyncResult, SyncStage};
use crate::lifecycle::LifecycleRules;
use crate::mapper::SchemaMapper;
use crate::metrics::SyncMetrics;
use crate::resolver::{ConflictResolver, DeferredConflict, Resolution, Resolvable};
use crate::store::{IdentityStore, SyncState, SyncStateStore};

/// State of a full sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FullSyncState {
    Idle,
    Paging,
    Processing,
    Upserting,
    ReconcilingAbsent,
    Completed,
    Failed,
}

impl FullSyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FullSyncState::Idle => "idle",
            FullSyncState::Paging => "paging",
            FullSyncState::Processing => "processing",
            FullSyncState::Upserting => "upserting",
            FullSyncState::ReconcilingAbsent => "reconciling_absent",
            FullSyncState::Completed => "completed",
            FullSyncState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FullSyncState::Completed | FullSyncState::Failed)
    }

    pub fn can_transition_to(&self, next: FullSyncState) -> bool {
        use FullSyncState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Paging)
            | (Paging, Processing)
            | (Processing, Upserting)
            | (Upserting, Paging)
            | (Upserting, ReconcilingAbsent)
            | (ReconcilingAbsent, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FullSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tracks the state of one full sync run.
#[derive(Debug)]
pub(crate) struct RunState {
    state: FullSyncState,
}

impl RunState {
    pub(crate) fn new() -> Self {
        Self {
            state: FullSyncState::Idle,
        }
    }

    pub(crate) fn current(&self) -> FullSyncState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: FullSyncState) -> SyncResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::invalid_state_transition(
                self.state.as_str(),
                next.as_str(),
            ));
        }
        debug!(from = %self.state, to = %next, "Full sync state transition");
        self.state = next;
        Ok(())
    }
}

/// How a candidate relates to the identity store.
#[derive(Debug)]
pub(crate) enum Lookup {
    /// An identity is linked to one of the candidate's external ids, or
    /// matched by username or email and free to be linked.
    Found(Identity),
    /// An identity matched by username or email is linked to a different
    /// record of the same source.
    Claimed { field: &'static str, identity: Identity },
    Missing,
}

/// What applying a candidate to the store amounts to.
#[derive(Debug)]
pub(crate) enum Change {
    Create(Identity),
    Update(Identity),
    Unchanged,
    Deferred(DeferredConflict),
}

/// Runs full and incremental syncs for one directory source.
pub struct SyncOrchestrator {
    config: Arc<SyncEngineConfig>,
    connector: Arc<dyn DirectoryConnector>,
    identities: Arc<dyn IdentityStore>,
    sync_state: Arc<dyn SyncStateStore>,
    metrics: Arc<dyn SyncMetrics>,
    mapper: SchemaMapper,
    lifecycle: LifecycleRules,
    resolver: ConflictResolver,
    deduplicator: Deduplicator,
    last_report: RwLock<Option<FullSyncReport>>,
}

impl SyncOrchestrator {
    /// Create an orchestrator after validating the configuration.
    pub fn new(
        config: SyncEngineConfig,
        connector: Arc<dyn DirectoryConnector>,
        identities: Arc<dyn IdentityStore>,
        sync_state: Arc<dyn SyncStateStore>,
        metrics: Arc<dyn SyncMetrics>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        if !config.lifecycle_rules.is_empty()
            && config.conflict_strategy != ConflictStrategy::RemoteWins
        {
            warn!(
                source_id = %config.source.source_id,
                strategy = %config.conflict_strategy,
                "Lifecycle rules only change the status of new identities under this strategy"
            );
        }

        let resolver = ConflictResolver::new(config.conflict_strategy)
            .with_guard_fields(config.defer_on_conflicting.clone());
        let deduplicator = Deduplicator::new(
            config.dedup_rules.clone(),
            resolver.clone(),
            Arc::clone(&metrics),
        );

        Ok(Self {
            mapper: SchemaMapper::from_config(&config.source),
            lifecycle: LifecycleRules::new(config.lifecycle_rules.clone()),
            resolver,
            deduplicator,
            config: Arc::new(config),
            connector,
            identities,
            sync_state,
            metrics,
            last_report: RwLock::new(None),
        })
    }

    /// Create an orchestrator for an LDAP source described by
    /// `source.connection`.
    pub fn with_ldap(
        config: SyncEngineConfig,
        identities: Arc<dyn IdentityStore>,
        sync_state: Arc<dyn SyncStateStore>,
        metrics: Arc<dyn SyncMetrics>,
    ) -> Result<Self, ConfigError> {
        let connection = config
            .source
            .connection
            .clone()
            .ok_or_else(|| ConfigError::MissingValue("source.connection".to_string()))?;
        let connector = LdapConnector::new(connection)
            .map_err(|e| ConfigError::invalid("source.connection", e.to_string()))?;
        Self::new(config, Arc::new(connector), identities, sync_state, metrics)
    }

    pub fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    pub fn source_id(&self) -> &str {
        &self.config.source.source_id
    }

    /// Report of the most recent successful full sync run by this orchestrator.
    pub async fn last_report(&self) -> Option<FullSyncReport> {
        self.last_report.read().await.clone()
    }

    /// Persisted sync state for this source.
    pub async fn last_sync_state(&self) -> SyncResult<Option<SyncState>> {
        self.sync_state
            .get_last_sync_state(self.source_id())
            .await
            .map_err(|e| SyncError::store(SyncStage::StateUpdate, e))
    }

    /// Map a record and apply lifecycle rules.
    fn prepare(&self, record: &ExternalRecord) -> Result<CandidateIdentity, MappingError> {
        let mut candidate = self.mapper.map(record)?;
        if let Some(rule) = self.lifecycle.apply(record, &mut candidate) {
            debug!(
                record_id = %record.id,
                rule_attr = %rule.source_attr,
                status = %rule.target_status,
                "Lifecycle rule applied"
            );
        }
        Ok(candidate)
    }

    /// Find the stored identity a candidate corresponds to.
    ///
    /// Source linkage (own id, then ids merged into it) is checked before
    /// username and email.
    async fn lookup(&self, candidate: &CandidateIdentity) -> SyncResult<Lookup> {
        let store_err = |e| SyncError::store(SyncStage::Lookup, e);

        for external_id in candidate.external_ids() {
            if let Some(identity) = self
                .identities
                .get_user_by_external_id(&candidate.source_id, external_id)
                .await
                .map_err(store_err)?
            {
                return Ok(Lookup::Found(identity));
            }
        }

        if !candidate.username.is_empty() {
            if let Some(identity) = self
                .identities
                .get_user_by_username(&candidate.username)
                .await
                .map_err(store_err)?
            {
                return Ok(classify_match("username", identity, candidate));
            }
        }

        if !candidate.email.is_empty() {
            if let Some(identity) = self
                .identities
                .get_user_by_email(&candidate.email)
                .await
                .map_err(store_err)?
            {
                return Ok(classify_match("email", identity, candidate));
            }
        }

        Ok(Lookup::Missing)
    }

    /// Decide what a candidate means for the store. No I/O.
    fn plan_change(
        &self,
        candidate: CandidateIdentity,
        lookup: Lookup,
        now: DateTime<Utc>,
    ) -> Change {
        match lookup {
            Lookup::Missing => Change::Create(Identity::from_candidate(candidate, now)),
            Lookup::Claimed { field, identity } => {
                Change::Deferred(claimed_conflict(field, &identity, candidate, now))
            }
            Lookup::Found(current) => match self.resolver.resolve(&current, &candidate, now) {
                Resolution::Resolved(mut updated) => {
                    if updated.same_profile(&current) {
                        Change::Unchanged
                    } else {
                        updated.updated_at = now;
                        Change::Update(updated)
                    }
                }
                Resolution::Deferred(conflict) => Change::Deferred(conflict),
            },
        }
    }

    fn record_failure(&self, err: &SyncError) {
        if let Some(stage) = err.stage() {
            self.metrics.record_error(self.source_id(), stage);
        }
    }
}

fn classify_match(field: &'static str, identity: Identity, candidate: &CandidateIdentity) -> Lookup {
    let linked_elsewhere = identity.is_linked_to(&candidate.source_id)
        && identity
            .external_id
            .as_deref()
            .is_some_and(|id| !candidate.external_ids().any(|own| own == id));
    if linked_elsewhere {
        Lookup::Claimed { field, identity }
    } else {
        Lookup::Found(identity)
    }
}

/// Conflict reported when `field` of the candidate is held by `identity`.
fn claimed_conflict(
    field: &str,
    identity: &Identity,
    candidate: CandidateIdentity,
    now: DateTime<Utc>,
) -> DeferredConflict {
    DeferredConflict {
        field: field.to_string(),
        existing_value: identity.field_text(field).unwrap_or_default(),
        incoming_value: candidate.field_text(field).unwrap_or_default(),
        existing_ids: identity.external_id.iter().cloned().collect(),
        candidate,
        detected_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut run = RunState::new();
        for next in [
            FullSyncState::Paging,
            FullSyncState::Processing,
            FullSyncState::Upserting,
            FullSyncState::Paging,
            FullSyncState::Processing,
            FullSyncState::Upserting,
            FullSyncState::ReconcilingAbsent,
            FullSyncState::Completed,
        ] {
            run.transition(next).unwrap();
        }
        assert_eq!(run.current(), FullSyncState::Completed);
    }

    #[test]
    fn test_failed_reachable_from_any_running_state() {
        for state in [
            FullSyncState::Idle,
            FullSyncState::Paging,
            FullSyncState::Processing,
            FullSyncState::Upserting,
            FullSyncState::ReconcilingAbsent,
        ] {
            assert!(state.can_transition_to(FullSyncState::Failed));
        }
        assert!(!FullSyncState::Completed.can_transition_to(FullSyncState::Failed));
    }

    #[test]
    fn test_reconciliation_requires_all_pages() {
        let mut run = RunState::new();
        run.transition(FullSyncState::Paging).unwrap();
        let err = run.transition(FullSyncState::ReconcilingAbsent).unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
        assert_eq!(run.current(), FullSyncState::Paging);
    }

    #[test]
    fn test_match_linked_to_other_record_is_claimed() {
        let mut other = CandidateIdentity::new("corp", "ext-2");
        other.username = "jdoe".to_string();
        let identity = Identity::from_candidate(other, Utc::now());

        let mut candidate = CandidateIdentity::new("corp", "ext-1");
        candidate.username = "jdoe".to_string();
        assert!(matches!(
            classify_match("username", identity.clone(), &candidate),
            Lookup::Claimed { field: "username", .. }
        ));

        candidate.merged_from.push("ext-2".to_string());
        assert!(matches!(
            classify_match("username", identity, &candidate),
            Lookup::Found(_)
        ));
    }

    #[test]
    fn test_claimed_conflict_shows_both_sides() {
        let mut other = CandidateIdentity::new("corp", "ext-2");
        other.email = "jdoe@example.com".to_string();
        let identity = Identity::from_candidate(other, Utc::now());

        let mut candidate = CandidateIdentity::new("corp", "ext-1");
        candidate.email = "JDoe@Example.com".to_string();

        let conflict = claimed_conflict("email", &identity, candidate, Utc::now());
        assert_eq!(conflict.existing_value, "jdoe@example.com");
        assert_eq!(conflict.incoming_value, "JDoe@Example.com");
        assert_eq!(conflict.existing_ids, vec!["ext-2".to_string()]);
        assert_eq!(conflict.candidate.external_id, "ext-1");
    }
}
