//! Incremental sync.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dirsync_connector::{DirectoryClient, ExternalRecord};

use super::{Change, IncrementalSummary, SyncOrchestrator};
use crate::error::{SyncError, SyncResult, SyncStage};
use crate::metrics::SyncType;

/// Attributes carrying the time of the last change, in lookup order.
const CHANGE_TIME_ATTRIBUTES: [&str; 2] = ["modifyTimestamp", "whenChanged"];

impl SyncOrchestrator {
    /// Listen for directory changes and apply them one at a time.
    ///
    /// A record that fails to map or persist is counted and skipped. The
    /// session ends with `Ok` when `cancel` fires and with
    /// [`SyncError::StreamEnded`] when the change stream terminates.
    pub async fn run_incremental(
        &self,
        cancel: &CancellationToken,
    ) -> SyncResult<IncrementalSummary> {
        let source_id = self.source_id();
        let started = Instant::now();
        let mut summary = IncrementalSummary::new(source_id);

        info!(source_id = %source_id, "Starting incremental sync");

        let result = match self.connector.connect().await {
            Ok(mut client) => {
                let result = self.listen(client.as_mut(), &mut summary, cancel).await;
                if let Err(e) = client.close().await {
                    debug!(source_id = %source_id, error = %e, "Failed to close directory connection");
                }
                result
            }
            Err(e) => Err(SyncError::connector(SyncStage::Connect, e)),
        };

        self.metrics
            .record_sync_duration(source_id, SyncType::Incremental, started.elapsed());

        match result {
            Ok(()) => {
                info!(
                    source_id = %source_id,
                    received = summary.received,
                    created = summary.created,
                    updated = summary.updated,
                    failed = summary.failed,
                    "Incremental sync stopped"
                );
                Ok(summary)
            }
            Err(err) => {
                self.record_failure(&err);
                error!(
                    source_id = %source_id,
                    stage = err.stage().map(|s| s.as_str()).unwrap_or("none"),
                    received = summary.received,
                    error = %err,
                    "Incremental sync failed"
                );
                Err(err)
            }
        }
    }

    async fn listen(
        &self,
        client: &mut dyn DirectoryClient,
        summary: &mut IncrementalSummary,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let source = &self.config.source;
        let mut changes = client
            .change_listen(&source.base_dn, &source.user_filter, &source.listen_attributes)
            .await
            .map_err(|e| SyncError::connector(SyncStage::Listen, e))?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(source_id = %source.source_id, "Incremental sync cancelled");
                    return Ok(());
                }
                next = changes.next() => next,
            };
            let record = next.map_err(|source| SyncError::StreamEnded { source })?;

            summary.received += 1;
            self.observe_lag(&record);

            match self.apply_change(&record).await {
                Ok(Change::Create(identity)) => {
                    summary.created += 1;
                    debug!(record_id = %record.id, identity_id = %identity.id, "Identity created");
                }
                Ok(Change::Update(identity)) => {
                    summary.updated += 1;
                    debug!(record_id = %record.id, identity_id = %identity.id, "Identity updated");
                }
                Ok(Change::Unchanged) => summary.unchanged += 1,
                Ok(Change::Deferred(conflict)) => {
                    warn!(
                        source_id = %source.source_id,
                        record_id = %record.id,
                        field = %conflict.field,
                        "Identity update deferred for review"
                    );
                    summary.deferred.push(conflict);
                }
                Err(err) => {
                    summary.failed += 1;
                    self.record_failure(&err);
                    warn!(
                        source_id = %source.source_id,
                        record_id = %record.id,
                        error = %err,
                        "Failed to apply directory change"
                    );
                }
            }
        }
    }

    /// Map one change record and write the result.
    async fn apply_change(&self, record: &ExternalRecord) -> SyncResult<Change> {
        let candidate = self.prepare(record)?;
        let lookup = self.lookup(&candidate).await?;
        let change = self.plan_change(candidate, lookup, Utc::now());

        match &change {
            Change::Create(identity) => {
                self.identities
                    .create_user(identity.clone())
                    .await
                    .map_err(|e| SyncError::store(SyncStage::Apply, e))?;
            }
            Change::Update(identity) => {
                self.identities
                    .update_user(identity.clone())
                    .await
                    .map_err(|e| SyncError::store(SyncStage::Apply, e))?;
            }
            Change::Unchanged | Change::Deferred(_) => {}
        }
        Ok(change)
    }

    fn observe_lag(&self, record: &ExternalRecord) {
        let Some(changed_at) = CHANGE_TIME_ATTRIBUTES
            .iter()
            .find_map(|attr| record.first(attr))
            .and_then(parse_generalized_time)
        else {
            return;
        };
        let lag = (Utc::now() - changed_at).to_std().unwrap_or(Duration::ZERO);
        self.metrics.set_incremental_lag(self.source_id(), lag);
    }
}

/// Parse an LDAP GeneralizedTime such as `20240601120000Z` or
/// `20240601120000.0Z`. Fractions and zone suffixes are ignored; the value is
/// taken as UTC.
pub(crate) fn parse_generalized_time(value: &str) -> Option<DateTime<Utc>> {
    let digits = value.get(..14)?;
    NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .ok()
        .map(|t| t.and_utc())
}
