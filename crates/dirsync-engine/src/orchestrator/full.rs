//! Full sync.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dirsync_connector::{DirectoryClient, ExternalRecord, PageCursor};
use dirsync_core::{Identity, IdentityStatus};

use super::{Change, FullSyncReport, FullSyncState, RunState, SyncOrchestrator};
use crate::error::{SyncError, SyncResult, SyncStage};
use crate::metrics::SyncType;
use crate::store::Pagination;

impl SyncOrchestrator {
    /// Run a full sync of the source.
    ///
    /// Every page is persisted before the next one is requested, and
    /// progress is recorded after each page. Once all pages are processed,
    /// identities linked to this source whose external record was not seen
    /// are deactivated. On failure the sync state is marked failed and the
    /// progress reached so far is kept.
    pub async fn run_full_sync(&self, cancel: &CancellationToken) -> SyncResult<FullSyncReport> {
        let source_id = self.source_id();
        let started = Instant::now();
        let started_at = Utc::now();
        let mut run = RunState::new();
        let mut report = FullSyncReport::new(source_id, started_at);

        info!(source_id = %source_id, "Starting full sync");

        match self
            .execute_full_sync(&mut run, &mut report, started_at, cancel)
            .await
        {
            Ok(()) => {
                report.duration = started.elapsed();
                self.metrics
                    .record_sync_duration(source_id, SyncType::Full, report.duration);
                info!(
                    source_id = %source_id,
                    pages = report.pages,
                    fetched = report.fetched,
                    created = report.created,
                    updated = report.updated,
                    unchanged = report.unchanged,
                    deactivated = report.deactivated,
                    deferred = report.deferred.len(),
                    duration_ms = report.duration.as_millis() as u64,
                    "Full sync completed"
                );
                *self.last_report.write().await = Some(report.clone());
                Ok(report)
            }
            Err(err) => {
                let failed_in = run.current();
                if run.transition(FullSyncState::Failed).is_err() {
                    debug!(state = %failed_in, "Run already terminal");
                }
                self.record_failure(&err);
                error!(
                    source_id = %source_id,
                    state = %failed_in,
                    stage = err.stage().map(|s| s.as_str()).unwrap_or("none"),
                    processed = report.fetched,
                    error = %err,
                    "Full sync failed"
                );
                if let Err(e) = self.sync_state.mark_failed(source_id, &err.to_string()).await {
                    warn!(source_id = %source_id, error = %e, "Failed to record sync failure");
                }
                Err(err)
            }
        }
    }

    async fn execute_full_sync(
        &self,
        run: &mut RunState,
        report: &mut FullSyncReport,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let source_id = self.source_id();

        self.sync_state
            .mark_started(source_id, started_at)
            .await
            .map_err(|e| SyncError::store(SyncStage::StateUpdate, e))?;

        let mut client = self
            .connector
            .connect()
            .await
            .map_err(|e| SyncError::connector(SyncStage::Connect, e))?;

        let paged = self.page_through(client.as_mut(), run, report, cancel).await;
        if let Err(e) = client.close().await {
            warn!(source_id = %source_id, error = %e, "Failed to close directory connection");
        }
        let seen = paged?;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        run.transition(FullSyncState::ReconcilingAbsent)?;
        report.deactivated = self.deactivate_absent(&seen, cancel).await?;

        let completed_at = Utc::now();
        self.sync_state
            .mark_completed(source_id, completed_at, report.fetched as u64)
            .await
            .map_err(|e| SyncError::store(SyncStage::StateUpdate, e))?;
        run.transition(FullSyncState::Completed)?;
        report.completed_at = Some(completed_at);
        Ok(())
    }

    /// Fetch and persist every page. Returns the ids of all fetched records.
    async fn page_through(
        &self,
        client: &mut dyn DirectoryClient,
        run: &mut RunState,
        report: &mut FullSyncReport,
        cancel: &CancellationToken,
    ) -> SyncResult<HashSet<String>> {
        let source = &self.config.source;
        let page_size = self.config.page_size();
        let mut seen = HashSet::new();
        let mut cursor = PageCursor::end();

        run.transition(FullSyncState::Paging)?;
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let page = client
                .paged_search(&source.base_dn, &source.user_filter, page_size, &cursor)
                .await
                .map_err(|e| SyncError::connector(SyncStage::Search, e))?;

            report.pages += 1;
            report.fetched += page.records.len();
            seen.extend(page.records.iter().map(|r| r.id.clone()));
            debug!(
                source_id = %source.source_id,
                page = report.pages,
                records = page.records.len(),
                "Fetched page"
            );

            run.transition(FullSyncState::Processing)?;
            let writes = self.process_page(&page.records, report).await?;

            run.transition(FullSyncState::Upserting)?;
            if !writes.is_empty() {
                let written = self
                    .identities
                    .upsert_batch(writes)
                    .await
                    .map_err(|e| SyncError::store(SyncStage::Upsert, e))?;
                debug!(source_id = %source.source_id, written, "Page persisted");
            }
            self.sync_state
                .update_progress(&source.source_id, report.fetched as u64)
                .await
                .map_err(|e| SyncError::store(SyncStage::StateUpdate, e))?;

            if page.is_last() {
                return Ok(seen);
            }
            cursor = page.next_cursor;
            run.transition(FullSyncState::Paging)?;
        }
    }

    /// Map, deduplicate and resolve one page. Returns the identities to write.
    async fn process_page(
        &self,
        records: &[ExternalRecord],
        report: &mut FullSyncReport,
    ) -> SyncResult<Vec<Identity>> {
        let source_id = self.source_id();

        let mut candidates = Vec::with_capacity(records.len());
        for record in records {
            match self.prepare(record) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    report.mapping_failures += 1;
                    self.metrics.record_error(source_id, SyncStage::Mapping);
                    warn!(
                        source_id = %source_id,
                        record_id = %record.id,
                        dn = %record.dn,
                        error = %e,
                        "Skipping record that failed mapping"
                    );
                }
            }
        }

        let outcome = self.deduplicator.process(candidates);
        report.duplicates_merged += outcome.merged;
        for conflict in &outcome.deferred {
            warn!(
                source_id = %source_id,
                field = %conflict.field,
                external_id = %conflict.candidate.external_id,
                "Duplicate merge deferred for review"
            );
        }
        report.deferred.extend(outcome.deferred);

        let pending: Vec<_> = outcome
            .deduped
            .iter()
            .map(|candidate| self.lookup(candidate))
            .collect();
        let lookups: Vec<_> = stream::iter(pending)
            .buffered(self.config.concurrency_limit)
            .collect()
            .await;

        let now = Utc::now();
        let mut writes = Vec::new();
        for (candidate, lookup) in outcome.deduped.into_iter().zip(lookups) {
            match self.plan_change(candidate, lookup?, now) {
                Change::Create(identity) => {
                    report.created += 1;
                    writes.push(identity);
                }
                Change::Update(identity) => {
                    report.updated += 1;
                    writes.push(identity);
                }
                Change::Unchanged => report.unchanged += 1,
                Change::Deferred(conflict) => {
                    warn!(
                        source_id = %source_id,
                        field = %conflict.field,
                        external_id = %conflict.candidate.external_id,
                        "Identity update deferred for review"
                    );
                    report.deferred.push(conflict);
                }
            }
        }
        Ok(writes)
    }

    /// Deactivate identities of this source whose external record is gone.
    async fn deactivate_absent(
        &self,
        seen: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> SyncResult<usize> {
        let source_id = self.source_id();
        let limit = self.config.batch_size as usize;

        let mut absent = Vec::new();
        let mut page = Pagination::new(0, limit);
        loop {
            let users = self
                .identities
                .list_users(page)
                .await
                .map_err(|e| SyncError::store(SyncStage::Reconcile, e))?;
            let exhausted = users.len() < limit;
            absent.extend(users.into_iter().filter(|identity| {
                identity.is_linked_to(source_id)
                    && identity.status != IdentityStatus::Inactive
                    && identity
                        .external_id
                        .as_ref()
                        .is_some_and(|id| !seen.contains(id))
            }));
            if exhausted {
                break;
            }
            page = page.next();
        }

        let now = Utc::now();
        let count = absent.len();
        for mut identity in absent {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            info!(
                source_id = %source_id,
                identity_id = %identity.id,
                username = %identity.username,
                "Deactivating identity absent from directory"
            );
            identity.status = IdentityStatus::Inactive;
            identity.updated_at = now;
            self.identities
                .update_user(identity)
                .await
                .map_err(|e| SyncError::store(SyncStage::Reconcile, e))?;
        }
        Ok(count)
    }
}
