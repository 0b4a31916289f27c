//! Background scheduling of sync runs.
//!
//! [`SyncScheduler`] owns up to two background tasks per source:
//!
//! - a cron loop running full syncs, one at a time, with retry on
//!   transient failures
//! - a supervisor that keeps the incremental listener alive, restarting it
//!   after a fixed backoff whenever the change stream ends
//!
//! Both stop when the scheduler's [`CancellationToken`] fires.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{FullSyncReport, SyncOrchestrator};
use crate::retry::RetryPolicy;

/// A parsed full sync cron expression.
///
/// Accepts standard five-field expressions (`0 2 * * *`), six or seven
/// fields with leading seconds, and shorthands such as `@daily`.
#[derive(Debug, Clone)]
pub struct FullSyncSchedule {
    expression: String,
    schedule: Schedule,
}

impl FullSyncSchedule {
    pub fn parse(expression: &str) -> Result<Self, ConfigError> {
        let expression = expression.trim();
        let normalized = if !expression.starts_with('@')
            && expression.split_whitespace().count() == 5
        {
            format!("0 {expression}")
        } else {
            expression.to_string()
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            ConfigError::invalid("schedule.full_sync_cron", format!("'{expression}': {e}"))
        })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// Runs full and incremental syncs of one source in the background.
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    schedule: Option<FullSyncSchedule>,
    retry: RetryPolicy,
    incremental_enabled: bool,
    restart_backoff: Duration,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Result<Self, ConfigError> {
        let config = &orchestrator.config().schedule;
        let schedule = config.full_sync_schedule()?;
        let retry = config.retry_policy();
        let incremental_enabled = config.incremental_enabled;
        let restart_backoff = config.incremental_restart_backoff();

        Ok(Self {
            orchestrator,
            schedule,
            retry,
            incremental_enabled,
            restart_backoff,
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        })
    }

    /// Token that stops every task started by this scheduler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Spawn the background tasks. Does nothing if they are already running.
    pub fn start(&mut self) {
        let source_id = self.orchestrator.source_id().to_string();
        if self.is_running() {
            warn!(source_id = %source_id, "Scheduler already started");
            return;
        }

        if let Some(schedule) = self.schedule.clone() {
            info!(source_id = %source_id, cron = %schedule.expression(), "Scheduling full sync");
            self.tasks.spawn(full_sync_loop(
                Arc::clone(&self.orchestrator),
                schedule,
                self.retry,
                self.cancel.clone(),
            ));
        }

        if self.incremental_enabled {
            info!(source_id = %source_id, "Starting incremental sync supervisor");
            self.tasks.spawn(incremental_loop(
                Arc::clone(&self.orchestrator),
                self.restart_backoff,
                self.cancel.clone(),
            ));
        }
    }

    /// Run a full sync now, retrying transient failures.
    ///
    /// Runs independently of the cron loop.
    pub async fn trigger_full_sync(&self) -> SyncResult<FullSyncReport> {
        info!(source_id = %self.orchestrator.source_id(), "Manual full sync triggered");
        run_full_with_retry(&self.orchestrator, &self.retry, &self.cancel).await
    }

    /// Cancel all tasks and wait for them to finish.
    ///
    /// The scheduler cannot be started again afterwards.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!(source_id = %self.orchestrator.source_id(), error = %e, "Sync task panicked");
                }
            }
        }
        info!(source_id = %self.orchestrator.source_id(), "Sync scheduler stopped");
    }
}

/// Run a full sync, retrying retryable failures with exponential backoff.
async fn run_full_with_retry(
    orchestrator: &SyncOrchestrator,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> SyncResult<FullSyncReport> {
    let mut retries = 0;
    loop {
        match orchestrator.run_full_sync(cancel).await {
            Ok(report) => return Ok(report),
            Err(err) if err.is_retryable() && retry.should_retry(retries) => {
                retries += 1;
                let delay = retry.delay_for_attempt(retries);
                warn!(
                    source_id = %orchestrator.source_id(),
                    attempt = retries,
                    max_retries = retry.max_retries,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Full sync failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

async fn full_sync_loop(
    orchestrator: Arc<SyncOrchestrator>,
    schedule: FullSyncSchedule,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    let source_id = orchestrator.source_id().to_string();
    loop {
        let now = Utc::now();
        let Some(next_run) = schedule.next_after(now) else {
            info!(source_id = %source_id, "Full sync schedule has no upcoming runs");
            return;
        };
        debug!(source_id = %source_id, next_run = %next_run, "Next full sync scheduled");

        let wait = (next_run - now).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        match run_full_with_retry(&orchestrator, &retry, &cancel).await {
            Ok(_) => {}
            Err(err) if err.is_cancelled() => return,
            Err(err) => {
                error!(source_id = %source_id, error = %err, "Scheduled full sync gave up");
            }
        }
    }
}

async fn incremental_loop(
    orchestrator: Arc<SyncOrchestrator>,
    restart_backoff: Duration,
    cancel: CancellationToken,
) {
    let source_id = orchestrator.source_id().to_string();
    loop {
        match orchestrator.run_incremental(&cancel).await {
            // Only returned once cancelled.
            Ok(_) => return,
            Err(err) => {
                warn!(
                    source_id = %source_id,
                    restart_in_secs = restart_backoff.as_secs(),
                    error = %err,
                    "Incremental sync stopped, restarting"
                );
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(restart_backoff) => {}
        }
    }
}
