//! Sync metrics.
//!
//! The orchestrator reports through the [`SyncMetrics`] trait, injected at
//! construction. [`PrometheusSyncMetrics`] exposes:
//!
//! - `ldap_sync_duration_seconds{source_id, sync_type}` (histogram)
//! - `ldap_sync_errors_total{source_id, stage}` (counter)
//! - `identity_duplicates_detected_total{source_id, match_field}` (counter)
//! - `ldap_sync_lag_seconds{source_id}` (gauge)

use prometheus_client::{
    encoding::{text::encode, EncodeLabelSet},
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::SyncStage;

/// Kind of sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncType {
    Full,
    Incremental,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
        }
    }
}

/// Metrics sink for the sync engine.
pub trait SyncMetrics: Send + Sync {
    fn record_sync_duration(&self, source_id: &str, sync_type: SyncType, duration: Duration);

    fn record_error(&self, source_id: &str, stage: SyncStage);

    fn record_duplicate(&self, source_id: &str, match_field: &str);

    fn set_incremental_lag(&self, source_id: &str, lag: Duration);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSyncMetrics;

impl SyncMetrics for NoopSyncMetrics {
    fn record_sync_duration(&self, _: &str, _: SyncType, _: Duration) {}

    fn record_error(&self, _: &str, _: SyncStage) {}

    fn record_duplicate(&self, _: &str, _: &str) {}

    fn set_incremental_lag(&self, _: &str, _: Duration) {}
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DurationLabels {
    pub source_id: String,
    pub sync_type: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub source_id: String,
    pub stage: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DuplicateLabels {
    pub source_id: String,
    pub match_field: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SourceLabels {
    pub source_id: String,
}

/// Prometheus-backed [`SyncMetrics`] owning its own registry.
pub struct PrometheusSyncMetrics {
    registry: Mutex<Registry>,
    sync_duration_seconds: Family<DurationLabels, Histogram>,
    sync_errors: Family<ErrorLabels, Counter>,
    duplicates_detected: Family<DuplicateLabels, Counter>,
    sync_lag_seconds: Family<SourceLabels, Gauge<f64, AtomicU64>>,
}

impl PrometheusSyncMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Full syncs of large directories take minutes.
        let sync_duration_seconds = Family::<DurationLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([10.0, 30.0, 60.0, 120.0, 300.0, 600.0].into_iter())
        });
        let sync_errors = Family::<ErrorLabels, Counter>::default();
        let duplicates_detected = Family::<DuplicateLabels, Counter>::default();
        let sync_lag_seconds = Family::<SourceLabels, Gauge<f64, AtomicU64>>::default();

        registry.register(
            "ldap_sync_duration_seconds",
            "Duration of directory sync runs in seconds",
            sync_duration_seconds.clone(),
        );
        registry.register(
            "ldap_sync_errors",
            "Directory sync errors by stage",
            sync_errors.clone(),
        );
        registry.register(
            "identity_duplicates_detected",
            "Duplicate identities detected during deduplication",
            duplicates_detected.clone(),
        );
        registry.register(
            "ldap_sync_lag_seconds",
            "Delay between a directory change and its processing",
            sync_lag_seconds.clone(),
        );

        Self {
            registry: Mutex::new(registry),
            sync_duration_seconds,
            sync_errors,
            duplicates_detected,
            sync_lag_seconds,
        }
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let registry = self
            .registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut buffer = String::new();
        encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}

impl Default for PrometheusSyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics for PrometheusSyncMetrics {
    fn record_sync_duration(&self, source_id: &str, sync_type: SyncType, duration: Duration) {
        self.sync_duration_seconds
            .get_or_create(&DurationLabels {
                source_id: source_id.to_string(),
                sync_type: sync_type.as_str().to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    fn record_error(&self, source_id: &str, stage: SyncStage) {
        self.sync_errors
            .get_or_create(&ErrorLabels {
                source_id: source_id.to_string(),
                stage: stage.as_str().to_string(),
            })
            .inc();
    }

    fn record_duplicate(&self, source_id: &str, match_field: &str) {
        self.duplicates_detected
            .get_or_create(&DuplicateLabels {
                source_id: source_id.to_string(),
                match_field: match_field.to_string(),
            })
            .inc();
    }

    fn set_incremental_lag(&self, source_id: &str, lag: Duration) {
        self.sync_lag_seconds
            .get_or_create(&SourceLabels {
                source_id: source_id.to_string(),
            })
            .set(lag.as_secs_f64());
    }
}
