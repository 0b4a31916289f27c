//! # Directory Sync Engine
//!
//! Pulls user records from an LDAP-compatible directory and reconciles them
//! into the internal identity store.
//!
//! This crate provides:
//! - Schema mapping from directory attributes to candidate identities
//! - Batch deduplication with configurable match rules
//! - Conflict resolution (remote wins, local wins, merge) with merge history
//! - Full sync with paging, batched upserts and absent-user deactivation
//! - Incremental sync over a change-notification stream
//! - A scheduler for cron-driven full syncs and a supervised incremental listener
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────┐     ┌────────────────┐
//! │ Directory Client │────►│ Schema Mapper │────►│  Deduplicator  │
//! │ (paged / listen) │     │  + lifecycle  │     │                │
//! └──────────────────┘     └───────────────┘     └───────┬────────┘
//!                                                        │
//!                                                        ▼
//! ┌──────────────────┐     ┌───────────────┐     ┌────────────────┐
//! │    Scheduler     │────►│ Orchestrator  │◄───►│    Conflict    │
//! │ (cron + listener)│     │ (full / incr) │     │    Resolver    │
//! └──────────────────┘     └───────┬───────┘     └────────────────┘
//!                                  │
//!                    ┌─────────────┴─────────────┐
//!                    ▼                           ▼
//!            ┌───────────────┐          ┌─────────────────┐
//!            │ Identity Store│          │ Sync State Store│
//!            └───────────────┘          └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dirsync_engine::{SyncEngineConfig, SyncOrchestrator, SyncScheduler};
//! use dirsync_engine::metrics::NoopSyncMetrics;
//! use dirsync_engine::store::memory::{InMemoryIdentityStore, InMemorySyncStateStore};
//!
//! let config = SyncEngineConfig::from_json(&std::fs::read_to_string("sync.json")?)?;
//! let orchestrator = SyncOrchestrator::with_ldap(
//!     config,
//!     Arc::new(InMemoryIdentityStore::new()),
//!     Arc::new(InMemorySyncStateStore::new()),
//!     Arc::new(NoopSyncMetrics),
//! )?;
//!
//! let mut scheduler = SyncScheduler::new(Arc::new(orchestrator))?;
//! scheduler.start();
//! // ...
//! scheduler.shutdown().await;
//! ```

pub mod config;
pub mod dedup;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod mapper;
pub mod metrics;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use config::{ConfigError, ScheduleConfig, SourceConfig, SyncEngineConfig};
pub use dedup::{DeduplicationOutcome, DeduplicationRule, Deduplicator};
pub use error::{MappingError, SyncError, SyncResult, SyncStage};
pub use lifecycle::{LifecycleRule, LifecycleRules};
pub use mapper::{FieldMapping, SchemaMapper, Transform};
pub use metrics::{NoopSyncMetrics, PrometheusSyncMetrics, SyncMetrics, SyncType};
pub use orchestrator::{FullSyncReport, FullSyncState, IncrementalSummary, SyncOrchestrator};
pub use resolver::{ConflictResolver, DeferredConflict, Resolution, Resolvable};
pub use retry::RetryPolicy;
pub use scheduler::{FullSyncSchedule, SyncScheduler};
pub use store::{
    IdentityStore, Pagination, StoreError, StoreResult, SyncRunStatus, SyncState, SyncStateStore,
};

pub use tokio_util::sync::CancellationToken;
