//! Incremental Sync Tests
//!
//! Tests for `SyncOrchestrator::run_incremental` covering:
//! - Applying change notifications as creates, updates and no-ops
//! - Per-record failures that do not stop the listener
//! - Stream termination and cancellation
//! - Lag observation from directory change timestamps

mod common;

use std::time::Duration;

use common::{test_config, user_record, wait_for, Harness};
use dirsync_connector::{ConnectorError, ExternalRecord};
use dirsync_engine::{CancellationToken, IncrementalSummary, SyncError, SyncResult, SyncStage, SyncType};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

fn stamped(record: ExternalRecord, timestamp: &str) -> ExternalRecord {
    record.with_attribute("modifyTimestamp", vec![timestamp.to_string()])
}

fn spawn_listener(
    harness: &Harness,
    cancel: &CancellationToken,
) -> JoinHandle<SyncResult<IncrementalSummary>> {
    let orchestrator = harness.orchestrator.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { orchestrator.run_incremental(&cancel).await })
}

// =============================================================================
// Applying changes
// =============================================================================

#[tokio::test]
async fn test_changes_are_applied_one_by_one() {
    let harness = Harness::new(test_config());
    harness.directory.push_session(
        vec![
            Ok(stamped(
                user_record("ext-1", "alice", "alice@example.com"),
                "20240601100000Z",
            )),
            Ok(stamped(
                user_record("ext-1", "alice", "alice.smith@example.com"),
                "20240601110000Z",
            )),
            Ok(stamped(
                user_record("ext-1", "alice", "alice.smith@example.com"),
                "20240601110000Z",
            )),
        ],
        true,
    );
    let cancel = CancellationToken::new();
    let listener = spawn_listener(&harness, &cancel);

    assert!(wait_for(WAIT, || harness.metrics.lags.lock().unwrap().len() == 3).await);
    cancel.cancel();
    let summary = listener.await.unwrap().unwrap();

    assert_eq!(summary.received, 3);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(harness.identities.create_calls(), 1);
    assert_eq!(harness.identities.update_calls(), 1);

    let alice = harness.identities.by_username("alice").await.unwrap();
    assert_eq!(alice.email, "alice.smith@example.com");
    assert_eq!(alice.external_id.as_deref(), Some("ext-1"));
}

#[tokio::test]
async fn test_full_sync_identities_are_updated_in_place() {
    let harness = Harness::new(test_config());
    harness
        .directory
        .set_records(vec![user_record("ext-1", "alice", "alice@example.com")], 10);
    harness
        .orchestrator
        .run_full_sync(&CancellationToken::new())
        .await
        .unwrap();

    harness.directory.push_session(
        vec![Ok(user_record("ext-1", "alice", "alice@corp.example.com"))],
        false,
    );
    let err = harness
        .orchestrator
        .run_incremental(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::StreamEnded { .. }));
    let identities = harness.identities.snapshot().await;
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].email, "alice@corp.example.com");
}

// =============================================================================
// Per-record failures
// =============================================================================

#[tokio::test]
async fn test_unmappable_change_is_skipped() {
    let harness = Harness::new(test_config());
    let mut broken = user_record("ext-1", "alice", "alice@example.com");
    broken.attributes.remove("uid");
    harness.directory.push_session(
        vec![Ok(broken), Ok(user_record("ext-2", "bob", "bob@example.com"))],
        false,
    );

    let err = harness
        .orchestrator
        .run_incremental(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::Listen));
    assert!(harness.identities.by_username("bob").await.is_some());
    assert_eq!(
        harness.metrics.errors(),
        vec![SyncStage::Mapping, SyncStage::Listen]
    );
}

#[tokio::test]
async fn test_store_failure_is_counted_and_listener_continues() {
    let harness = Harness::new(test_config());
    harness.identities.fail_writes(true);
    harness.directory.push_session(
        vec![
            Ok(stamped(
                user_record("ext-1", "alice", "alice@example.com"),
                "20240601100000Z",
            )),
            Ok(stamped(
                user_record("ext-2", "bob", "bob@example.com"),
                "20240601100000Z",
            )),
        ],
        true,
    );
    let cancel = CancellationToken::new();
    let listener = spawn_listener(&harness, &cancel);

    assert!(wait_for(WAIT, || harness.identities.create_calls() == 2).await);
    cancel.cancel();
    let summary = listener.await.unwrap().unwrap();

    assert_eq!(summary.received, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.created, 0);
    assert_eq!(harness.metrics.errors(), vec![SyncStage::Apply, SyncStage::Apply]);
}

#[tokio::test]
async fn test_claimed_username_is_deferred() {
    let harness = Harness::new(test_config());
    harness
        .directory
        .set_records(vec![user_record("ext-1", "alice", "alice@example.com")], 10);
    harness
        .orchestrator
        .run_full_sync(&CancellationToken::new())
        .await
        .unwrap();

    harness.directory.push_session(
        vec![Ok(stamped(
            user_record("ext-9", "alice", "other-alice@example.com"),
            "20240601100000Z",
        ))],
        true,
    );
    let cancel = CancellationToken::new();
    let listener = spawn_listener(&harness, &cancel);

    assert!(wait_for(WAIT, || harness.metrics.lags.lock().unwrap().len() == 1).await);
    cancel.cancel();
    let summary = listener.await.unwrap().unwrap();

    assert_eq!(summary.deferred.len(), 1);
    assert_eq!(summary.deferred[0].field, "username");
    assert_eq!(harness.identities.create_calls(), 0);
}

// =============================================================================
// Stream lifecycle
// =============================================================================

#[tokio::test]
async fn test_stream_end_is_reported() {
    let harness = Harness::new(test_config());
    harness.directory.push_session(Vec::new(), false);

    let err = harness
        .orchestrator
        .run_incremental(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::StreamEnded {
            source: ConnectorError::StreamClosed
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(harness.metrics.errors(), vec![SyncStage::Listen]);
    assert_eq!(harness.metrics.durations(), vec![SyncType::Incremental]);
    assert_eq!(harness.directory.close_calls(), 1);
}

#[tokio::test]
async fn test_producer_error_ends_the_session() {
    let harness = Harness::new(test_config());
    harness.directory.push_session(
        vec![Err(ConnectorError::network("socket closed by server"))],
        true,
    );

    let err = harness
        .orchestrator
        .run_incremental(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::StreamEnded {
            source: ConnectorError::NetworkError { .. }
        }
    ));
}

#[tokio::test]
async fn test_cancellation_stops_listener_cleanly() {
    let harness = Harness::new(test_config());
    let cancel = CancellationToken::new();
    let listener = spawn_listener(&harness, &cancel);

    assert!(wait_for(WAIT, || harness.directory.listen_calls() == 1).await);
    cancel.cancel();
    let summary = listener.await.unwrap().unwrap();

    assert_eq!(summary.received, 0);
    assert_eq!(harness.directory.close_calls(), 1);
    assert!(harness.metrics.errors().is_empty());
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let harness = Harness::new(test_config());
    harness.directory.fail_connects(1);

    let err = harness
        .orchestrator
        .run_incremental(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::Connect));
    assert!(err.is_retryable());
    assert_eq!(harness.directory.listen_calls(), 0);
}

// =============================================================================
// Lag
// =============================================================================

#[tokio::test]
async fn test_lag_is_observed_from_change_timestamp() {
    let harness = Harness::new(test_config());
    harness.directory.push_session(
        vec![
            Ok(stamped(
                user_record("ext-1", "alice", "alice@example.com"),
                "20240601100000Z",
            )),
            Ok(user_record("ext-2", "bob", "bob@example.com")
                .with_attribute("whenChanged", vec!["20240601100000.0Z".to_string()])),
            Ok(user_record("ext-3", "carol", "carol@example.com")),
        ],
        true,
    );
    let cancel = CancellationToken::new();
    let listener = spawn_listener(&harness, &cancel);

    assert!(wait_for(WAIT, || harness.identities.create_calls() == 3).await);
    cancel.cancel();
    listener.await.unwrap().unwrap();

    let lags = harness.metrics.lags.lock().unwrap().clone();
    assert_eq!(lags.len(), 2);
    assert!(lags.iter().all(|lag| *lag > Duration::from_secs(3600)));
}
