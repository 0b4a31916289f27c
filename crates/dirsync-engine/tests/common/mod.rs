//! Shared mocks and fixtures for sync engine integration tests.
//!
//! Every collaborator of the orchestrator is replaced by a hand-written mock
//! with call counters and failure switches:
//! - `MockDirectory`: scripted pages and change sessions
//! - `RecordingIdentityStore`: in-memory store with upsert failure injection
//! - `RecordingSyncStateStore`: in-memory sync state with a progress log
//! - `RecordingMetrics`: captures every metric call

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dirsync_connector::{
    ChangeStream, ConnectorError, ConnectorResult, DirectoryClient, DirectoryConnector,
    ExternalRecord, PageCursor, SearchPage,
};
use dirsync_core::Identity;
use dirsync_engine::store::memory::{InMemoryIdentityStore, InMemorySyncStateStore};
use dirsync_engine::{
    FieldMapping, IdentityStore, Pagination, SourceConfig, StoreError, StoreResult,
    SyncEngineConfig, SyncMetrics, SyncOrchestrator, SyncStage, SyncState, SyncStateStore,
    SyncType, Transform,
};

pub const SOURCE_ID: &str = "corp";
pub const BASE_DN: &str = "ou=people,dc=example,dc=com";

// =============================================================================
// Mock Directory
// =============================================================================

/// One scripted change-listener session.
pub struct ChangeSession {
    pub events: Vec<ConnectorResult<ExternalRecord>>,
    /// Keep the stream open after the events instead of closing it.
    pub keep_open: bool,
}

struct DirectoryState {
    pages: Mutex<Vec<Vec<ExternalRecord>>>,
    sessions: Mutex<VecDeque<ChangeSession>>,
    connect_failures: AtomicUsize,
    auth_failure: AtomicBool,
    fail_search_at: AtomicUsize, // page index, usize::MAX = never
    search_result_failures: Mutex<Option<(u32, usize)>>, // (result code, remaining)
    connect_call_count: AtomicUsize,
    search_call_count: AtomicUsize,
    listen_call_count: AtomicUsize,
    close_call_count: AtomicUsize,
}

/// Directory serving pre-split pages and scripted change sessions.
#[derive(Clone)]
pub struct MockDirectory {
    state: Arc<DirectoryState>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(DirectoryState {
                pages: Mutex::new(Vec::new()),
                sessions: Mutex::new(VecDeque::new()),
                connect_failures: AtomicUsize::new(0),
                auth_failure: AtomicBool::new(false),
                fail_search_at: AtomicUsize::new(usize::MAX),
                search_result_failures: Mutex::new(None),
                connect_call_count: AtomicUsize::new(0),
                search_call_count: AtomicUsize::new(0),
                listen_call_count: AtomicUsize::new(0),
                close_call_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Replace the directory content, split into pages of `page_size`.
    pub fn set_records(&self, records: Vec<ExternalRecord>, page_size: usize) {
        let pages = records
            .chunks(page_size.max(1))
            .map(<[ExternalRecord]>::to_vec)
            .collect();
        *self.state.pages.lock().unwrap() = pages;
    }

    pub fn push_session(&self, events: Vec<ConnectorResult<ExternalRecord>>, keep_open: bool) {
        self.state
            .sessions
            .lock()
            .unwrap()
            .push_back(ChangeSession { events, keep_open });
    }

    /// Fail the next `n` connection attempts with a transient error.
    pub fn fail_connects(&self, n: usize) {
        self.state.connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_auth(&self) {
        self.state.auth_failure.store(true, Ordering::SeqCst);
    }

    /// Fail every search for the page at `index` (0-based).
    pub fn fail_search_at_page(&self, index: usize) {
        self.state.fail_search_at.store(index, Ordering::SeqCst);
    }

    /// Fail the next `times` searches with the given LDAP result code.
    pub fn fail_searches_with_code(&self, code: u32, times: usize) {
        *self.state.search_result_failures.lock().unwrap() = Some((code, times));
    }

    pub fn clear_failures(&self) {
        self.state.connect_failures.store(0, Ordering::SeqCst);
        self.state.auth_failure.store(false, Ordering::SeqCst);
        self.state.fail_search_at.store(usize::MAX, Ordering::SeqCst);
        *self.state.search_result_failures.lock().unwrap() = None;
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connect_call_count.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.state.search_call_count.load(Ordering::SeqCst)
    }

    pub fn listen_calls(&self) -> usize {
        self.state.listen_call_count.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.state.close_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryConnector for MockDirectory {
    fn display_name(&self) -> &str {
        "mock-directory"
    }

    async fn connect(&self) -> ConnectorResult<Box<dyn DirectoryClient>> {
        self.state.connect_call_count.fetch_add(1, Ordering::SeqCst);
        if self.state.auth_failure.load(Ordering::SeqCst) {
            return Err(ConnectorError::AuthenticationFailed);
        }
        let remaining = self.state.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state
                .connect_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ConnectorError::connection_failed("connection refused"));
        }
        Ok(Box::new(MockClient {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockClient {
    state: Arc<DirectoryState>,
}

#[async_trait]
impl DirectoryClient for MockClient {
    async fn paged_search(
        &mut self,
        _base: &str,
        _filter: &str,
        _page_size: u32,
        cursor: &PageCursor,
    ) -> ConnectorResult<SearchPage> {
        self.state.search_call_count.fetch_add(1, Ordering::SeqCst);

        let index = if cursor.is_empty() {
            0
        } else {
            std::str::from_utf8(cursor.as_bytes())
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| ConnectorError::invalid_cursor("unknown cursor"))?
        };
        if index == self.state.fail_search_at.load(Ordering::SeqCst) {
            return Err(ConnectorError::network("connection reset by peer"));
        }

        if let Some((code, remaining)) = self.state.search_result_failures.lock().unwrap().as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ConnectorError::SearchFailed {
                    code: *code,
                    message: "server refused the search".to_string(),
                });
            }
        }

        let pages = self.state.pages.lock().unwrap();
        let records = pages.get(index).cloned().unwrap_or_default();
        let next_cursor = if index + 1 < pages.len() {
            PageCursor::from_bytes((index + 1).to_string().into_bytes())
        } else {
            PageCursor::end()
        };
        Ok(SearchPage::new(records, next_cursor))
    }

    async fn change_listen(
        &mut self,
        _base: &str,
        _filter: &str,
        _attributes: &[String],
    ) -> ConnectorResult<ChangeStream> {
        self.state.listen_call_count.fetch_add(1, Ordering::SeqCst);
        let session = self
            .state
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ChangeSession {
                events: Vec::new(),
                keep_open: true,
            });

        let (tx, stream) = ChangeStream::channel(16);
        let producer = tokio::spawn(async move {
            for event in session.events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            if session.keep_open {
                tx.closed().await;
            }
        });
        Ok(stream.with_producer(producer.abort_handle()))
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        self.state.close_call_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Recording Stores
// =============================================================================

/// In-memory identity store that counts calls and can fail upserts.
#[derive(Default)]
pub struct RecordingIdentityStore {
    inner: InMemoryIdentityStore,
    upsert_sizes: Mutex<Vec<usize>>,
    fail_upsert_call: AtomicUsize, // 1-based call number, 0 = never
    create_call_count: AtomicUsize,
    update_call_count: AtomicUsize,
    fail_writes: AtomicBool,
}

impl RecordingIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            inner: InMemoryIdentityStore::with_identities(identities),
            ..Self::default()
        }
    }

    /// Fail the `n`-th upsert call (1-based).
    pub fn fail_upsert_call(&self, n: usize) {
        self.fail_upsert_call.store(n, Ordering::SeqCst);
    }

    /// Fail every create and update.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_sizes.lock().unwrap().len()
    }

    pub fn upsert_sizes(&self) -> Vec<usize> {
        self.upsert_sizes.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.create_call_count.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_call_count.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Vec<Identity> {
        self.inner.snapshot().await
    }

    pub async fn by_username(&self, username: &str) -> Option<Identity> {
        self.inner.get_user_by_username(username).await.unwrap()
    }
}

#[async_trait]
impl IdentityStore for RecordingIdentityStore {
    async fn create_user(&self, identity: Identity) -> StoreResult<Identity> {
        self.create_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("database is read-only"));
        }
        self.inner.create_user(identity).await
    }

    async fn update_user(&self, identity: Identity) -> StoreResult<Identity> {
        self.update_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("database is read-only"));
        }
        self.inner.update_user(identity).await
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<Identity>> {
        self.inner.get_user_by_username(username).await
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        self.inner.get_user_by_email(email).await
    }

    async fn get_user_by_external_id(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> StoreResult<Option<Identity>> {
        self.inner
            .get_user_by_external_id(source_id, external_id)
            .await
    }

    async fn upsert_batch(&self, identities: Vec<Identity>) -> StoreResult<usize> {
        let call = {
            let mut sizes = self.upsert_sizes.lock().unwrap();
            sizes.push(identities.len());
            sizes.len()
        };
        if call == self.fail_upsert_call.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("connection pool exhausted"));
        }
        self.inner.upsert_batch(identities).await
    }

    async fn list_users(&self, page: Pagination) -> StoreResult<Vec<Identity>> {
        self.inner.list_users(page).await
    }
}

/// In-memory sync state store that records every call.
#[derive(Default)]
pub struct RecordingSyncStateStore {
    inner: InMemorySyncStateStore,
    progress: Mutex<Vec<u64>>,
    started_call_count: AtomicUsize,
    completed_call_count: AtomicUsize,
    failed_call_count: AtomicUsize,
}

impl RecordingSyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress_history(&self) -> Vec<u64> {
        self.progress.lock().unwrap().clone()
    }

    pub fn started_calls(&self) -> usize {
        self.started_call_count.load(Ordering::SeqCst)
    }

    pub fn completed_calls(&self) -> usize {
        self.completed_call_count.load(Ordering::SeqCst)
    }

    pub fn failed_calls(&self) -> usize {
        self.failed_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncStateStore for RecordingSyncStateStore {
    async fn get_last_sync_state(&self, source_id: &str) -> StoreResult<Option<SyncState>> {
        self.inner.get_last_sync_state(source_id).await
    }

    async fn mark_started(&self, source_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.started_call_count.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_started(source_id, at).await
    }

    async fn update_progress(&self, source_id: &str, records_processed: u64) -> StoreResult<()> {
        self.progress.lock().unwrap().push(records_processed);
        self.inner.update_progress(source_id, records_processed).await
    }

    async fn mark_completed(
        &self,
        source_id: &str,
        at: DateTime<Utc>,
        records_processed: u64,
    ) -> StoreResult<()> {
        self.completed_call_count.fetch_add(1, Ordering::SeqCst);
        self.inner
            .mark_completed(source_id, at, records_processed)
            .await
    }

    async fn mark_failed(&self, source_id: &str, error: &str) -> StoreResult<()> {
        self.failed_call_count.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_failed(source_id, error).await
    }
}

// =============================================================================
// Recording Metrics
// =============================================================================

#[derive(Default)]
pub struct RecordingMetrics {
    pub durations: Mutex<Vec<SyncType>>,
    pub errors: Mutex<Vec<SyncStage>>,
    pub duplicates: Mutex<Vec<String>>,
    pub lags: Mutex<Vec<Duration>>,
}

impl RecordingMetrics {
    pub fn errors(&self) -> Vec<SyncStage> {
        self.errors.lock().unwrap().clone()
    }

    pub fn durations(&self) -> Vec<SyncType> {
        self.durations.lock().unwrap().clone()
    }
}

impl SyncMetrics for RecordingMetrics {
    fn record_sync_duration(&self, _source_id: &str, sync_type: SyncType, _duration: Duration) {
        self.durations.lock().unwrap().push(sync_type);
    }

    fn record_error(&self, _source_id: &str, stage: SyncStage) {
        self.errors.lock().unwrap().push(stage);
    }

    fn record_duplicate(&self, _source_id: &str, match_field: &str) {
        self.duplicates.lock().unwrap().push(match_field.to_string());
    }

    fn set_incremental_lag(&self, _source_id: &str, lag: Duration) {
        self.lags.lock().unwrap().push(lag);
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Directory entry with `uid`, `mail` and `cn`.
pub fn user_record(id: &str, uid: &str, mail: &str) -> ExternalRecord {
    ExternalRecord::new(id, format!("uid={uid},{BASE_DN}"))
        .with_attribute("uid", vec![uid.to_string()])
        .with_attribute("mail", vec![mail.to_string()])
        .with_attribute("cn", vec![uid.to_uppercase()])
}

/// `count` distinct users `user-000`, `user-001`, ...
pub fn numbered_records(count: usize) -> Vec<ExternalRecord> {
    (0..count)
        .map(|i| {
            let uid = format!("user-{i:03}");
            user_record(&format!("ext-{i:03}"), &uid, &format!("{uid}@example.com"))
        })
        .collect()
}

/// `uid` is the required username, `mail` the lowercased email, batches of 10.
pub fn test_config() -> SyncEngineConfig {
    let mut source = SourceConfig::new(SOURCE_ID, BASE_DN);
    source.attribute_map = vec![
        FieldMapping::new("uid", "username").required(),
        FieldMapping::new("mail", "email").with_transform(Transform::Lowercase),
        FieldMapping::new("telephoneNumber", "phone"),
    ];
    let mut config = SyncEngineConfig::new(source);
    config.batch_size = 10;
    config.concurrency_limit = 4;
    config
}

/// Orchestrator wired to mocks.
pub struct Harness {
    pub directory: MockDirectory,
    pub identities: Arc<RecordingIdentityStore>,
    pub sync_state: Arc<RecordingSyncStateStore>,
    pub metrics: Arc<RecordingMetrics>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl Harness {
    pub fn new(config: SyncEngineConfig) -> Self {
        Self::with_store(config, RecordingIdentityStore::new())
    }

    pub fn with_store(config: SyncEngineConfig, identities: RecordingIdentityStore) -> Self {
        let directory = MockDirectory::new();
        let identities = Arc::new(identities);
        let sync_state = Arc::new(RecordingSyncStateStore::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let orchestrator = SyncOrchestrator::new(
            config,
            Arc::new(directory.clone()),
            identities.clone(),
            sync_state.clone(),
            metrics.clone(),
        )
        .expect("valid test configuration");

        Self {
            directory,
            identities,
            sync_state,
            metrics,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub async fn sync_state(&self) -> SyncState {
        self.orchestrator
            .last_sync_state()
            .await
            .unwrap()
            .expect("sync state recorded")
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
