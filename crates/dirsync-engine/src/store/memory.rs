//! In-memory store implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use dirsync_core::{Identity, IdentityId};

use super::{
    IdentityStore, Pagination, StoreError, StoreResult, SyncRunStatus, SyncState, SyncStateStore,
};

/// Identity store backed by an ordered map keyed by identity id.
///
/// Usernames are unique; creating a second identity with the same username
/// fails with [`StoreError::Conflict`].
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    identities: RwLock<BTreeMap<IdentityId, Identity>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing identities.
    pub fn with_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            identities: RwLock::new(identities.into_iter().map(|i| (i.id, i)).collect()),
        }
    }

    /// Copy of every stored identity, in id order.
    pub async fn snapshot(&self) -> Vec<Identity> {
        self.identities.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.identities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.identities.read().await.is_empty()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn create_user(&self, identity: Identity) -> StoreResult<Identity> {
        let mut identities = self.identities.write().await;
        if identities.contains_key(&identity.id) {
            return Err(StoreError::Conflict {
                field: "id",
                value: identity.id.to_string(),
            });
        }
        if !identity.username.is_empty()
            && identities.values().any(|i| i.username == identity.username)
        {
            return Err(StoreError::Conflict {
                field: "username",
                value: identity.username,
            });
        }
        identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn update_user(&self, identity: Identity) -> StoreResult<Identity> {
        let mut identities = self.identities.write().await;
        match identities.get_mut(&identity.id) {
            Some(existing) => {
                *existing = identity.clone();
                Ok(identity)
            }
            None => Err(StoreError::not_found("identity", identity.id.to_string())),
        }
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<Identity>> {
        let identities = self.identities.read().await;
        Ok(identities.values().find(|i| i.username == username).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        let identities = self.identities.read().await;
        Ok(identities
            .values()
            .find(|i| i.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_user_by_external_id(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> StoreResult<Option<Identity>> {
        let identities = self.identities.read().await;
        Ok(identities
            .values()
            .find(|i| i.is_linked_to(source_id) && i.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn upsert_batch(&self, batch: Vec<Identity>) -> StoreResult<usize> {
        let mut identities = self.identities.write().await;
        let written = batch.len();
        for identity in batch {
            identities.insert(identity.id, identity);
        }
        Ok(written)
    }

    async fn list_users(&self, page: Pagination) -> StoreResult<Vec<Identity>> {
        let identities = self.identities.read().await;
        Ok(identities
            .values()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }
}

/// Sync-state store keeping one [`SyncState`] per source.
#[derive(Debug, Default)]
pub struct InMemorySyncStateStore {
    states: RwLock<HashMap<String, SyncState>>,
}

impl InMemorySyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn upsert<F>(&self, source_id: &str, update: F)
    where
        F: FnOnce(&mut SyncState) + Send,
    {
        let mut states = self.states.write().await;
        let state = states
            .entry(source_id.to_string())
            .or_insert_with(|| SyncState::new(source_id));
        update(state);
    }
}

#[async_trait]
impl SyncStateStore for InMemorySyncStateStore {
    async fn get_last_sync_state(&self, source_id: &str) -> StoreResult<Option<SyncState>> {
        Ok(self.states.read().await.get(source_id).cloned())
    }

    async fn mark_started(&self, source_id: &str, _at: DateTime<Utc>) -> StoreResult<()> {
        self.upsert(source_id, |state| {
            state.status = SyncRunStatus::Running;
            state.records_processed = 0;
            state.last_error = None;
        })
        .await;
        Ok(())
    }

    async fn update_progress(&self, source_id: &str, records_processed: u64) -> StoreResult<()> {
        self.upsert(source_id, |state| {
            state.records_processed = records_processed;
        })
        .await;
        Ok(())
    }

    async fn mark_completed(
        &self,
        source_id: &str,
        at: DateTime<Utc>,
        records_processed: u64,
    ) -> StoreResult<()> {
        self.upsert(source_id, |state| {
            state.status = SyncRunStatus::Completed;
            state.last_sync_at = Some(at);
            state.records_processed = records_processed;
            state.last_error = None;
        })
        .await;
        Ok(())
    }

    async fn mark_failed(&self, source_id: &str, error: &str) -> StoreResult<()> {
        let error = error.to_string();
        self.upsert(source_id, move |state| {
            state.status = SyncRunStatus::Failed;
            state.last_error = Some(error);
        })
        .await;
        Ok(())
    }
}
