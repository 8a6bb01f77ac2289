//! In-process identity and analysis store.
//!
//! Backs local runs (`deepcheck serve --memory-store`) and tests. State is
//! lost when the process exits.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{AnalysisRecord, AnalysisStore, Identity, IdentityProvider, QuotaState, StoreResult};

/// Store keeping tokens, quotas and records in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// Accepted bearer tokens mapped to user ids
    tokens: RwLock<HashMap<String, String>>,
    /// Quota rows by user id
    quotas: RwLock<HashMap<String, QuotaState>>,
    records: RwLock<Vec<AnalysisRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user reachable through `token`, with a quota row.
    pub fn with_user(
        mut self,
        token: impl Into<String>,
        user_id: impl Into<String>,
        quota: QuotaState,
    ) -> Self {
        let user_id = user_id.into();
        self.tokens.get_mut().insert(token.into(), user_id.clone());
        self.quotas.get_mut().insert(user_id, quota);
        self
    }

    /// Register a user that has no quota row.
    pub fn with_user_without_quota(
        mut self,
        token: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        self.tokens.get_mut().insert(token.into(), user_id.into());
        self
    }

    pub async fn quota_for(&self, user_id: &str) -> Option<QuotaState> {
        self.quotas.read().await.get(user_id).copied()
    }

    pub async fn set_quota(&self, user_id: impl Into<String>, quota: QuotaState) {
        self.quotas.write().await.insert(user_id.into(), quota);
    }

    /// Snapshot of all inserted records, oldest first.
    pub async fn records(&self) -> Vec<AnalysisRecord> {
        self.records.read().await.clone()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryStore {
    async fn resolve(&self, token: &str) -> StoreResult<Option<Identity>> {
        let tokens = self.tokens.read().await;
        Ok(tokens
            .get(token)
            .map(|user_id| Identity::new(user_id.clone(), token)))
    }
}

#[async_trait]
impl AnalysisStore for InMemoryStore {
    async fn quota(&self, identity: &Identity) -> StoreResult<Option<QuotaState>> {
        Ok(self.quota_for(&identity.user_id).await)
    }

    async fn increment_quota(&self, identity: &Identity, observed: QuotaState) -> StoreResult<()> {
        let mut quotas = self.quotas.write().await;
        quotas.insert(
            identity.user_id.clone(),
            QuotaState::new(observed.used + 1, observed.limit),
        );
        Ok(())
    }

    async fn insert_analysis(
        &self,
        _identity: &Identity,
        record: &AnalysisRecord,
    ) -> StoreResult<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}
