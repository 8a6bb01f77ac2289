//! Identity resolution and persistence.
//!
//! The dispatcher talks to two collaborators: an [`IdentityProvider`] that
//! turns a bearer token into a caller, and an [`AnalysisStore`] holding
//! quota rows and analysis records. Both are owned by the hosting
//! backend; this module only defines the seam and two implementations.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::detection::{Detection, DetectionMethod};

pub use memory::InMemoryStore;
pub use supabase::SupabaseStore;

/// Errors raised by identity or persistence backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),

    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode store response: {0}")]
    Decode(String),

    #[error("store misconfigured: {0}")]
    Config(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// An authenticated caller.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    /// Token the caller authenticated with, forwarded on store calls so
    /// row-level policies apply to the caller.
    pub access_token: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            access_token: access_token.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Provider-call quota attached to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub used: u64,
    pub limit: u64,
}

impl QuotaState {
    pub fn new(used: u64, limit: u64) -> Self {
        Self { used, limit }
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}

/// Lifecycle status of a stored analysis. The dispatcher only ever writes
/// completed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Completed,
}

/// One persisted analysis. Inserted once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub file_id: String,
    pub user_id: String,
    pub status: AnalysisStatus,
    pub confidence_score: f64,
    pub is_deepfake: bool,
    pub detection_method: DetectionMethod,
    /// Opaque provider (or fallback) payload, stored as received.
    pub raw_result: Value,
    /// Whole seconds.
    pub processing_time: u64,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn completed(
        identity: &Identity,
        file_id: impl Into<String>,
        detection: &Detection,
        processing_time: u64,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            user_id: identity.user_id.clone(),
            status: AnalysisStatus::Completed,
            confidence_score: detection.confidence(),
            is_deepfake: detection.is_deepfake(),
            detection_method: detection.method(),
            raw_result: detection.raw_payload(),
            processing_time,
            created_at: Utc::now(),
        }
    }
}

/// Resolves request credentials to callers.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns `Ok(None)` when the token is not accepted.
    async fn resolve(&self, token: &str) -> StoreResult<Option<Identity>>;
}

/// Quota rows and analysis records.
///
/// `increment_quota` is a blind write of `observed.used + 1`: the read in
/// `quota` and this write are not isolated, so concurrent dispatches for the
/// same caller may lose increments.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Current quota, or `None` if the caller has no quota row.
    async fn quota(&self, identity: &Identity) -> StoreResult<Option<QuotaState>>;

    async fn increment_quota(&self, identity: &Identity, observed: QuotaState) -> StoreResult<()>;

    async fn insert_analysis(&self, identity: &Identity, record: &AnalysisRecord)
        -> StoreResult<()>;
}
