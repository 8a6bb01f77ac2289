//! Supabase-backed identity and analysis store.
//!
//! Uses the hosted REST surface directly:
//! - `GET  /auth/v1/user` to resolve the caller's access token
//! - `GET  /rest/v1/profiles` for the quota row
//! - `PATCH /rest/v1/profiles` for the quota counter
//! - `POST /rest/v1/analyses` to append records
//!
//! Every call carries the project's anon key in `apikey` and the caller's
//! own token in `Authorization`, so row-level security sees the caller.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    AnalysisRecord, AnalysisStore, Identity, IdentityProvider, QuotaState, StoreError, StoreResult,
};
use crate::config::StoreConfig;

const PROFILES_TABLE: &str = "profiles";
const ANALYSES_TABLE: &str = "analyses";

/// REST client for a Supabase project.
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseStore {
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        timeout: Duration,
    ) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        })
    }

    /// Build from configuration. Both the URL and the anon key are required.
    pub fn from_config(config: &StoreConfig, timeout: Duration) -> StoreResult<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            StoreError::Config("store URL not set (SUPABASE_URL)".to_string())
        })?;
        let anon_key = config.anon_key.as_deref().ok_or_else(|| {
            StoreError::Config("store anon key not set (SUPABASE_ANON_KEY)".to_string())
        })?;
        Self::new(url, anon_key, timeout)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Attach the project key and the caller's token.
    fn authorized(&self, builder: RequestBuilder, access_token: &str) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
    }

    async fn send(builder: RequestBuilder) -> StoreResult<Response> {
        builder
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))
    }

    /// Turn a non-2xx response into a status error.
    async fn ensure_success(response: Response) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// `GET /auth/v1/user` response (only the fields we read).
#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Quota columns of a profile row. Nullable in the schema.
#[derive(Debug, Deserialize)]
struct ProfileQuotaRow {
    api_quota_used: Option<u64>,
    api_quota_limit: Option<u64>,
}

impl From<ProfileQuotaRow> for QuotaState {
    fn from(row: ProfileQuotaRow) -> Self {
        QuotaState::new(
            row.api_quota_used.unwrap_or(0),
            row.api_quota_limit.unwrap_or(0),
        )
    }
}

#[derive(Debug, Serialize)]
struct QuotaUpdate {
    api_quota_used: u64,
}

#[async_trait]
impl IdentityProvider for SupabaseStore {
    async fn resolve(&self, token: &str) -> StoreResult<Option<Identity>> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let response = Self::send(self.authorized(self.client.get(url), token)).await?;

        // Expired, forged and malformed tokens all come back as 4xx.
        if response.status().is_client_error() {
            return Ok(None);
        }

        let user: AuthUser = Self::ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(Some(Identity {
            user_id: user.id,
            email: user.email,
            access_token: token.to_string(),
        }))
    }
}

#[async_trait]
impl AnalysisStore for SupabaseStore {
    async fn quota(&self, identity: &Identity) -> StoreResult<Option<QuotaState>> {
        let user_filter = format!("eq.{}", identity.user_id);
        let request = self
            .client
            .get(self.table_url(PROFILES_TABLE))
            .query(&[
                ("id", user_filter.as_str()),
                ("select", "api_quota_used,api_quota_limit"),
            ]);
        let response = Self::send(self.authorized(request, &identity.access_token)).await?;

        let rows: Vec<ProfileQuotaRow> = Self::ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(rows.into_iter().next().map(QuotaState::from))
    }

    async fn increment_quota(&self, identity: &Identity, observed: QuotaState) -> StoreResult<()> {
        let user_filter = format!("eq.{}", identity.user_id);
        let request = self
            .client
            .patch(self.table_url(PROFILES_TABLE))
            .query(&[("id", user_filter.as_str())])
            .header("Prefer", "return=minimal")
            .json(&QuotaUpdate {
                api_quota_used: observed.used + 1,
            });

        let response = Self::send(self.authorized(request, &identity.access_token)).await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn insert_analysis(
        &self,
        identity: &Identity,
        record: &AnalysisRecord,
    ) -> StoreResult<()> {
        let request = self
            .client
            .post(self.table_url(ANALYSES_TABLE))
            .header("Prefer", "return=minimal")
            .json(record);

        let response = Self::send(self.authorized(request, &identity.access_token)).await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}
