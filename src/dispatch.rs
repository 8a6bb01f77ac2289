//! Analysis dispatcher.
//!
//! Routes one analysis request to the detection provider or the fallback
//! generator, persists exactly one record, and shapes the response.
//!
//! Routing:
//! 1. resolve the caller, or fail `Unauthorized`
//! 2. quota exhausted (or no quota row): fallback, provider untouched
//! 3. otherwise call the provider once; success bumps the quota counter,
//!    any failure drops to the fallback tagged `fallback_api_error`
//!
//! The quota read and the later increment are not isolated from other
//! dispatches for the same caller. If the request is abandoned between the
//! increment and the insert, the counter moves without a record.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::detection::{
    Detection, DetectionProvider, DetectionSummary, FallbackReason, ProviderRequest,
};
use crate::error::{DispatchError, DispatchResult};
use crate::store::{AnalysisRecord, AnalysisStore, Identity, IdentityProvider};

/// Inbound request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub file_url: String,
    pub file_name: String,
    /// Declared MIME type, forwarded to the provider as-is
    pub file_type: String,
    pub file_id: String,
}

/// Successful dispatch response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub success: bool,
    pub result: DetectionSummary,
    /// `"reality_defender"` or `"fallback"`
    pub method: String,
    /// Whole seconds
    pub processing_time: u64,
}

impl AnalysisResponse {
    fn from_detection(detection: &Detection, processing_time: u64) -> Self {
        Self {
            success: true,
            result: detection.summary(),
            method: detection.method().response_method().to_string(),
            processing_time,
        }
    }
}

/// Stateless request router shared by all requests.
pub struct Dispatcher {
    identities: Arc<dyn IdentityProvider>,
    store: Arc<dyn AnalysisStore>,
    provider: Option<Arc<dyn DetectionProvider>>,
}

impl Dispatcher {
    /// Dispatcher without a provider: callers with quota left get a
    /// configuration error until one is attached.
    pub fn new(identities: Arc<dyn IdentityProvider>, store: Arc<dyn AnalysisStore>) -> Self {
        Self {
            identities,
            store,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn DetectionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_optional_provider(mut self, provider: Option<Arc<dyn DetectionProvider>>) -> Self {
        self.provider = provider;
        self
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Resolve the bearer token to a caller.
    pub async fn authenticate(&self, token: Option<&str>) -> DispatchResult<Identity> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(DispatchError::Unauthorized)?;

        self.identities
            .resolve(token)
            .await?
            .ok_or(DispatchError::Unauthorized)
    }

    /// Full request handling: authenticate, parse the body, dispatch.
    ///
    /// Authentication happens before the body is looked at, so an
    /// unauthenticated caller never learns anything about body validation.
    pub async fn handle(
        &self,
        token: Option<&str>,
        body: &[u8],
    ) -> DispatchResult<AnalysisResponse> {
        let started = Instant::now();

        let identity = self.authenticate(token).await?;
        let request: AnalysisRequest = serde_json::from_slice(body)
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;

        self.dispatch(&identity, &request, started).await
    }

    async fn dispatch(
        &self,
        identity: &Identity,
        request: &AnalysisRequest,
        started: Instant,
    ) -> DispatchResult<AnalysisResponse> {
        tracing::info!(
            user_id = %identity.user_id,
            file_id = %request.file_id,
            file_name = %request.file_name,
            file_type = %request.file_type,
            "Starting analysis"
        );

        let detection = self.detect(identity, request).await?;
        let processing_time = whole_seconds(started.elapsed());

        let record =
            AnalysisRecord::completed(identity, &request.file_id, &detection, processing_time);
        self.store.insert_analysis(identity, &record).await?;

        tracing::info!(
            user_id = %identity.user_id,
            file_id = %request.file_id,
            method = %detection.method(),
            is_deepfake = detection.is_deepfake(),
            confidence = detection.confidence(),
            processing_time,
            "Analysis completed"
        );

        Ok(AnalysisResponse::from_detection(&detection, processing_time))
    }

    async fn detect(
        &self,
        identity: &Identity,
        request: &AnalysisRequest,
    ) -> DispatchResult<Detection> {
        let quota = match self.store.quota(identity).await? {
            Some(quota) if !quota.is_exhausted() => quota,
            quota => {
                tracing::info!(
                    user_id = %identity.user_id,
                    quota = ?quota,
                    "API quota exceeded, using fallback detection"
                );
                return Ok(Detection::fallback(FallbackReason::QuotaExhausted));
            }
        };

        let provider = self.provider.as_ref().ok_or_else(|| {
            DispatchError::Configuration(
                "detection provider API key not configured (set REALITY_DEFENDER_API_KEY)"
                    .to_string(),
            )
        })?;

        tracing::debug!(
            provider = provider.name(),
            remaining = quota.remaining(),
            "Using detection provider"
        );

        let provider_request =
            ProviderRequest::deepfake_detection(&request.file_url, &request.file_type);
        match provider.analyze(&provider_request).await {
            Ok(response) => {
                self.store.increment_quota(identity, quota).await?;
                Ok(Detection::Provider(response))
            }
            Err(e) => {
                tracing::warn!(
                    provider = provider.name(),
                    error = %e,
                    "Detection provider failed, using fallback"
                );
                Ok(Detection::fallback(FallbackReason::ProviderFailed))
            }
        }
    }
}

/// Round an elapsed duration to the nearest whole second.
fn whole_seconds(elapsed: Duration) -> u64 {
    elapsed.as_secs_f64().round() as u64
}
