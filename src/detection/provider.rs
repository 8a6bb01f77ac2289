//! External detection provider.
//!
//! The dispatcher only sees the [`DetectionProvider`] trait; the production
//! implementation talks to the Reality Defender HTTP API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ProviderConfig;

/// Analysis type sent with every provider request.
pub const DEEPFAKE_ANALYSIS: &str = "deepfake_detection";

/// Error type for provider calls.
///
/// None of these reach the caller of the dispatcher; they select the
/// `fallback_api_error` path instead.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider request failed: {0}")]
    Network(String),

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("failed to build provider client: {0}")]
    Client(String),
}

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Body sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub url: String,
    pub file_type: String,
    pub analysis_type: String,
}

impl ProviderRequest {
    pub fn deepfake_detection(url: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_type: file_type.into(),
            analysis_type: DEEPFAKE_ANALYSIS.to_string(),
        }
    }
}

/// The fields of a provider response the dispatcher relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderVerdict {
    pub prediction: String,
    pub confidence: f64,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detailed_analysis: Option<Value>,
}

impl ProviderVerdict {
    /// The provider flags a deepfake by mentioning it in the prediction text.
    pub fn is_deepfake(&self) -> bool {
        self.prediction.to_lowercase().contains("deepfake")
    }
}

/// A successful provider answer: the typed verdict plus the body exactly as
/// the provider sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub verdict: ProviderVerdict,
    pub raw: Value,
}

impl ProviderResponse {
    /// Decode a provider body, keeping the untouched JSON alongside.
    pub fn from_raw(raw: Value) -> ProviderResult<Self> {
        let verdict = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(Self { verdict, raw })
    }
}

/// A deepfake detection backend.
#[async_trait]
pub trait DetectionProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// Submit one file for analysis. Called at most once per dispatch.
    async fn analyze(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse>;
}

/// Reality Defender HTTP client.
pub struct RealityDefenderProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl RealityDefenderProvider {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl DetectionProvider for RealityDefenderProvider {
    fn name(&self) -> &str {
        "reality_defender"
    }

    async fn analyze(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        ProviderResponse::from_raw(raw)
    }
}

/// Build the configured provider, or `None` when no credential is set.
/// A blank key counts as unset.
pub fn provider_from_config(
    config: &ProviderConfig,
) -> ProviderResult<Option<Arc<dyn DetectionProvider>>> {
    let Some(api_key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        return Ok(None);
    };

    let provider = RealityDefenderProvider::new(api_key, &config.endpoint, config.timeout())?;
    Ok(Some(Arc::new(provider)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use serde_json::json;
    use std::sync::Mutex;

    /// Serve `router` on an ephemeral local port and return its base URL.
    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn provider_for(base: &str) -> RealityDefenderProvider {
        RealityDefenderProvider::new(
            "rd-test-key",
            format!("{}/v1/analyze", base),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_provider_request_shape() {
        let request = ProviderRequest::deepfake_detection("https://cdn/x.mp4", "video/mp4");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({
                "url": "https://cdn/x.mp4",
                "file_type": "video/mp4",
                "analysis_type": "deepfake_detection"
            })
        );
    }

    #[test]
    fn test_is_deepfake_case_insensitive() {
        let verdict = |prediction: &str| ProviderVerdict {
            prediction: prediction.to_string(),
            confidence: 0.9,
            processing_time: None,
            detailed_analysis: None,
        };

        assert!(verdict("DeepFake detected").is_deepfake());
        assert!(verdict("likely DEEPFAKE").is_deepfake());
        assert!(verdict("deepfake").is_deepfake());
        assert!(!verdict("Authentic Content").is_deepfake());
        assert!(!verdict("deep fake").is_deepfake());
    }

    #[test]
    fn test_from_raw_keeps_unknown_fields() {
        let raw = json!({
            "prediction": "Authentic Content",
            "confidence": 0.95,
            "processing_time": 1.2,
            "model_version": "rd-7"
        });

        let response = ProviderResponse::from_raw(raw.clone()).unwrap();
        assert_eq!(response.verdict.prediction, "Authentic Content");
        assert_eq!(response.verdict.processing_time, Some(1.2));
        assert!(response.verdict.detailed_analysis.is_none());
        assert_eq!(response.raw, raw);
    }

    #[test]
    fn test_from_raw_rejects_missing_prediction() {
        let result = ProviderResponse::from_raw(json!({ "confidence": 0.5 }));
        assert!(matches!(result, Err(ProviderError::Decode(_))));
    }

    #[test]
    fn test_provider_from_config_without_key() {
        let config = ProviderConfig::default();
        assert!(provider_from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_provider_from_config_blank_key() {
        for blank in ["", "   "] {
            let config = ProviderConfig {
                api_key: Some(blank.to_string()),
                ..ProviderConfig::default()
            };
            assert!(provider_from_config(&config).unwrap().is_none());
        }
    }

    #[test]
    fn test_provider_from_config_with_key() {
        let config = ProviderConfig {
            api_key: Some("rd-key".to_string()),
            ..ProviderConfig::default()
        };
        let provider = provider_from_config(&config).unwrap().unwrap();
        assert_eq!(provider.name(), "reality_defender");
    }

    #[tokio::test]
    async fn test_analyze_success_sends_bearer_and_body() {
        let seen: Arc<Mutex<Option<(String, Value)>>> = Arc::new(Mutex::new(None));
        let captured = seen.clone();

        let router = Router::new().route(
            "/v1/analyze",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    *captured.lock().unwrap() = Some((auth, body));
                    Json(json!({
                        "prediction": "Deepfake Detected",
                        "confidence": 0.91,
                        "processing_time": 2.5,
                        "detailed_analysis": { "faces": 1 }
                    }))
                }
            }),
        );
        let base = spawn_server(router).await;

        let provider = provider_for(&base);
        let request = ProviderRequest::deepfake_detection("https://cdn/a.png", "image/png");
        let response = provider.analyze(&request).await.unwrap();

        assert!(response.verdict.is_deepfake());
        assert_eq!(response.verdict.confidence, 0.91);
        assert_eq!(response.raw["detailed_analysis"]["faces"], 1);

        let (auth, body) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(auth, "Bearer rd-test-key");
        assert_eq!(body["url"], "https://cdn/a.png");
        assert_eq!(body["analysis_type"], "deepfake_detection");
    }

    #[tokio::test]
    async fn test_analyze_non_success_status() {
        let router = Router::new().route(
            "/v1/analyze",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        );
        let base = spawn_server(router).await;

        let provider = provider_for(&base);
        let request = ProviderRequest::deepfake_detection("https://cdn/a.png", "image/png");
        let err = provider.analyze(&request).await.unwrap_err();

        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_analyze_undecodable_body() {
        let router = Router::new().route("/v1/analyze", post(|| async { "not json" }));
        let base = spawn_server(router).await;

        let provider = provider_for(&base);
        let request = ProviderRequest::deepfake_detection("https://cdn/a.png", "image/png");
        let err = provider.analyze(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn test_analyze_network_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = provider_for(&format!("http://{}", addr));
        let request = ProviderRequest::deepfake_detection("https://cdn/a.png", "image/png");
        let err = provider.analyze(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }
}
