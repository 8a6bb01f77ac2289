//! HTTP surface of the dispatcher.
//!
//! Routes:
//! - `GET  /health`
//! - `POST /analyze` (also mounted at `/functions/v1/analyze-deepfake` for
//!   clients still pointing at the old function path)
//!
//! Browser callers get permissive CORS; preflights are answered by the CORS
//! layer and never reach the dispatcher.

use axum::{
    body::Bytes,
    extract::State,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, HeaderName, Method,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::dispatch::{AnalysisResponse, Dispatcher};
use crate::error::DispatchError;

/// Service name reported by the health endpoint.
pub const SERVICE_NAME: &str = "deepcheck";

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// Whether a detection provider credential is configured
    pub provider_configured: bool,
}

/// CORS policy: any origin, plus the headers browser clients send.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ])
}

/// Build the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/analyze", post(analyze_handler))
        .route("/functions/v1/analyze-deepfake", post(analyze_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// GET /health
///
/// Liveness only: the process answering is the whole check.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider_configured: state.dispatcher.has_provider(),
    })
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// POST /analyze
///
/// The body is taken raw so that malformed JSON is reported through the
/// same `{success: false}` envelope as every other failure.
pub async fn analyze_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AnalysisResponse>, DispatchError> {
    match state.dispatcher.handle(bearer_token(&headers), &body).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            tracing::error!(kind = ?e.kind(), error = %e, "Error in analyze handler");
            Err(e)
        }
    }
}

/// Bind and serve until ctrl-c / SIGTERM.
pub async fn serve(config: &ServerConfig, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.socket_addr()).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureResponse;
    use crate::store::{InMemoryStore, QuotaState};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn create_test_state(quota: QuotaState) -> AppState {
        let store = Arc::new(InMemoryStore::new().with_user("tok", "user-1", quota));
        AppState::new(Dispatcher::new(store.clone(), store))
    }

    const BODY: &str = r#"{"fileUrl": "https://cdn/x.jpg", "fileName": "x.jpg", "fileType": "image/jpeg", "fileId": "f-1"}"#;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(AUTHORIZATION, "bearer   spaced ".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("spaced"));

        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(create_test_state(QuotaState::new(0, 1)));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.service, "deepcheck");
        assert!(!health.provider_configured);
    }

    #[tokio::test]
    async fn test_analyze_fallback_over_http() {
        let app = create_router(create_test_state(QuotaState::new(1, 1)));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/analyze")
                    .header("Content-Type", "application/json")
                    .header("Authorization", "Bearer tok")
                    .body(Body::from(BODY))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 4096)
            .await
            .unwrap();
        let result: AnalysisResponse = serde_json::from_slice(&body).unwrap();
        assert!(result.success);
        assert_eq!(result.method, "fallback");
    }

    #[tokio::test]
    async fn test_legacy_function_path() {
        let app = create_router(create_test_state(QuotaState::new(1, 1)));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/functions/v1/analyze-deepfake")
                    .header("Authorization", "Bearer tok")
                    .body(Body::from(BODY))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_analyze_without_credentials() {
        let app = create_router(create_test_state(QuotaState::new(0, 1)));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/analyze")
                    .header("Content-Type", "application/json")
                    .body(Body::from(BODY))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let failure: FailureResponse = serde_json::from_slice(&body).unwrap();
        assert!(!failure.success);
        assert_eq!(failure.error, "Unauthorized");
    }

    #[tokio::test]
    async fn test_analyze_invalid_json() {
        let app = create_router(create_test_state(QuotaState::new(0, 1)));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/analyze")
                    .header("Authorization", "Bearer tok")
                    .body(Body::from("not valid json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let failure: FailureResponse = serde_json::from_slice(&body).unwrap();
        assert!(failure.error.starts_with("Invalid request body"));
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let app = create_router(create_test_state(QuotaState::new(0, 1)));

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/analyze")
                    .header("Origin", "https://app.example.com")
                    .header("Access-Control-Request-Method", "POST")
                    .header(
                        "Access-Control-Request-Headers",
                        "authorization, content-type, x-client-info, apikey",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        let allowed = response
            .headers()
            .get("access-control-allow-headers")
            .unwrap()
            .to_str()
            .unwrap()
            .to_lowercase();
        assert!(allowed.contains("x-client-info"));
        assert!(allowed.contains("apikey"));
    }

    #[tokio::test]
    async fn test_error_responses_carry_cors_headers() {
        let app = create_router(create_test_state(QuotaState::new(0, 1)));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/analyze")
                    .header("Origin", "https://app.example.com")
                    .body(Body::from(BODY))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }
}
