//! HTTP surface: `/predict`, `/parse` and `/health`.
//!
//! Handlers validate and delegate; the only mapping done here is turning a
//! [`ServiceError`] into its status code and `{ "error": ... }` body.

pub mod envelope;

pub use envelope::{ParseRequest, ParseResponse, PredictRequest, PredictResponse};

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method, header},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::classifier::ClassificationService;
use crate::error::{ConfigError, ServiceError};
use crate::extract::extract_plain_text;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<ClassificationService>,
}

/// Build the router with CORS restricted to `allowed_origin`.
pub fn router(
    classifier: Arc<ClassificationService>,
    allowed_origin: &str,
) -> Result<Router, ConfigError> {
    let cors = cors_layer(allowed_origin)?;
    let state = AppState { classifier };

    Ok(Router::new()
        .route("/predict", post(predict))
        .route("/parse", post(parse))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state))
}

/// CORS policy admitting a single origin.
pub fn cors_layer(allowed_origin: &str) -> Result<CorsLayer, ConfigError> {
    let origin = HeaderValue::from_str(allowed_origin).map_err(|e| ConfigError::InvalidValue {
        key: "MAIL_TRIAGE_ALLOWED_ORIGIN".into(),
        message: e.to_string(),
    })?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mail-triage",
        "backend": state.classifier.backend_name(),
        "categories": state.classifier.categories().labels(),
    }))
}

// ── Classification ──────────────────────────────────────────────────────

async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ServiceError> {
    let Json(request) = payload
        .map_err(envelope::reject_body)
        .inspect_err(|e| log_failure("predict", e))?;
    let subject = request.subject.unwrap_or_default();
    debug!(chars = subject.chars().count(), "Classifying subject");

    let label = state
        .classifier
        .classify(&subject)
        .await
        .inspect_err(|e| log_failure("predict", e))?;

    info!(label = %label, "Subject classified");
    Ok(Json(PredictResponse { label }))
}

// ── MIME parsing ────────────────────────────────────────────────────────

async fn parse(
    payload: Result<Json<ParseRequest>, JsonRejection>,
) -> Result<Json<ParseResponse>, ServiceError> {
    let Json(request) = payload
        .map_err(envelope::reject_body)
        .inspect_err(|e| log_failure("parse", e))?;
    let raw = request.raw.unwrap_or_default();
    debug!(bytes = raw.len(), "Parsing raw email");

    // CPU-bound. A parser panic comes back as a join error.
    let text = tokio::task::spawn_blocking(move || extract_plain_text(&raw))
        .await
        .map_err(|e| ServiceError::processing(format!("MIME parser failed: {e}")))
        .and_then(|result| result)
        .inspect_err(|e| log_failure("parse", e))?;

    info!(chars = text.chars().count(), "Email body extracted");
    Ok(Json(ParseResponse { text }))
}

fn log_failure(endpoint: &str, err: &ServiceError) {
    match err {
        ServiceError::Validation(message) => warn!(endpoint, %message, "Rejected request"),
        ServiceError::Processing(message) => error!(endpoint, %message, "Request failed"),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::classifier::{CategorySet, ScoredLabel, ZeroShotClassifier};
    use crate::error::ClassifierError;

    struct AlwaysSpam;

    #[async_trait]
    impl ZeroShotClassifier for AlwaysSpam {
        fn name(&self) -> &str {
            "always-spam"
        }

        async fn rank(
            &self,
            _text: &str,
            _candidates: &[String],
        ) -> Result<Vec<ScoredLabel>, ClassifierError> {
            Ok(vec![ScoredLabel::new("Spam", 1.0)])
        }
    }

    fn app() -> Router {
        let service = ClassificationService::new(Arc::new(AlwaysSpam), CategorySet::default());
        router(Arc::new(service), "http://localhost:5173").unwrap()
    }

    async fn post_json(uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn predict_returns_label() {
        let (status, body) = post_json("/predict", r#"{"subject": "Buy now!!!"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"label": "Spam"}));
    }

    #[tokio::test]
    async fn predict_without_subject_is_bad_request() {
        let (status, body) = post_json("/predict", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing subject");
    }

    #[tokio::test]
    async fn parse_without_raw_is_bad_request() {
        let (status, body) = post_json("/parse", r#"{"raw": ""}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing 'raw' field");
    }

    #[tokio::test]
    async fn malformed_json_gets_error_envelope() {
        let (status, body) = post_json("/predict", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some_and(|m| !m.is_empty()));
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin_only() {
        let preflight = |origin: &'static str| {
            Request::builder()
                .method("OPTIONS")
                .uri("/predict")
                .header("origin", origin)
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap()
        };

        let allowed = app().oneshot(preflight("http://localhost:5173")).await.unwrap();
        assert_eq!(
            allowed.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:5173"
        );

        // A fixed origin is echoed as configured; the browser rejects the mismatch.
        let denied = app().oneshot(preflight("http://evil.example")).await.unwrap();
        let echoed = denied.headers().get("access-control-allow-origin").unwrap();
        assert_eq!(echoed, "http://localhost:5173");
        assert_ne!(echoed, "http://evil.example");
    }

    #[test]
    fn invalid_origin_is_a_config_error() {
        assert!(cors_layer("bad\norigin").is_err());
    }
}
