//! Error types for mail-triage.

use std::path::PathBuf;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Message returned when `/predict` is called without a usable subject.
pub const MISSING_SUBJECT: &str = "Missing subject";

/// Message returned when `/parse` is called without a raw email.
pub const MISSING_RAW: &str = "Missing 'raw' field";

/// Request-scoped outcome of a failed operation.
///
/// Every public operation resolves to either its success value or one of
/// these; the HTTP layer turns it into `{ "error": ... }` with the matching
/// status code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// A required field is missing or empty. Never reaches a backend.
    #[error("{0}")]
    Validation(String),

    /// The MIME parser or the classifier failed. Not retried.
    #[error("{0}")]
    Processing(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Wire shape of every failure response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Faults raised by a zero-shot classifier backend.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Backend {backend} request failed: {reason}")]
    Request { backend: String, reason: String },

    #[error("Invalid response from {backend}: {reason}")]
    InvalidResponse { backend: String, reason: String },

    #[error("Classifier worker failed: {0}")]
    Worker(String),
}

impl From<ClassifierError> for ServiceError {
    fn from(err: ClassifierError) -> Self {
        Self::Processing(err.to_string())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Fatal errors raised before the service accepts requests.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model {model_id} is not in the local cache (missing {file}); run warm-cache first")]
    ModelNotFound { model_id: String, file: String },

    #[error("Failed to load model from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Failed to build classifier backend {backend}: {reason}")]
    Backend { backend: String, reason: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ServiceError::validation(MISSING_SUBJECT);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Missing subject");
    }

    #[test]
    fn classifier_fault_becomes_processing_error() {
        let err: ServiceError = ClassifierError::Inference("out of memory".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Inference failed: out of memory");
    }

    #[test]
    fn model_not_found_names_the_file() {
        let err = StartupError::ModelNotFound {
            model_id: "org/model".into(),
            file: "tokenizer.json".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("org/model"));
        assert!(msg.contains("tokenizer.json"));
    }
}
