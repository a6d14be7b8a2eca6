//! Request and response bodies for the HTTP surface.

use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};

use crate::classifier::Category;
use crate::error::ServiceError;

/// Body of `POST /predict`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictRequest {
    /// Email subject line. Absent and empty are treated alike.
    #[serde(default)]
    pub subject: Option<String>,
}

/// Successful `POST /predict` response.
#[derive(Debug, Clone, Serialize)]
pub struct PredictResponse {
    pub label: Category,
}

/// Body of `POST /parse`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParseRequest {
    /// Raw MIME email, headers included.
    #[serde(default)]
    pub raw: Option<String>,
}

/// Successful `POST /parse` response. `text` may be empty.
#[derive(Debug, Clone, Serialize)]
pub struct ParseResponse {
    pub text: String,
}

/// A body that does not deserialize into the request envelope is a client
/// error, reported in the usual `{ "error": ... }` shape.
pub fn reject_body(rejection: JsonRejection) -> ServiceError {
    ServiceError::validation(rejection.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CategorySet;

    #[test]
    fn missing_fields_deserialize_as_none() {
        let predict: PredictRequest = serde_json::from_str("{}").unwrap();
        assert!(predict.subject.is_none());

        let parse: ParseRequest = serde_json::from_str(r#"{"raw": null}"#).unwrap();
        assert!(parse.raw.is_none());
    }

    #[test]
    fn predict_response_wire_shape() {
        let categories = CategorySet::default();
        let response = PredictResponse {
            label: categories.get("Out of Office").unwrap().clone(),
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"label": "Out of Office"})
        );
    }
}
