//! Hosted zero-shot backend.
//!
//! Talks to a Hugging Face style `zero-shot-classification` endpoint:
//! `POST {"inputs": ..., "parameters": {"candidate_labels": [...], "hypothesis_template": ...}}`.
//! HTTP calls are independent, so no serialization is needed here.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ScoredLabel, ZeroShotClassifier, sort_ranking};
use crate::config::{BackendKind, ClassifierConfig};
use crate::error::{ClassifierError, StartupError};

const BACKEND: &str = "remote";

#[derive(Debug, Serialize)]
struct ZeroShotRequest<'a> {
    inputs: &'a str,
    parameters: ZeroShotParameters<'a>,
}

#[derive(Debug, Serialize)]
struct ZeroShotParameters<'a> {
    candidate_labels: &'a [String],
    hypothesis_template: &'a str,
    multi_label: bool,
}

#[derive(Debug, Deserialize)]
struct LabelColumns {
    labels: Vec<String>,
    scores: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f32,
}

/// Response shapes seen from zero-shot endpoints.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ZeroShotResponse {
    Columns(LabelColumns),
    Batch(Vec<LabelColumns>),
    Pairs(Vec<LabelScore>),
}

/// Zero-shot classifier served over HTTP.
pub struct RemoteClassifier {
    client: reqwest::Client,
    url: reqwest::Url,
    api_token: Option<SecretString>,
    hypothesis_template: String,
}

impl std::fmt::Debug for RemoteClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClassifier")
            .field("url", &self.url.as_str())
            .field("hypothesis_template", &self.hypothesis_template)
            .field("authenticated", &self.api_token.is_some())
            .finish()
    }
}

impl RemoteClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, StartupError> {
        let backend_error = |reason: String| StartupError::Backend {
            backend: BackendKind::Remote.as_str().to_string(),
            reason,
        };

        let url = reqwest::Url::parse(&config.remote_url)
            .map_err(|e| backend_error(format!("invalid endpoint '{}': {e}", config.remote_url)))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| backend_error(format!("failed to build HTTP client: {e}")))?;

        tracing::info!(
            url = %url,
            model = %config.model_id,
            authenticated = config.api_token.is_some(),
            "Using remote zero-shot endpoint"
        );

        Ok(Self {
            client,
            url,
            api_token: config.api_token.clone(),
            hypothesis_template: config.hypothesis_template.clone(),
        })
    }
}

#[async_trait]
impl ZeroShotClassifier for RemoteClassifier {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn rank(
        &self,
        text: &str,
        candidates: &[String],
    ) -> Result<Vec<ScoredLabel>, ClassifierError> {
        let body = ZeroShotRequest {
            inputs: text,
            parameters: ZeroShotParameters {
                candidate_labels: candidates,
                hypothesis_template: &self.hypothesis_template,
                multi_label: false,
            },
        };

        let mut request = self.client.post(self.url.clone()).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| ClassifierError::Request {
            backend: BACKEND.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ClassifierError::Request {
            backend: BACKEND.to_string(),
            reason: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            return Err(ClassifierError::Request {
                backend: BACKEND.to_string(),
                reason: format!("HTTP {status}: {}", text.trim()),
            });
        }

        parse_ranking(&text)
    }
}

/// Decode an endpoint response into a ranking, highest score first.
fn parse_ranking(body: &str) -> Result<Vec<ScoredLabel>, ClassifierError> {
    let invalid = |reason: String| ClassifierError::InvalidResponse {
        backend: BACKEND.to_string(),
        reason,
    };

    let parsed: ZeroShotResponse =
        serde_json::from_str(body).map_err(|e| invalid(format!("unexpected body: {e}")))?;

    let mut ranking = match parsed {
        ZeroShotResponse::Pairs(pairs) => pairs
            .into_iter()
            .map(|p| ScoredLabel::new(p.label, p.score))
            .collect(),
        ZeroShotResponse::Columns(columns) => from_columns(columns).map_err(invalid)?,
        ZeroShotResponse::Batch(mut batch) => {
            if batch.len() != 1 {
                return Err(invalid(format!(
                    "expected one result, got {}",
                    batch.len()
                )));
            }
            from_columns(batch.remove(0)).map_err(invalid)?
        }
    };

    sort_ranking(&mut ranking);
    Ok(ranking)
}

fn from_columns(columns: LabelColumns) -> Result<Vec<ScoredLabel>, String> {
    if columns.labels.len() != columns.scores.len() {
        return Err(format!(
            "{} labels but {} scores",
            columns.labels.len(),
            columns.scores.len()
        ));
    }
    Ok(columns
        .labels
        .into_iter()
        .zip(columns.scores)
        .map(|(label, score)| ScoredLabel::new(label, score))
        .collect())
}
