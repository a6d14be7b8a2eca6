//! Zero-shot email classification.
//!
//! The model itself is an opaque capability behind [`ZeroShotClassifier`]:
//! given a text and candidate labels it returns the labels ranked by
//! descending score. [`ClassificationService`] owns the fixed category set
//! and applies the selection policy (top-ranked label wins, no threshold).
//!
//! Backends:
//! - **local**: BERT-family encoder run on-device via candle
//! - **remote**: hosted zero-shot inference endpoint over HTTP

pub mod local;
pub mod remote;

pub use local::LocalClassifier;
pub use remote::RemoteClassifier;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, Serializer};

use crate::config::{BackendKind, ClassifierConfig};
use crate::error::{ClassifierError, MISSING_SUBJECT, ServiceError, StartupError};

/// Labels used when no category list is configured.
pub const DEFAULT_CATEGORIES: [&str; 5] = [
    "Interested",
    "Not Interested",
    "Meeting Booked",
    "Spam",
    "Out of Office",
];

/// One member of the configured category set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Category(Arc<str>);

impl Category {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Ordered, duplicate-free set of categories. Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySet {
    categories: Vec<Category>,
}

impl CategorySet {
    /// Build a set from labels, preserving order.
    ///
    /// Rejects an empty list, blank labels and duplicates (compared
    /// case-insensitively, since a model cannot tell them apart).
    pub fn new<I, S>(labels: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut categories: Vec<Category> = Vec::new();
        for label in labels {
            let label = label.as_ref().trim();
            if label.is_empty() {
                return Err("category labels must not be blank".to_string());
            }
            if categories
                .iter()
                .any(|c| c.as_str().eq_ignore_ascii_case(label))
            {
                return Err(format!("duplicate category '{label}'"));
            }
            categories.push(Category(Arc::from(label)));
        }
        if categories.is_empty() {
            return Err("at least one category is required".to_string());
        }
        Ok(Self { categories })
    }

    /// Find the category whose label matches exactly.
    pub fn get(&self, label: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.as_str() == label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.categories.iter().map(Category::as_str).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Category> {
        self.categories.iter()
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self {
            categories: DEFAULT_CATEGORIES
                .iter()
                .map(|label| Category(Arc::from(*label)))
                .collect(),
        }
    }
}

/// A candidate label with its probability-like score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredLabel {
    pub label: String,
    pub score: f32,
}

impl ScoredLabel {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Order a ranking by descending score.
///
/// The sort is stable, so equal scores keep the candidate order the
/// backend produced them in.
pub fn sort_ranking(ranking: &mut [ScoredLabel]) {
    ranking.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Zero-shot text classification capability.
///
/// Implementations must be callable concurrently through a shared
/// reference. A backend whose model is not safe for concurrent use
/// serializes access internally.
#[async_trait]
pub trait ZeroShotClassifier: Send + Sync {
    /// Backend name, for logs and the health endpoint.
    fn name(&self) -> &str;

    /// Score `text` against every candidate, highest score first.
    async fn rank(
        &self,
        text: &str,
        candidates: &[String],
    ) -> Result<Vec<ScoredLabel>, ClassifierError>;
}

/// Process-wide handle to the loaded classifier.
///
/// Constructed once at startup and shared read-only by every request.
pub type ClassifierHandle = Arc<dyn ZeroShotClassifier>;

/// Build the configured backend. Failures here are fatal startup faults.
pub async fn load_classifier(config: &ClassifierConfig) -> Result<ClassifierHandle, StartupError> {
    match config.backend {
        BackendKind::Local => {
            let config = config.clone();
            let classifier = tokio::task::spawn_blocking(move || LocalClassifier::load(&config))
                .await
                .map_err(|e| StartupError::Backend {
                    backend: BackendKind::Local.as_str().to_string(),
                    reason: e.to_string(),
                })??;
            Ok(Arc::new(classifier))
        }
        BackendKind::Remote => Ok(Arc::new(RemoteClassifier::new(config)?)),
    }
}

/// Selects the single best category for an email subject.
pub struct ClassificationService {
    classifier: ClassifierHandle,
    categories: CategorySet,
    candidates: Vec<String>,
}

impl ClassificationService {
    pub fn new(classifier: ClassifierHandle, categories: CategorySet) -> Self {
        let candidates = categories.iter().map(|c| c.as_str().to_string()).collect();
        Self {
            classifier,
            categories,
            candidates,
        }
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    pub fn backend_name(&self) -> &str {
        self.classifier.name()
    }

    /// Classify a subject line into one of the configured categories.
    ///
    /// A blank subject is rejected before the model is consulted. The
    /// label at rank 0 wins; a ranking that is empty or names a label
    /// outside the category set is a processing fault.
    pub async fn classify(&self, subject: &str) -> Result<Category, ServiceError> {
        if subject.trim().is_empty() {
            return Err(ServiceError::validation(MISSING_SUBJECT));
        }

        let ranking = self.classifier.rank(subject, &self.candidates).await?;

        let top = ranking.first().ok_or_else(|| {
            ServiceError::processing(format!(
                "classifier {} returned no labels",
                self.classifier.name()
            ))
        })?;

        self.categories.get(&top.label).cloned().ok_or_else(|| {
            ServiceError::processing(format!(
                "classifier {} returned unknown label '{}'",
                self.classifier.name(),
                top.label
            ))
        })
    }
}
