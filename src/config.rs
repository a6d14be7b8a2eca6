//! Configuration types.
//!
//! Everything is read once from the environment at startup. Parsing goes
//! through a lookup closure so tests can feed a map instead of touching the
//! process environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::classifier::CategorySet;
use crate::error::ConfigError;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";
pub const DEFAULT_LOCAL_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_REMOTE_MODEL: &str = "facebook/bart-large-mnli";
pub const DEFAULT_HYPOTHESIS: &str = "This email is {}.";
pub const DEFAULT_REMOTE_BASE: &str = "https://api-inference.huggingface.co/models";

/// Which zero-shot backend serves classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// On-device encoder loaded from the local model cache.
    Local,
    /// Hosted zero-shot inference endpoint.
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(format!("unknown backend '{other}' (expected 'local' or 'remote')")),
        }
    }
}

/// Settings for the classifier backend.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub backend: BackendKind,
    /// Hub identifier of the model, e.g. `facebook/bart-large-mnli`.
    pub model_id: String,
    pub revision: String,
    /// Root of the model cache. `None` uses the hub default location.
    pub cache_dir: Option<PathBuf>,
    /// Zero-shot hypothesis; `{}` is replaced by the candidate label.
    pub hypothesis_template: String,
    pub max_seq_length: usize,
    pub remote_url: String,
    pub api_token: Option<SecretString>,
    pub request_timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            model_id: DEFAULT_LOCAL_MODEL.to_string(),
            revision: "main".to_string(),
            cache_dir: None,
            hypothesis_template: DEFAULT_HYPOTHESIS.to_string(),
            max_seq_length: 256,
            remote_url: format!("{DEFAULT_REMOTE_BASE}/{DEFAULT_REMOTE_MODEL}"),
            api_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// The single origin allowed to call the API from a browser.
    pub allowed_origin: String,
    pub categories: CategorySet,
    pub classifier: ClassifierConfig,
}

impl ServiceConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = parse_value(
            "MAIL_TRIAGE_BIND_ADDR",
            get("MAIL_TRIAGE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        )?;

        let allowed_origin = get("MAIL_TRIAGE_ALLOWED_ORIGIN")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGIN.to_string());
        if axum::http::HeaderValue::from_str(&allowed_origin).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "MAIL_TRIAGE_ALLOWED_ORIGIN".into(),
                message: format!("'{allowed_origin}' is not a valid header value"),
            });
        }

        let categories = match lookup("MAIL_TRIAGE_CATEGORIES") {
            Some(raw) => {
                let labels: Vec<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                CategorySet::new(labels).map_err(|message| ConfigError::InvalidValue {
                    key: "MAIL_TRIAGE_CATEGORIES".into(),
                    message,
                })?
            }
            None => CategorySet::default(),
        };

        let backend: BackendKind = match get("MAIL_TRIAGE_BACKEND") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "MAIL_TRIAGE_BACKEND".into(),
                message,
            })?,
            None => BackendKind::Local,
        };

        let model_id = get("MAIL_TRIAGE_MODEL_ID").unwrap_or_else(|| match backend {
            BackendKind::Local => DEFAULT_LOCAL_MODEL.to_string(),
            BackendKind::Remote => DEFAULT_REMOTE_MODEL.to_string(),
        });

        let hypothesis_template =
            get("MAIL_TRIAGE_HYPOTHESIS").unwrap_or_else(|| DEFAULT_HYPOTHESIS.to_string());
        if !hypothesis_template.contains("{}") {
            return Err(ConfigError::InvalidValue {
                key: "MAIL_TRIAGE_HYPOTHESIS".into(),
                message: "template must contain '{}' where the label goes".into(),
            });
        }

        let max_seq_length: usize = match get("MAIL_TRIAGE_MAX_SEQ_LEN") {
            Some(raw) => parse_value("MAIL_TRIAGE_MAX_SEQ_LEN", raw)?,
            None => 256,
        };
        if max_seq_length == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAIL_TRIAGE_MAX_SEQ_LEN".into(),
                message: "must be greater than zero".into(),
            });
        }

        let timeout_secs: u64 = match get("MAIL_TRIAGE_REQUEST_TIMEOUT_SECS") {
            Some(raw) => parse_value("MAIL_TRIAGE_REQUEST_TIMEOUT_SECS", raw)?,
            None => 30,
        };

        let remote_url = get("MAIL_TRIAGE_REMOTE_URL")
            .unwrap_or_else(|| format!("{DEFAULT_REMOTE_BASE}/{model_id}"));

        let api_token = get("MAIL_TRIAGE_API_TOKEN")
            .or_else(|| get("HF_TOKEN"))
            .map(SecretString::from);

        Ok(Self {
            bind_addr,
            allowed_origin,
            categories,
            classifier: ClassifierConfig {
                backend,
                model_id,
                revision: get("MAIL_TRIAGE_MODEL_REVISION").unwrap_or_else(|| "main".to_string()),
                cache_dir: get("MAIL_TRIAGE_CACHE_DIR").map(PathBuf::from),
                hypothesis_template,
                max_seq_length,
                remote_url,
                api_token,
                request_timeout: Duration::from_secs(timeout_secs),
            },
        })
    }
}

/// Substitute `label` into the first `{}` of a hypothesis template.
pub fn render_hypothesis(template: &str, label: &str) -> String {
    template.replacen("{}", label, 1)
}

fn parse_value<T>(key: &str, raw: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}
