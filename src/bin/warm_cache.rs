//! Download the local zero-shot model into the hub cache and smoke-test it.
//!
//! Run once before starting the server with the `local` backend; the server
//! itself never downloads.

use std::path::Path;

use anyhow::Context;
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use secrecy::ExposeSecret;

use mail_triage::classifier::local::MODEL_FILES;
use mail_triage::classifier::{LocalClassifier, ZeroShotClassifier};
use mail_triage::config::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    let classifier_config = config.classifier;

    if Path::new(&classifier_config.model_id).is_dir() {
        tracing::info!(
            path = %classifier_config.model_id,
            "Model is a local directory; nothing to download"
        );
    } else {
        let mut builder = ApiBuilder::new().with_token(
            classifier_config
                .api_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
        );
        if let Some(dir) = &classifier_config.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        let api = builder.build().context("failed to build hub client")?;
        let repo = api.repo(Repo::with_revision(
            classifier_config.model_id.clone(),
            RepoType::Model,
            classifier_config.revision.clone(),
        ));

        for file in MODEL_FILES {
            let path = repo
                .get(file)
                .with_context(|| format!("failed to fetch {file} for {}", classifier_config.model_id))?;
            tracing::info!(file, path = %path.display(), "Cached");
        }
    }

    let load_config = classifier_config.clone();
    let classifier = tokio::task::spawn_blocking(move || LocalClassifier::load(&load_config))
        .await
        .context("model loader panicked")??;

    let candidates: Vec<String> = ["Spam", "Interested", "Out of Office"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let ranking = classifier
        .rank("Test email for classification", &candidates)
        .await
        .context("smoke classification failed")?;

    for scored in &ranking {
        tracing::info!(label = %scored.label, score = scored.score, "Smoke test");
    }
    println!(
        "Model {} downloaded and cached successfully.",
        classifier.model_id()
    );
    Ok(())
}
