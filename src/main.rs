use std::sync::Arc;

use mail_triage::api;
use mail_triage::classifier::{ClassificationService, load_classifier};
use mail_triage::config::ServiceConfig;
use mail_triage::error::StartupError;

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env()?;

    eprintln!("📬 Mail Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", config.classifier.backend.as_str());
    eprintln!("   Model: {}", config.classifier.model_id);
    eprintln!("   Categories: {}", config.categories.labels().join(", "));
    eprintln!("   Allowed origin: {}", config.allowed_origin);

    // ── Classifier ──────────────────────────────────────────────────────
    // Loaded exactly once; every request shares this handle.
    let classifier = load_classifier(&config.classifier).await.inspect_err(|e| {
        tracing::error!(error = %e, "Classifier failed to initialize");
    })?;
    let service = Arc::new(ClassificationService::new(
        classifier,
        config.categories.clone(),
    ));

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = api::router(service, &config.allowed_origin)?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: config.bind_addr.to_string(),
            source,
        })?;

    eprintln!("   Predict: http://{}/predict", config.bind_addr);
    eprintln!("   Parse:   http://{}/parse\n", config.bind_addr);
    tracing::info!(addr = %config.bind_addr, "Mail triage server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve)?;

    tracing::info!("Mail triage server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
