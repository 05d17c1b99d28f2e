use anyhow::Result;
use epi_belts::BeltClassifier;
use std::sync::Arc;
use survey_rollup::JsonFileStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod routes;

use config::GatewayConfig;
use routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "survey_gateway=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env();

    let classifier = match &config.belts_path {
        Some(path) => BeltClassifier::from_path(path)?,
        None => BeltClassifier::with_defaults(),
    };
    tracing::info!("   Belt tables: {}", classifier.tables_version());
    for overlap in classifier.overlaps() {
        tracing::warn!(
            "   {} listed in {:?}, resolved to {}",
            overlap.governorate, overlap.listed_in, overlap.resolved_to
        );
    }

    let store = JsonFileStore::new(&config.snapshot_path);
    let state = AppState::new(Arc::new(store), classifier, config.commit_attempts);

    // Fail fast on a corrupt document
    let snapshot = state.repo.snapshot()?;
    tracing::info!(
        "   Snapshot {} at v{}: {} regions, {} surveys",
        config.snapshot_path.display(),
        snapshot.version,
        snapshot.regions.len(),
        snapshot.survey_count()
    );

    let app = routes::app(state);
    let addr = config.bind_addr();

    tracing::info!("Survey Gateway starting on {}", addr);
    tracing::info!("   Commit attempts: {}", config.commit_attempts);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
