use std::sync::Arc;
use std::time::Duration;
use tempora::api::{self, app_state::AppState};
use tempora::config::loader::ConfigLoader;
use tempora::context::{ContextCache, HttpContextLoader};
use tempora::observability::{
    AppMetrics, ObservabilityState, create_observability_router, init_tracing,
};
use tempora::services::create_temporal_query_service;
use tempora::storage::StorageFactory;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load()?;
    ConfigLoader::validate(&config)?;
    init_tracing(&config.logging)?;
    info!(
        app = %config.app_name,
        environment = %config.environment,
        "Configuration loaded successfully"
    );

    let repository = StorageFactory::create(&config.database).await?;
    info!(backend = ?config.database.backend, "Temporal repository initialized");

    let loader = HttpContextLoader::new(Duration::from_millis(config.context.fetch_timeout_ms))?;
    let ttl = (config.context.ttl_secs > 0).then(|| Duration::from_secs(config.context.ttl_secs));
    let contexts = Arc::new(ContextCache::new(
        Arc::new(loader),
        config.context.capacity,
        ttl,
    ));
    info!(
        core = %config.context.core_context_url,
        capacity = config.context.capacity,
        "Context cache initialized"
    );

    let temporal_service = create_temporal_query_service(
        repository,
        contexts,
        config.query.clone(),
        &config.context.core_context_url,
    );

    let metrics = Arc::new(AppMetrics::default());
    let app_state = AppState::new(temporal_service, metrics.clone());
    let observability_state = Arc::new(ObservabilityState::new(
        metrics,
        env!("CARGO_PKG_VERSION"),
    ));
    let router =
        create_observability_router(observability_state).merge(api::create_router(app_state));
    info!("API router created with observability endpoints");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, router).await?;

    Ok(())
}
