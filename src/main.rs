use axum::{
    routing::{get, post},
    Router,
};
use ribalta::application::handlers::rebalance_handler::{
    add_position, create_model, get_model, health, rebalance_model, rebalance_portfolio,
};
use ribalta::application::handlers::AppState;
use ribalta::application::services::rebalance_orchestrator::RebalanceOrchestrator;
use ribalta::config::RebalanceConfig;
use ribalta::domain::services::optimization::OptimizationEngine;
use ribalta::infrastructure::position_client::HttpPositionClient;
use ribalta::infrastructure::price_client::HttpPriceClient;
use ribalta::infrastructure::resilience::RetryPolicy;
use ribalta::infrastructure::ttl_cache::TtlCache;
use ribalta::persistence::repository::{SqliteModelRepository, SqliteRebalanceStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ribalta=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = RebalanceConfig::from_env();
    info!(
        "Rebalancing service starting (solver timeout {}s, max concurrency {}, deadline {}s)",
        config.solver_timeout_seconds,
        config.max_rebalance_concurrency,
        config.portfolio_deadline_seconds
    );

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://data/ribalta.db".to_string());
    let pool = ribalta::persistence::init_database(&database_url).await?;

    let position_base = std::env::var("POSITION_SERVICE_URL")
        .unwrap_or_else(|_| "http://localhost:8081".to_string());
    let price_base = std::env::var("PRICE_SERVICE_URL")
        .unwrap_or_else(|_| "http://localhost:8082".to_string());

    let retry = RetryPolicy::from_config(&config);
    let price_cache = Arc::new(TtlCache::new(
        Duration::from_secs(config.price_cache_ttl_seconds),
        config.price_cache_capacity,
    ));

    let positions = Arc::new(HttpPositionClient::new(position_base, retry.clone()));
    let prices = Arc::new(HttpPriceClient::new(price_base, retry, price_cache));
    let models = Arc::new(SqliteModelRepository::new(pool.clone()));
    let store = Arc::new(SqliteRebalanceStore::new(pool));
    let engine = Arc::new(OptimizationEngine::new(config.solver_timeout()));

    let orchestrator = Arc::new(RebalanceOrchestrator::new(
        positions,
        prices,
        models.clone(),
        store.clone(),
        engine,
        config,
    ));

    let state = AppState {
        orchestrator,
        models,
        store,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/models", post(create_model))
        .route("/models/:id", get(get_model))
        .route("/models/:id/positions", post(add_position))
        .route("/models/:id/rebalance", post(rebalance_model))
        .route("/portfolios/:portfolio_id/rebalance", post(rebalance_portfolio))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    server.with_graceful_shutdown(shutdown_signal).await?;
    info!("Server shutting down gracefully...");
    Ok(())
}
