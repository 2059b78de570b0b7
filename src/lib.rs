pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod partition;
pub mod report;
pub mod shutdown;
pub mod source;
pub mod state;

pub use config::{CliArgs, DatabaseConfig, ServerConfig};
pub use error::{AnalyticsError, AnalyticsResult, ErrorCode};
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use report::ReportSettings;
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};
pub use source::{MemoryRowSource, PostgresRowSource, RowSource};
pub use state::AppState;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method, StatusCode, header},
    routing::get,
};
use shutdown::{CompositeShutdownHandler, RowSourceShutdownHandler};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Report, health and metrics routes over shared state. CORS and request
/// tracing are layered on by [`run_server`].
pub fn build_router(state: Arc<AppState>) -> Router {
    let health_checker = Arc::new(health::HealthChecker::new(state.clone()));
    let health_routes = Router::new()
        .route("/health", get(health::liveness_handler))
        .route("/ready", get(health::readiness_handler))
        .route("/health/components", get(health::components_handler))
        .with_state(health_checker);

    api::report_routes()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(health_routes)
}

/// Browsers on the configured origins may issue GET requests.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("invalid CORS origin '{origin}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]))
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let source: Arc<dyn RowSource> = Arc::new(PostgresRowSource::connect_lazy(
        &config.database,
        config.max_connections,
        config.fetch_timeout,
    ));
    let state = Arc::new(AppState::new(config.report_settings(), source.clone()));

    tracing::info!(
        database = %format!("{}:{}/{}", config.database.host, config.database.port, config.database.name),
        years = ?config.supported_years,
        max_connections = config.max_connections,
        "starting sales analytics server",
    );

    let shutdown_config =
        ShutdownConfig::default().with_total_timeout(config.graceful_shutdown_timeout_secs);
    let coordinator = Arc::new(ShutdownCoordinator::new(shutdown_config));

    let mut composite_handler = CompositeShutdownHandler::new(coordinator.handler_timeout());
    composite_handler.add_handler(Box::new(RowSourceShutdownHandler::new(source)));

    let router = build_router(state)
        .layer(cors_layer(&config.cors_origins)?)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(config.http_bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind_address))?;
    let actual_addr = listener.local_addr()?;
    tracing::info!(bind = %actual_addr, "listening");

    let shutdown_coordinator = coordinator.clone();
    let server_result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_coordinator.wait_for_signal().await;
        })
        .await;

    tracing::info!("server stopped, running shutdown handlers");
    if let Err(e) = coordinator.shutdown(&composite_handler).await {
        tracing::error!("error during shutdown: {:#}", e);
    }
    tracing::info!(phase = %coordinator.phase(), "shutdown finished");

    server_result.map_err(anyhow::Error::from)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        metrics::METRICS.encode(),
    )
}
