//! HTTP API server for the lock manager and saga orchestrator.
//!
//! Provides REST endpoints for distributed locks and saga execution,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use common::{SharedClock, SystemClock};
use lock_manager::LockManager;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryStepInvoker, SagaOrchestrator, StepInvoker};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub locks: LockManager,
    pub sagas: SagaOrchestrator,
    /// Applied to saga steps submitted without a timeout.
    pub default_step_timeout: Duration,
}

impl AppState {
    /// Builds the services on `clock`, dispatching saga steps to `invoker`.
    pub fn new(config: &Config, clock: SharedClock, invoker: Arc<dyn StepInvoker>) -> Self {
        Self {
            locks: LockManager::with_max_ttl(clock.clone(), config.max_lock_ttl),
            sagas: SagaOrchestrator::with_max_step_timeout(invoker, clock, config.max_step_timeout),
            default_step_timeout: config.default_step_timeout,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/ready", get(routes::health::ready))
        .route("/live", get(routes::health::live))
        .route("/api/v1/locks", post(routes::locks::acquire))
        .route(
            "/api/v1/locks/{key}",
            get(routes::locks::status).delete(routes::locks::release),
        )
        .route("/api/v1/sagas", post(routes::sagas::start))
        .route("/api/v1/sagas/{id}", get(routes::sagas::status))
        .route("/api/v1/sagas/{id}/events", get(routes::sagas::events))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state on the system clock with an
/// in-memory step invoker.
pub fn create_default_state(config: &Config) -> Arc<AppState> {
    Arc::new(AppState::new(
        config,
        SystemClock::shared(),
        Arc::new(InMemoryStepInvoker::new()),
    ))
}
