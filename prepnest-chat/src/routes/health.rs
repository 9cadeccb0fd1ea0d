use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use prepnest_shared::{HealthCheck, HealthResponse};
use std::sync::Arc;

use crate::AppState;

/// Health check probing the service's own dependencies (db pool, redis).
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let db_check = match state.db.get() {
        Ok(_) => HealthCheck::pass("postgres"),
        Err(e) => HealthCheck::fail("postgres", format!("{e}")),
    };

    // Redis only backs presence, so losing it degrades rather than fails.
    let redis_check = match state.redis.exists("health:probe").await {
        Ok(_) => HealthCheck::pass("redis"),
        Err(e) => HealthCheck::degraded("redis", format!("{e}")),
    };

    let response = HealthResponse::from_checks(
        "prepnest-chat",
        env!("CARGO_PKG_VERSION"),
        vec![db_check, redis_check],
    );

    let status = if response.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response)).into_response()
}

/// Returns Prometheus metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
