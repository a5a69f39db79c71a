// Unauthenticated infrastructure routes
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::database;
use crate::state::AppState;

pub async fn service_banner() -> impl IntoResponse {
    Json(json!({
        "service": "hivegrid-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Liveness with a database ping. The pool connects lazily, so a fresh
/// process without a reachable database reports degraded here instead of
/// failing to boot.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match database::health_check(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "database": "connected" })),
        ),
        Err(err) => {
            tracing::warn!("health check failed: {}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unreachable" })),
            )
        }
    }
}
