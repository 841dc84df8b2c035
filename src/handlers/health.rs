//! Health check endpoints for service monitoring.

use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{db, state::AppState};

/// Health check response.
///
/// Returns service status and database connectivity.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: &'static str,

    /// Database connection status (`connected`, `disconnected` or `in-memory`)
    pub database: &'static str,

    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Checks
///
/// - Database connectivity (executes simple query)
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "timestamp": "2025-08-01T19:00:00Z"
/// }
/// ```
///
/// # Response (503 Service Unavailable)
///
/// Same body with `"status": "unhealthy"` and `"database": "disconnected"`.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, database) = match &state.pool {
        None => (StatusCode::OK, "in-memory"),
        Some(pool) => match db::ping(pool).await {
            Ok(()) => (StatusCode::OK, "connected"),
            Err(e) => {
                tracing::error!(error = %e, "database health check failed");
                (StatusCode::SERVICE_UNAVAILABLE, "disconnected")
            }
        },
    };

    let body = HealthResponse {
        status: if status.is_success() { "healthy" } else { "unhealthy" },
        database,
        timestamp: Utc::now(),
    };
    (status, Json(body))
}

/// Products service connectivity response.
#[derive(Debug, Serialize)]
pub struct PricingHealthResponse {
    pub status: &'static str,
    pub products_service: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Whether orders can currently be priced.
///
/// # Endpoint
///
/// `GET /api/orders/health`
///
/// # Response
///
/// - **200 OK**: products service answered its health endpoint
/// - **503 Service Unavailable**: it did not
///
/// ```json
/// {
///   "status": "healthy",
///   "products_service": "reachable",
///   "timestamp": "2025-08-01T19:00:00Z"
/// }
/// ```
pub async fn pricing_health(
    State(state): State<AppState>,
) -> (StatusCode, Json<PricingHealthResponse>) {
    let reachable = state.pricing.check_connectivity().await;
    if !reachable {
        tracing::warn!("products service unreachable");
    }

    let (status, body) = if reachable {
        (
            StatusCode::OK,
            PricingHealthResponse {
                status: "healthy",
                products_service: "reachable",
                timestamp: Utc::now(),
            },
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            PricingHealthResponse {
                status: "unhealthy",
                products_service: "unreachable",
                timestamp: Utc::now(),
            },
        )
    };
    (status, Json(body))
}
