//! Lookups for sibling services, behind the service token gate.

use axum::{
    Extension, Json,
    extract::{Path, State, rejection::PathRejection},
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::internal::ServiceCaller,
    models::{customer::CustomerResponse, order::OrderResponse},
    state::AppState,
};

/// `GET /api/internal/customers/{id}`
pub async fn get_customer(
    State(state): State<AppState>,
    Extension(ServiceCaller(service)): Extension<ServiceCaller>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<CustomerResponse>, AppError> {
    let Path(id) = id?;
    tracing::debug!(service, customer_id = %id, "internal customer lookup");
    let customer = state.customers.get(id).await?;
    Ok(Json(customer.into()))
}

/// `GET /api/internal/orders/{id}`. Active orders only.
pub async fn get_order(
    State(state): State<AppState>,
    Extension(ServiceCaller(service)): Extension<ServiceCaller>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    let Path(id) = id?;
    tracing::debug!(service, order_id = %id, "internal order lookup");
    let details = state.orders.get(id, false).await?;
    Ok(Json(details.into()))
}
