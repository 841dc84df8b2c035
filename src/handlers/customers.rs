//! Customer HTTP handlers.
//!
//! - GET /api/customers - List active customers
//! - POST /api/customers - Create customer
//! - GET /api/customers/{id} - Get customer
//! - PUT /api/customers/{id} - Replace customer fields
//! - DELETE /api/customers/{id} - Soft-delete customer

use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::customer::{CustomerRequest, CustomerResponse},
    state::AppState,
};

/// List active customers, oldest first.
pub async fn list_customers(
    State(state): State<AppState>,
) -> Result<Json<Vec<CustomerResponse>>, AppError> {
    let customers = state.customers.list().await?;
    Ok(Json(customers.into_iter().map(Into::into).collect()))
}

/// Create a customer.
///
/// # Endpoint
///
/// `POST /api/customers`
///
/// # Request Body
///
/// ```json
/// {
///   "first_name": "ana",
///   "last_name": "pérez",
///   "national_id": "30.123.456",
///   "email": "ana.perez@example.com"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the stored customer, names upper-cased and
///   the national id reduced to digits
/// - **Error (422)**: invalid field, or national id / email already taken
pub async fn create_customer(
    State(state): State<AppState>,
    body: Result<Json<CustomerRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CustomerResponse>), AppError> {
    let Json(request) = body?;
    let customer = state.customers.create(request).await?;
    Ok((StatusCode::CREATED, Json(customer.into())))
}

/// Get an active customer by ID.
///
/// Returns 404 `customer_not_found` for unknown and soft-deleted customers.
pub async fn get_customer(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<CustomerResponse>, AppError> {
    let Path(id) = id?;
    let customer = state.customers.get(id).await?;
    Ok(Json(customer.into()))
}

/// Replace every field of a customer. Same body and rules as creation.
pub async fn update_customer(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<CustomerRequest>, JsonRejection>,
) -> Result<Json<CustomerResponse>, AppError> {
    let Path(id) = id?;
    let Json(request) = body?;
    let customer = state.customers.update(id, request).await?;
    Ok(Json(customer.into()))
}

/// Soft-delete a customer. Responds 204 No Content.
pub async fn delete_customer(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = id?;
    state.customers.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
