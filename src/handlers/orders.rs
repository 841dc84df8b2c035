//! Order HTTP handlers.
//!
//! This module implements the order endpoints:
//! - GET /api/orders - Paginated, filtered listing
//! - POST /api/orders - Create an order priced by the products service
//! - GET /api/orders/stats - Aggregate statistics
//! - GET /api/orders/{id} - Get order (optionally soft-deleted)
//! - PUT /api/orders/{id} - Replace order and all of its items
//! - DELETE /api/orders/{id} - Soft-delete order and items
//!
//! Clients never send prices or totals: every line is priced remotely at
//! write time and the total is the sum of those prices.

use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::order::{
        OrderListFilter, OrderListQuery, OrderRequest, OrderResponse, OrderShowQuery, Page,
        StatisticsPeriod, StatisticsResponse, StatsFilter,
    },
    state::AppState,
};

/// List active orders.
///
/// # Endpoint
///
/// `GET /api/orders?customer_id=...&date_from=2025-08-01&date_to=2025-08-31&payment_method=card&page=1&per_page=20`
///
/// Every filter is optional. `payment_method` is a case-insensitive
/// substring match. Newest orders come first.
///
/// # Response
///
/// ```json
/// {
///   "data": [ { "id": "...", "total_cents": 12000000, ... } ],
///   "page": 1,
///   "per_page": 20,
///   "total": 1
/// }
/// ```
pub async fn list_orders(
    State(state): State<AppState>,
    query: Result<Query<OrderListQuery>, QueryRejection>,
) -> Result<Json<Page<OrderResponse>>, AppError> {
    let Query(query) = query?;
    let filter = OrderListFilter::from(query);
    check_period(filter.date_from, filter.date_to)?;

    let (orders, total) = state.orders.list(&filter).await?;
    Ok(Json(Page {
        data: orders.into_iter().map(Into::into).collect(),
        page: filter.page,
        per_page: filter.per_page,
        total,
    }))
}

/// Create an order.
///
/// # Endpoint
///
/// `POST /api/orders`
///
/// # Request Body
///
/// ```json
/// {
///   "date": "2025-08-01",
///   "payment_method": "credit card",
///   "customer_id": "550e8400-e29b-41d4-a716-446655440000",
///   "items": [
///     { "product_id": 1, "kind": "service" },
///     { "product_id": 2, "kind": "bundle" }
///   ]
/// }
/// ```
///
/// # Process
///
/// 1. Validate the body (422 on failure)
/// 2. Check the customer exists (404 `customer_not_found`)
/// 3. Price every item; any failure aborts with nothing written
/// 4. Store the order and its items in one transaction
///
/// # Response
///
/// - **Success (201 Created)**: the order with customer and items
/// - **Error (400)**: `partial_batch_failure`, `invalid_product_price`
/// - **Error (502)**: products service answered with something unusable
/// - **Error (503)**: products service unreachable
pub async fn create_order(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let Json(request) = body?;
    let draft = request.into_draft()?;

    tracing::debug!(api_key_id = %auth.api_key_id, items = draft.items.len(), "creating order");
    let details = state.orders.create(draft).await?;
    Ok((StatusCode::CREATED, Json(details.into())))
}

/// Get an order by ID.
///
/// # Endpoint
///
/// `GET /api/orders/{id}?include_deleted=true`
///
/// Without `include_deleted`, soft-deleted orders are 404 and only active
/// items are listed. With it, the order is returned either way and deleted
/// items carry their `deleted_at`.
pub async fn get_order(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<OrderShowQuery>, QueryRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    let Path(id) = id?;
    let Query(query) = query?;
    let details = state.orders.get(id, query.include_deleted).await?;
    Ok(Json(details.into()))
}

/// Replace an order.
///
/// Same body as creation. Every previous item is soft-deleted and the new
/// ones are priced and inserted; the total is recomputed. When `date` is
/// omitted the order keeps its date.
pub async fn update_order(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    let Path(id) = id?;
    let Json(request) = body?;
    let draft = request.into_draft()?;

    tracing::debug!(api_key_id = %auth.api_key_id, order_id = %id, "updating order");
    let details = state.orders.update(id, draft).await?;
    Ok(Json(details.into()))
}

/// Soft-delete an order and its items. Responds 204 No Content.
pub async fn delete_order(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = id?;
    state.orders.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Order statistics.
///
/// # Endpoint
///
/// `GET /api/orders/stats?date_from=2025-08-01&date_to=2025-08-31&customer_id=...`
///
/// # Response
///
/// ```json
/// {
///   "total_orders": 2,
///   "total_cents": 15000000,
///   "average_cents": 7500000.0,
///   "by_payment_method": [
///     { "payment_method": "cash", "order_count": 1, "total_cents": 3000000 }
///   ],
///   "period": { "from": "2025-08-01", "to": "2025-08-31" }
/// }
/// ```
pub async fn order_stats(
    State(state): State<AppState>,
    query: Result<Query<StatsFilter>, QueryRejection>,
) -> Result<Json<StatisticsResponse>, AppError> {
    let Query(filter) = query?;
    check_period(filter.date_from, filter.date_to)?;

    let statistics = state.orders.statistics(&filter).await?;
    Ok(Json(StatisticsResponse {
        statistics,
        period: StatisticsPeriod {
            from: filter.date_from,
            to: filter.date_to,
        },
    }))
}

fn check_period(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<(), AppError> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(AppError::Validation(
            "date_from must not be after date_to".to_string(),
        )),
        _ => Ok(()),
    }
}
