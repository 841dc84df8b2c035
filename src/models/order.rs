//! Order and line-item data models and API request/response types.
//!
//! This module defines:
//! - `Order` / `LineItem`: Database entities
//! - `OrderDraft`: Validated input for the order orchestrator
//! - Filters and statistics types
//! - Request and response bodies for the order endpoints

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        customer::{Customer, CustomerResponse},
        product::{PriceRequest, ProductKind},
    },
};

/// Longest accepted payment-method text.
pub const MAX_PAYMENT_METHOD_LEN: usize = 255;

/// Default and maximum page sizes for order listings.
pub const DEFAULT_PER_PAGE: u32 = 15;
pub const MAX_PER_PAGE: u32 = 50;

/// Represents an order header from the database.
///
/// # Total Storage
///
/// `total_cents` is always derived from the line items' unit prices at the
/// time of the last successful create or update. Clients never send it.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub order_date: NaiveDate,
    pub payment_method: String,
    pub customer_id: Uuid,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A priced product reference attached to an order.
///
/// `unit_price_cents` is a snapshot: later price changes in the products
/// service never touch it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: i64,
    pub kind: ProductKind,
    pub unit_price_cents: i64,
    /// Index of the item in the request that created it
    pub line_number: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Order header values written on create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub order_date: NaiveDate,
    pub payment_method: String,
    pub customer_id: Uuid,
    pub total_cents: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLineItem {
    pub order_id: Uuid,
    pub product_id: i64,
    pub kind: ProductKind,
    pub unit_price_cents: i64,
    pub line_number: i32,
}

/// Validated order input handed to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    /// `None` means today on create, and "keep the current date" on update
    pub order_date: Option<NaiveDate>,
    pub payment_method: String,
    pub customer_id: Uuid,
    pub items: Vec<PriceRequest>,
}

/// An order with its customer and active line items attached.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDetails {
    pub order: Order,
    pub customer: Option<Customer>,
    pub items: Vec<LineItem>,
}

/// Filters for order listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderListFilter {
    pub customer_id: Option<Uuid>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Case-insensitive substring match
    pub payment_method: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl OrderListFilter {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.per_page)
    }
}

/// Filters for order statistics. All bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatsFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct PaymentMethodBreakdown {
    pub payment_method: String,
    pub order_count: i64,
    pub total_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderStatistics {
    pub total_orders: i64,
    pub total_cents: i64,
    /// `None` when no order matched
    pub average_cents: Option<f64>,
    pub by_payment_method: Vec<PaymentMethodBreakdown>,
}

/// A single line of an order request.
#[derive(Debug, Deserialize)]
pub struct LineItemRequest {
    pub product_id: i64,
    pub kind: String,
}

/// Request body for `POST /api/orders` and `PUT /api/orders/{id}`.
///
/// # JSON Example
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
/// There is no total and no price: both come from the products service.
#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub payment_method: String,
    pub customer_id: Uuid,
    pub items: Vec<LineItemRequest>,
}

impl OrderRequest {
    /// Validate the request and turn it into an orchestrator draft.
    ///
    /// # Errors
    ///
    /// `AppError::Validation` naming the first offending field.
    pub fn into_draft(self) -> Result<OrderDraft, AppError> {
        let payment_method = self.payment_method.trim().to_string();
        if payment_method.is_empty() {
            return Err(AppError::Validation(
                "payment_method is required".to_string(),
            ));
        }
        if payment_method.chars().count() > MAX_PAYMENT_METHOD_LEN {
            return Err(AppError::Validation(format!(
                "payment_method must be at most {MAX_PAYMENT_METHOD_LEN} characters"
            )));
        }
        if self.items.is_empty() {
            return Err(AppError::Validation(
                "items must contain at least one product".to_string(),
            ));
        }

        let mut items = Vec::with_capacity(self.items.len());
        for (index, item) in self.items.into_iter().enumerate() {
            if item.product_id < 1 {
                return Err(AppError::Validation(format!(
                    "items.{index}.product_id must be a positive integer"
                )));
            }
            let kind = item.kind.parse::<ProductKind>().map_err(|_| {
                AppError::Validation(format!(
                    "items.{index}.kind must be \"service\" or \"bundle\""
                ))
            })?;
            items.push(PriceRequest {
                product_id: item.product_id,
                kind,
            });
        }

        Ok(OrderDraft {
            order_date: self.date,
            payment_method,
            customer_id: self.customer_id,
            items,
        })
    }
}

/// Query string of `GET /api/orders`.
#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    pub customer_id: Option<Uuid>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl From<OrderListQuery> for OrderListFilter {
    fn from(query: OrderListQuery) -> Self {
        Self {
            customer_id: query.customer_id,
            date_from: query.date_from,
            date_to: query.date_to,
            payment_method: query
                .payment_method
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
            page: query.page.unwrap_or(1).max(1),
            per_page: query
                .per_page
                .unwrap_or(DEFAULT_PER_PAGE)
                .clamp(1, MAX_PER_PAGE),
        }
    }
}

/// Query string of `GET /api/orders/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct OrderShowQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineItemResponse {
    pub id: Uuid,
    pub product_id: i64,
    pub kind: ProductKind,
    pub unit_price_cents: i64,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<LineItem> for LineItemResponse {
    fn from(item: LineItem) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            kind: item.kind,
            unit_price_cents: item.unit_price_cents,
            deleted_at: item.deleted_at,
        }
    }
}

/// Response body for order endpoints.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "770e8400-...",
///   "date": "2025-08-01",
///   "payment_method": "credit card",
///   "customer_id": "550e8400-...",
///   "total_cents": 12000000,
///   "customer": { "id": "550e8400-...", "full_name": "ANA PÉREZ", ... },
///   "items": [
///     { "id": "...", "product_id": 1, "kind": "service", "unit_price_cents": 4500000 },
///     { "id": "...", "product_id": 2, "kind": "bundle", "unit_price_cents": 7500000 }
///   ],
///   "created_at": "2025-08-01T10:00:00Z",
///   "updated_at": "2025-08-01T10:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub date: NaiveDate,
    pub payment_method: String,
    pub customer_id: Uuid,
    pub total_cents: i64,
    pub customer: Option<CustomerResponse>,
    pub items: Vec<LineItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<OrderDetails> for OrderResponse {
    fn from(details: OrderDetails) -> Self {
        let OrderDetails {
            order,
            customer,
            items,
        } = details;
        Self {
            id: order.id,
            date: order.order_date,
            payment_method: order.payment_method,
            customer_id: order.customer_id,
            total_cents: order.total_cents,
            customer: customer.map(Into::into),
            items: items.into_iter().map(Into::into).collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
            deleted_at: order.deleted_at,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

/// Response body for `GET /api/orders/stats`.
#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    #[serde(flatten)]
    pub statistics: OrderStatistics,
    pub period: StatisticsPeriod,
}

#[derive(Debug, Serialize)]
pub struct StatisticsPeriod {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(items: Vec<LineItemRequest>) -> OrderRequest {
        OrderRequest {
            date: None,
            payment_method: " cash ".to_string(),
            customer_id: Uuid::new_v4(),
            items,
        }
    }

    #[test]
    fn draft_keeps_item_order_and_trims_payment_method() {
        let draft = request(vec![
            LineItemRequest {
                product_id: 7,
                kind: "bundle".to_string(),
            },
            LineItemRequest {
                product_id: 3,
                kind: "service".to_string(),
            },
        ])
        .into_draft()
        .unwrap();

        assert_eq!(draft.payment_method, "cash");
        assert_eq!(
            draft.items,
            vec![
                PriceRequest {
                    product_id: 7,
                    kind: ProductKind::Bundle
                },
                PriceRequest {
                    product_id: 3,
                    kind: ProductKind::Service
                },
            ]
        );
    }

    #[test]
    fn draft_rejects_empty_items() {
        assert!(matches!(
            request(vec![]).into_draft(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn draft_rejects_unknown_kind_and_non_positive_ids() {
        let bad_kind = request(vec![LineItemRequest {
            product_id: 1,
            kind: "voucher".to_string(),
        }]);
        assert!(matches!(bad_kind.into_draft(), Err(AppError::Validation(m)) if m.contains("items.0.kind")));

        let bad_id = request(vec![LineItemRequest {
            product_id: 0,
            kind: "service".to_string(),
        }]);
        assert!(matches!(bad_id.into_draft(), Err(AppError::Validation(m)) if m.contains("product_id")));
    }

    #[test]
    fn list_query_clamps_pagination() {
        let filter: OrderListFilter = OrderListQuery {
            page: Some(0),
            per_page: Some(500),
            payment_method: Some("  ".to_string()),
            ..Default::default()
        }
        .into();

        assert_eq!(filter.page, 1);
        assert_eq!(filter.per_page, MAX_PER_PAGE);
        assert_eq!(filter.payment_method, None);
        assert_eq!(filter.offset(), 0);
    }
}
