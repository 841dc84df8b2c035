//! Order service - Core business logic for sales orders.
//!
//! This service handles:
//! - Customer checks
//! - Pricing every line item through the products service
//! - Total computation in integer cents
//! - Transaction management
//!
//! # Atomicity Guarantees
//!
//! Every write runs inside one `SalesTx`. Any error rolls it back, so a
//! failed create leaves no order and no line items behind, and a failed
//! update leaves the previous items in place. Nothing is ever undone on the
//! products service side.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    models::{
        order::{
            LineItem, NewLineItem, NewOrder, Order, OrderDetails, OrderDraft, OrderListFilter,
            OrderStatistics, StatsFilter,
        },
        product::{PriceRequest, ProductKind, ResolvedItem},
    },
    repos::{
        CustomerRepository, LineItemRepository, OrderRepository, SalesStore, SalesTx, StoreError,
    },
    services::{batch_pricing::BatchPricingResolver, pricing_client::PricingError},
};

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("customer {0} not found")]
    CustomerNotFound(Uuid),

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error("{kind} {product_id} has no valid price (got {price})")]
    InvalidProductPrice {
        product_id: i64,
        kind: ProductKind,
        price: f64,
    },

    /// The line prices add up to more than a total can hold.
    #[error("order total of {items} item(s) exceeds the supported amount")]
    TotalOverflow { items: usize },

    /// Anything unexpected, typically a storage failure.
    #[error("order processing failed: {0}")]
    Processing(#[from] StoreError),
}

/// Convert a currency amount to cents.
///
/// Returns `None` unless the amount is finite, positive and at least one
/// cent after rounding.
pub fn to_cents(price: f64) -> Option<i64> {
    if !price.is_finite() || price <= 0.0 {
        return None;
    }
    let cents = (price * 100.0).round();
    if cents < 1.0 || cents >= i64::MAX as f64 {
        return None;
    }
    Some(cents as i64)
}

/// Sum of the line prices, refusing totals that do not fit in an `i64`.
fn order_total(priced: &[PricedItem]) -> Result<i64, OrderError> {
    priced
        .iter()
        .try_fold(0i64, |total, item| total.checked_add(item.cents))
        .ok_or(OrderError::TotalOverflow {
            items: priced.len(),
        })
}

/// A resolved item with its price in cents.
struct PricedItem {
    resolved: ResolvedItem,
    cents: i64,
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn SalesStore>,
    pricing: BatchPricingResolver,
}

impl OrderService {
    pub fn new(store: Arc<dyn SalesStore>, pricing: BatchPricingResolver) -> Self {
        Self { store, pricing }
    }

    /// Create an order.
    ///
    /// # Process
    ///
    /// 1. Check the customer exists and is not deleted
    /// 2. Price every item through the batch resolver
    /// 3. Check every price is positive and sum the cents
    /// 4. Insert the order, then one line item per product in request order
    /// 5. Commit (or rollback on error)
    ///
    /// # Errors
    ///
    /// - `CustomerNotFound`: customer missing or soft-deleted
    /// - `Pricing`: lookup failures, with their own status
    /// - `InvalidProductPrice`: a product priced at zero or less
    /// - `Processing`: storage failure
    pub async fn create(&self, draft: OrderDraft) -> Result<OrderDetails, OrderError> {
        let mut tx = self.store.begin().await?;
        let result = self.create_in(tx.as_mut(), draft).await;
        let details = finish(tx, result).await?;

        tracing::info!(
            order_id = %details.order.id,
            customer_id = %details.order.customer_id,
            total_cents = details.order.total_cents,
            items = details.items.len(),
            "order created"
        );
        Ok(details)
    }

    async fn create_in(
        &self,
        tx: &mut dyn SalesTx,
        draft: OrderDraft,
    ) -> Result<OrderDetails, OrderError> {
        let customer = tx
            .find_customer(draft.customer_id, false)
            .await?
            .ok_or(OrderError::CustomerNotFound(draft.customer_id))?;

        let priced = self.price_items(&draft.items).await?;
        let total_cents = order_total(&priced)?;

        let order = tx
            .insert_order(&NewOrder {
                order_date: draft
                    .order_date
                    .unwrap_or_else(|| Utc::now().date_naive()),
                payment_method: draft.payment_method,
                customer_id: customer.id,
                total_cents,
            })
            .await?;
        let items = insert_items(tx, order.id, &priced).await?;

        Ok(OrderDetails {
            order,
            customer: Some(customer),
            items,
        })
    }

    /// Replace an order's header and all of its line items.
    ///
    /// Existing items are soft-deleted and fresh ones inserted; the order
    /// date is kept when the draft has none.
    pub async fn update(
        &self,
        order_id: Uuid,
        draft: OrderDraft,
    ) -> Result<OrderDetails, OrderError> {
        let mut tx = self.store.begin().await?;
        let result = self.update_in(tx.as_mut(), order_id, draft).await;
        let details = finish(tx, result).await?;

        tracing::info!(
            order_id = %order_id,
            total_cents = details.order.total_cents,
            items = details.items.len(),
            "order updated"
        );
        Ok(details)
    }

    async fn update_in(
        &self,
        tx: &mut dyn SalesTx,
        order_id: Uuid,
        draft: OrderDraft,
    ) -> Result<OrderDetails, OrderError> {
        let existing = tx
            .find_order(order_id, false)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        let customer = tx
            .find_customer(draft.customer_id, false)
            .await?
            .ok_or(OrderError::CustomerNotFound(draft.customer_id))?;

        let priced = self.price_items(&draft.items).await?;
        let total_cents = order_total(&priced)?;

        let order = tx
            .update_order(
                order_id,
                &NewOrder {
                    order_date: draft.order_date.unwrap_or(existing.order_date),
                    payment_method: draft.payment_method,
                    customer_id: customer.id,
                    total_cents,
                },
            )
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        tx.soft_delete_line_items(order_id).await?;
        let items = insert_items(tx, order_id, &priced).await?;

        Ok(OrderDetails {
            order,
            customer: Some(customer),
            items,
        })
    }

    /// Soft-delete an order and its line items.
    pub async fn delete(&self, order_id: Uuid) -> Result<bool, OrderError> {
        let mut tx = self.store.begin().await?;
        let result = delete_in(tx.as_mut(), order_id).await;
        let deleted = finish(tx, result).await?;

        tracing::info!(order_id = %order_id, "order deleted");
        Ok(deleted)
    }

    /// Fetch an order with its customer and items.
    ///
    /// With `include_deleted`, soft-deleted orders are found and their
    /// deleted items are listed too.
    pub async fn get(
        &self,
        order_id: Uuid,
        include_deleted: bool,
    ) -> Result<OrderDetails, OrderError> {
        let mut tx = self.store.begin().await?;
        let result = get_in(tx.as_mut(), order_id, include_deleted).await;
        finish(tx, result).await
    }

    /// One page of active orders, plus the total number of matches.
    pub async fn list(
        &self,
        filter: &OrderListFilter,
    ) -> Result<(Vec<OrderDetails>, i64), OrderError> {
        let mut tx = self.store.begin().await?;
        let result = list_in(tx.as_mut(), filter).await;
        finish(tx, result).await
    }

    /// Count, sum, average and per-payment-method breakdown of active orders.
    pub async fn statistics(&self, filter: &StatsFilter) -> Result<OrderStatistics, OrderError> {
        let mut tx = self.store.begin().await?;
        let result = tx.order_statistics(filter).await.map_err(OrderError::from);
        finish(tx, result).await
    }

    async fn price_items(&self, items: &[PriceRequest]) -> Result<Vec<PricedItem>, OrderError> {
        let resolved = self.pricing.resolve_batch(items).await?;

        resolved
            .into_iter()
            .map(|item| match to_cents(item.quote.price) {
                Some(cents) => Ok(PricedItem {
                    resolved: item,
                    cents,
                }),
                None => Err(OrderError::InvalidProductPrice {
                    product_id: item.requested_product_id,
                    kind: item.requested_kind,
                    price: item.quote.price,
                }),
            })
            .collect()
    }
}

async fn delete_in(tx: &mut dyn SalesTx, order_id: Uuid) -> Result<bool, OrderError> {
    tx.find_order(order_id, false)
        .await?
        .ok_or(OrderError::OrderNotFound(order_id))?;

    tx.soft_delete_line_items(order_id).await?;
    if !tx.soft_delete_order(order_id).await? {
        return Err(OrderError::OrderNotFound(order_id));
    }
    Ok(true)
}

async fn get_in(
    tx: &mut dyn SalesTx,
    order_id: Uuid,
    include_deleted: bool,
) -> Result<OrderDetails, OrderError> {
    let order = tx
        .find_order(order_id, include_deleted)
        .await?
        .ok_or(OrderError::OrderNotFound(order_id))?;
    load_details(tx, order, include_deleted).await
}

async fn list_in(
    tx: &mut dyn SalesTx,
    filter: &OrderListFilter,
) -> Result<(Vec<OrderDetails>, i64), OrderError> {
    let (orders, total) = tx.list_orders(filter).await?;
    let mut page = Vec::with_capacity(orders.len());
    for order in orders {
        page.push(load_details(tx, order, false).await?);
    }
    Ok((page, total))
}

async fn insert_items(
    tx: &mut dyn SalesTx,
    order_id: Uuid,
    priced: &[PricedItem],
) -> Result<Vec<LineItem>, OrderError> {
    let mut items = Vec::with_capacity(priced.len());
    for item in priced {
        let line_number = i32::try_from(item.resolved.index)
            .map_err(|_| StoreError::Corrupt("too many line items".to_string()))?;
        let stored = tx
            .insert_line_item(&NewLineItem {
                order_id,
                product_id: item.resolved.requested_product_id,
                kind: item.resolved.requested_kind,
                unit_price_cents: item.cents,
                line_number,
            })
            .await?;
        items.push(stored);
    }
    Ok(items)
}

async fn load_details(
    tx: &mut dyn SalesTx,
    order: Order,
    include_deleted_items: bool,
) -> Result<OrderDetails, OrderError> {
    // Deleted customers still show on their historical orders.
    let customer = tx.find_customer(order.customer_id, true).await?;
    let items = tx.list_line_items(order.id, include_deleted_items).await?;
    Ok(OrderDetails {
        order,
        customer,
        items,
    })
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    mut tx: Box<dyn SalesTx>,
    result: Result<T, OrderError>,
) -> Result<T, OrderError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::error!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{customer::CustomerFields, product::ProductQuote},
        repos::{CustomerRepository, memory::MemoryStore},
        services::pricing_client::PricingClient,
    };
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    /// Serves fixed prices; unknown ids are unavailable.
    struct FixedPrices(HashMap<i64, f64>);

    #[async_trait]
    impl PricingClient for FixedPrices {
        async fn fetch_price(
            &self,
            product_id: i64,
            kind: ProductKind,
        ) -> Result<ProductQuote, PricingError> {
            match self.0.get(&product_id) {
                Some(&price) => Ok(ProductQuote {
                    id: product_id,
                    kind,
                    name: format!("product {product_id}"),
                    price,
                    description: None,
                    raw_payload: serde_json::Value::Null,
                }),
                None => Err(PricingError::RemoteUnavailable {
                    product_id,
                    kind,
                    attempts: 3,
                    last_error: "connection refused".to_string(),
                }),
            }
        }

        async fn check_connectivity(&self) -> bool {
            true
        }
    }

    struct Fixture {
        store: MemoryStore,
        service: OrderService,
        customer_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let prices = HashMap::from([
            (1, 45_000.0),
            (2, 75_000.0),
            (3, 19.99),
            (4, 0.0),
            (5, 0.004),
            (6, 9.0e16),
        ]);
        let resolver = BatchPricingResolver::new(Arc::new(FixedPrices(prices)));
        let service = OrderService::new(Arc::new(store.clone()), resolver);

        let mut tx = store.begin().await.unwrap();
        let customer = tx
            .insert_customer(&CustomerFields {
                first_name: "ANA".to_string(),
                last_name: "PEREZ".to_string(),
                national_id: "30123456".to_string(),
                email: "ana@example.com".to_string(),
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();

        Fixture {
            store,
            service,
            customer_id: customer.id,
        }
    }

    fn draft(customer_id: Uuid, ids: &[(i64, ProductKind)]) -> OrderDraft {
        OrderDraft {
            order_date: NaiveDate::from_ymd_opt(2025, 8, 1),
            payment_method: "cash".to_string(),
            customer_id,
            items: ids
                .iter()
                .map(|&(product_id, kind)| PriceRequest { product_id, kind })
                .collect(),
        }
    }

    async fn assert_nothing_persisted(store: &MemoryStore) {
        assert!(store.orders().await.is_empty());
        assert!(store.line_items().await.is_empty());
    }

    #[test]
    fn cents_conversion() {
        assert_eq!(to_cents(45_000.0), Some(4_500_000));
        assert_eq!(to_cents(19.99), Some(1_999));
        assert_eq!(to_cents(0.005), Some(1));
        assert_eq!(to_cents(0.004), None);
        assert_eq!(to_cents(0.0), None);
        assert_eq!(to_cents(-3.0), None);
        assert_eq!(to_cents(f64::NAN), None);
    }

    #[tokio::test]
    async fn create_sums_remote_prices_exactly() {
        let f = fixture().await;
        let details = f
            .service
            .create(draft(
                f.customer_id,
                &[(1, ProductKind::Service), (2, ProductKind::Bundle)],
            ))
            .await
            .unwrap();

        assert_eq!(details.order.total_cents, 12_000_000);
        assert_eq!(details.items.len(), 2);
        assert_eq!(details.items[0].unit_price_cents, 4_500_000);
        assert_eq!(details.items[1].kind, ProductKind::Bundle);
        assert_eq!(details.items[1].line_number, 1);
        assert_eq!(details.customer.unwrap().id, f.customer_id);
        assert_eq!(f.store.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn create_defaults_date_to_today() {
        let f = fixture().await;
        let mut input = draft(f.customer_id, &[(3, ProductKind::Service)]);
        input.order_date = None;

        let details = f.service.create(input).await.unwrap();
        assert_eq!(details.order.order_date, Utc::now().date_naive());
        assert_eq!(details.order.total_cents, 1_999);
    }

    #[tokio::test]
    async fn create_rejects_unknown_or_deleted_customer() {
        let f = fixture().await;
        let missing = Uuid::new_v4();
        let err = f
            .service
            .create(draft(missing, &[(1, ProductKind::Service)]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::CustomerNotFound(id) if id == missing));

        let mut tx = f.store.begin().await.unwrap();
        tx.soft_delete_customer(f.customer_id).await.unwrap();
        tx.commit().await.unwrap();

        let err = f
            .service
            .create(draft(f.customer_id, &[(1, ProductKind::Service)]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::CustomerNotFound(_)));
        assert_nothing_persisted(&f.store).await;
    }

    #[tokio::test]
    async fn pricing_failure_persists_nothing() {
        let f = fixture().await;
        let err = f
            .service
            .create(draft(
                f.customer_id,
                &[(1, ProductKind::Service), (99, ProductKind::Service)],
            ))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrderError::Pricing(PricingError::PartialBatchFailure(ref failures))
                if failures.len() == 1 && failures[0].index == 1
        ));
        assert_nothing_persisted(&f.store).await;
    }

    #[tokio::test]
    async fn non_positive_price_persists_nothing() {
        let f = fixture().await;
        for product in [4, 5] {
            let err = f
                .service
                .create(draft(
                    f.customer_id,
                    &[(1, ProductKind::Service), (product, ProductKind::Service)],
                ))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                OrderError::InvalidProductPrice { product_id, .. } if product_id == product
            ));
        }
        assert_nothing_persisted(&f.store).await;
    }

    #[tokio::test]
    async fn oversized_total_is_rejected_without_writing() {
        let f = fixture().await;
        let err = f
            .service
            .create(draft(
                f.customer_id,
                &[(6, ProductKind::Service), (6, ProductKind::Bundle)],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::TotalOverflow { items: 2 }));
        assert_nothing_persisted(&f.store).await;

        let created = f
            .service
            .create(draft(f.customer_id, &[(6, ProductKind::Service)]))
            .await
            .unwrap();
        assert_eq!(created.order.total_cents, 9_000_000_000_000_000_000);

        let err = f
            .service
            .update(
                created.order.id,
                draft(
                    f.customer_id,
                    &[(6, ProductKind::Service), (1, ProductKind::Service), (6, ProductKind::Service)],
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::TotalOverflow { items: 3 }));
        let reloaded = f.service.get(created.order.id, false).await.unwrap();
        assert_eq!(reloaded.order.total_cents, 9_000_000_000_000_000_000);
        assert_eq!(reloaded.items.len(), 1);
    }

    #[tokio::test]
    async fn update_replaces_all_line_items() {
        let f = fixture().await;
        let created = f
            .service
            .create(draft(
                f.customer_id,
                &[(1, ProductKind::Service), (2, ProductKind::Bundle)],
            ))
            .await
            .unwrap();

        let mut replacement = draft(f.customer_id, &[(3, ProductKind::Service)]);
        replacement.order_date = None;
        replacement.payment_method = "card".to_string();
        let updated = f
            .service
            .update(created.order.id, replacement)
            .await
            .unwrap();

        assert_eq!(updated.order.total_cents, 1_999);
        assert_eq!(updated.order.payment_method, "card");
        assert_eq!(updated.order.order_date, created.order.order_date);
        assert_eq!(updated.items.len(), 1);

        let reloaded = f.service.get(created.order.id, false).await.unwrap();
        let active: Vec<i64> = reloaded.items.iter().map(|i| i.product_id).collect();
        assert_eq!(active, vec![3]);

        let all = f.store.line_items().await;
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().filter(|i| i.deleted_at.is_some()).count(), 2);
    }

    #[tokio::test]
    async fn failed_update_keeps_previous_state() {
        let f = fixture().await;
        let created = f
            .service
            .create(draft(f.customer_id, &[(1, ProductKind::Service)]))
            .await
            .unwrap();

        let err = f
            .service
            .update(
                created.order.id,
                draft(f.customer_id, &[(99, ProductKind::Bundle)]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Pricing(_)));

        let reloaded = f.service.get(created.order.id, false).await.unwrap();
        assert_eq!(reloaded.order.total_cents, 4_500_000);
        assert_eq!(reloaded.items.len(), 1);
        assert_eq!(f.store.line_items().await.len(), 1);
    }

    #[tokio::test]
    async fn update_of_missing_order_is_not_found() {
        let f = fixture().await;
        let err = f
            .service
            .update(Uuid::new_v4(), draft(f.customer_id, &[(1, ProductKind::Service)]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn delete_cascades_softly() {
        let f = fixture().await;
        let created = f
            .service
            .create(draft(
                f.customer_id,
                &[(1, ProductKind::Service), (2, ProductKind::Bundle)],
            ))
            .await
            .unwrap();

        assert!(f.service.delete(created.order.id).await.unwrap());

        let err = f.service.get(created.order.id, false).await.unwrap_err();
        assert!(matches!(err, OrderError::OrderNotFound(_)));

        let archived = f.service.get(created.order.id, true).await.unwrap();
        assert!(archived.order.deleted_at.is_some());
        assert_eq!(archived.items.len(), 2);
        assert!(archived.items.iter().all(|i| i.deleted_at.is_some()));

        let again = f.service.delete(created.order.id).await.unwrap_err();
        assert!(matches!(again, OrderError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn statistics_and_listing_ignore_deleted_orders() {
        let f = fixture().await;
        f.service
            .create(draft(f.customer_id, &[(1, ProductKind::Service)]))
            .await
            .unwrap();
        let mut card = draft(f.customer_id, &[(2, ProductKind::Bundle)]);
        card.payment_method = "card".to_string();
        f.service.create(card).await.unwrap();
        let doomed = f
            .service
            .create(draft(f.customer_id, &[(3, ProductKind::Service)]))
            .await
            .unwrap();
        f.service.delete(doomed.order.id).await.unwrap();

        let stats = f.service.statistics(&StatsFilter::default()).await.unwrap();
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.total_cents, 12_000_000);
        assert_eq!(stats.average_cents, Some(6_000_000.0));
        assert_eq!(stats.by_payment_method.len(), 2);

        let (page, total) = f
            .service
            .list(&OrderListFilter {
                page: 1,
                per_page: 15,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(page.iter().all(|d| d.items.len() == 1 && d.customer.is_some()));
    }
}
