//! Data-access interfaces.
//!
//! Services depend on these traits, never on a concrete database, so the
//! Postgres adapters in `pg` can be swapped for the in-memory ones in
//! `memory` (used by tests and single-process setups).
//!
//! Customer, order and line-item access happens through a `SalesTx`: a unit
//! of work opened with `SalesStore::begin`. Nothing written through it is
//! visible to anyone else until `commit`; dropping it or calling `rollback`
//! discards every write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    api_key::{ApiKey, NewApiKey},
    customer::{Customer, CustomerFields},
    order::{LineItem, NewLineItem, NewOrder, Order, OrderListFilter, OrderStatistics, StatsFilter},
};

pub mod memory;
pub mod pg;

/// Errors raised by persistence adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("counter store error: {0}")]
    Counter(#[from] redis::RedisError),

    /// A unique constraint rejected the write.
    #[error("duplicate value: {0}")]
    Conflict(String),

    /// A stored value could not be mapped back into the domain.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("transaction already finished")]
    TransactionClosed,
}

#[async_trait]
pub trait CustomerRepository: Send {
    async fn find_customer(
        &mut self,
        id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<Customer>, StoreError>;

    /// Look up by national id, soft-deleted customers included.
    async fn find_customer_by_national_id(
        &mut self,
        national_id: &str,
    ) -> Result<Option<Customer>, StoreError>;

    /// Look up by email, soft-deleted customers included.
    async fn find_customer_by_email(&mut self, email: &str)
    -> Result<Option<Customer>, StoreError>;

    /// Active customers, oldest first.
    async fn list_customers(&mut self) -> Result<Vec<Customer>, StoreError>;

    async fn insert_customer(&mut self, fields: &CustomerFields) -> Result<Customer, StoreError>;

    /// Returns `None` when no active customer has this id.
    async fn update_customer(
        &mut self,
        id: Uuid,
        fields: &CustomerFields,
    ) -> Result<Option<Customer>, StoreError>;

    /// Returns `false` when no active customer has this id.
    async fn soft_delete_customer(&mut self, id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait OrderRepository: Send {
    async fn find_order(
        &mut self,
        id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<Order>, StoreError>;

    /// One page of active orders plus the number of matching orders.
    async fn list_orders(
        &mut self,
        filter: &OrderListFilter,
    ) -> Result<(Vec<Order>, i64), StoreError>;

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, StoreError>;

    /// Overwrite the header of an active order. Returns `None` when absent.
    async fn update_order(
        &mut self,
        id: Uuid,
        order: &NewOrder,
    ) -> Result<Option<Order>, StoreError>;

    /// Returns `false` when no active order has this id.
    async fn soft_delete_order(&mut self, id: Uuid) -> Result<bool, StoreError>;

    /// Aggregates over active orders.
    async fn order_statistics(&mut self, filter: &StatsFilter)
    -> Result<OrderStatistics, StoreError>;
}

#[async_trait]
pub trait LineItemRepository: Send {
    /// Items of an order in creation order.
    async fn list_line_items(
        &mut self,
        order_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<LineItem>, StoreError>;

    async fn insert_line_item(&mut self, item: &NewLineItem) -> Result<LineItem, StoreError>;

    /// Soft-delete every active item of an order, returning how many.
    async fn soft_delete_line_items(&mut self, order_id: Uuid) -> Result<u64, StoreError>;
}

/// A unit of work over customers, orders and line items.
#[async_trait]
pub trait SalesTx: CustomerRepository + OrderRepository + LineItemRepository {
    async fn commit(&mut self) -> Result<(), StoreError>;
    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Source of `SalesTx` units of work.
#[async_trait]
pub trait SalesStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn SalesTx>, StoreError>;
}

/// Durable storage of API keys and their lifetime usage counters.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn insert_api_key(&self, key: &NewApiKey) -> Result<ApiKey, StoreError>;

    /// Active keys whose visible prefix equals `prefix`.
    async fn find_active_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>, StoreError>;

    async fn find_api_key(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError>;

    /// All keys, newest first.
    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, StoreError>;

    async fn set_api_key_active(&self, id: Uuid, active: bool)
    -> Result<Option<ApiKey>, StoreError>;

    /// Bump `total_requests` and stamp `last_used_at`.
    async fn record_usage(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}
