//! In-process adapters.
//!
//! `MemoryStore` keeps all sales tables behind one async mutex. A
//! transaction takes the lock for its whole lifetime and works on a copy of
//! the tables; `commit` swaps the copy in, anything else throws it away.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    models::{
        api_key::{ApiKey, NewApiKey},
        customer::{Customer, CustomerFields},
        order::{
            LineItem, NewLineItem, NewOrder, Order, OrderListFilter, OrderStatistics,
            PaymentMethodBreakdown, StatsFilter,
        },
    },
    repos::{
        ApiKeyRepository, CustomerRepository, LineItemRepository, OrderRepository, SalesStore,
        SalesTx, StoreError,
    },
};

#[derive(Debug, Clone, Default)]
struct Tables {
    customers: Vec<Customer>,
    orders: Vec<Order>,
    line_items: Vec<LineItem>,
}

/// Sales store kept in process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed orders, soft-deleted ones included.
    pub async fn orders(&self) -> Vec<Order> {
        self.tables.lock().await.orders.clone()
    }

    /// Committed line items, soft-deleted ones included.
    pub async fn line_items(&self) -> Vec<LineItem> {
        self.tables.lock().await.line_items.clone()
    }

    pub async fn customers(&self) -> Vec<Customer> {
        self.tables.lock().await.customers.clone()
    }
}

#[async_trait]
impl SalesStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn SalesTx>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard: Some(guard),
            working,
        }))
    }
}

pub struct MemoryTx {
    guard: Option<OwnedMutexGuard<Tables>>,
    working: Tables,
}

impl MemoryTx {
    fn tables(&mut self) -> Result<&mut Tables, StoreError> {
        if self.guard.is_none() {
            return Err(StoreError::TransactionClosed);
        }
        Ok(&mut self.working)
    }
}

#[async_trait]
impl SalesTx for MemoryTx {
    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut guard = self.guard.take().ok_or(StoreError::TransactionClosed)?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.guard.take().ok_or(StoreError::TransactionClosed)?;
        self.working = Tables::default();
        Ok(())
    }
}

fn check_customer_unique(
    customers: &[Customer],
    fields: &CustomerFields,
    except: Option<Uuid>,
) -> Result<(), StoreError> {
    for other in customers.iter().filter(|c| Some(c.id) != except) {
        if other.national_id == fields.national_id {
            return Err(StoreError::Conflict("customers_national_id_key".to_string()));
        }
        if other.email == fields.email {
            return Err(StoreError::Conflict("customers_email_key".to_string()));
        }
    }
    Ok(())
}

#[async_trait]
impl CustomerRepository for MemoryTx {
    async fn find_customer(
        &mut self,
        id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .tables()?
            .customers
            .iter()
            .find(|c| c.id == id && (include_deleted || !c.is_deleted()))
            .cloned())
    }

    async fn find_customer_by_national_id(
        &mut self,
        national_id: &str,
    ) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .tables()?
            .customers
            .iter()
            .find(|c| c.national_id == national_id)
            .cloned())
    }

    async fn find_customer_by_email(
        &mut self,
        email: &str,
    ) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .tables()?
            .customers
            .iter()
            .find(|c| c.email == email)
            .cloned())
    }

    async fn list_customers(&mut self) -> Result<Vec<Customer>, StoreError> {
        Ok(self
            .tables()?
            .customers
            .iter()
            .filter(|c| !c.is_deleted())
            .cloned()
            .collect())
    }

    async fn insert_customer(&mut self, fields: &CustomerFields) -> Result<Customer, StoreError> {
        let tables = self.tables()?;
        check_customer_unique(&tables.customers, fields, None)?;

        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4(),
            first_name: fields.first_name.clone(),
            last_name: fields.last_name.clone(),
            national_id: fields.national_id.clone(),
            email: fields.email.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        tables.customers.push(customer.clone());
        Ok(customer)
    }

    async fn update_customer(
        &mut self,
        id: Uuid,
        fields: &CustomerFields,
    ) -> Result<Option<Customer>, StoreError> {
        let tables = self.tables()?;
        check_customer_unique(&tables.customers, fields, Some(id))?;

        let Some(customer) = tables
            .customers
            .iter_mut()
            .find(|c| c.id == id && !c.is_deleted())
        else {
            return Ok(None);
        };
        customer.first_name = fields.first_name.clone();
        customer.last_name = fields.last_name.clone();
        customer.national_id = fields.national_id.clone();
        customer.email = fields.email.clone();
        customer.updated_at = Utc::now();
        Ok(Some(customer.clone()))
    }

    async fn soft_delete_customer(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let tables = self.tables()?;
        match tables
            .customers
            .iter_mut()
            .find(|c| c.id == id && !c.is_deleted())
        {
            Some(customer) => {
                let now = Utc::now();
                customer.deleted_at = Some(now);
                customer.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn in_period(
    order: &Order,
    customer_id: Option<Uuid>,
    from: Option<chrono::NaiveDate>,
    to: Option<chrono::NaiveDate>,
) -> bool {
    order.deleted_at.is_none()
        && customer_id.is_none_or(|id| order.customer_id == id)
        && from.is_none_or(|from| order.order_date >= from)
        && to.is_none_or(|to| order.order_date <= to)
}

#[async_trait]
impl OrderRepository for MemoryTx {
    async fn find_order(
        &mut self,
        id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .tables()?
            .orders
            .iter()
            .find(|o| o.id == id && (include_deleted || o.deleted_at.is_none()))
            .cloned())
    }

    async fn list_orders(
        &mut self,
        filter: &OrderListFilter,
    ) -> Result<(Vec<Order>, i64), StoreError> {
        let method = filter.payment_method.as_ref().map(|m| m.to_lowercase());
        let mut matching: Vec<(usize, &Order)> = self
            .tables()?
            .orders
            .iter()
            .enumerate()
            .filter(|(_, o)| in_period(o, filter.customer_id, filter.date_from, filter.date_to))
            .filter(|(_, o)| {
                method
                    .as_deref()
                    .is_none_or(|m| o.payment_method.to_lowercase().contains(m))
            })
            .collect();

        // Newest first; insertion order breaks ties between equal timestamps.
        matching.sort_by(|(ia, a), (ib, b)| {
            (b.order_date, b.created_at, ib).cmp(&(a.order_date, a.created_at, ia))
        });

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(filter.per_page as usize)
            .map(|(_, o)| o.clone())
            .collect();
        Ok((page, total))
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, StoreError> {
        let tables = self.tables()?;
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            order_date: order.order_date,
            payment_method: order.payment_method.clone(),
            customer_id: order.customer_id,
            total_cents: order.total_cents,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        tables.orders.push(order.clone());
        Ok(order)
    }

    async fn update_order(
        &mut self,
        id: Uuid,
        values: &NewOrder,
    ) -> Result<Option<Order>, StoreError> {
        let tables = self.tables()?;
        let Some(order) = tables
            .orders
            .iter_mut()
            .find(|o| o.id == id && o.deleted_at.is_none())
        else {
            return Ok(None);
        };
        order.order_date = values.order_date;
        order.payment_method = values.payment_method.clone();
        order.customer_id = values.customer_id;
        order.total_cents = values.total_cents;
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn soft_delete_order(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let tables = self.tables()?;
        match tables
            .orders
            .iter_mut()
            .find(|o| o.id == id && o.deleted_at.is_none())
        {
            Some(order) => {
                let now = Utc::now();
                order.deleted_at = Some(now);
                order.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn order_statistics(
        &mut self,
        filter: &StatsFilter,
    ) -> Result<OrderStatistics, StoreError> {
        let matching: Vec<&Order> = self
            .tables()?
            .orders
            .iter()
            .filter(|o| in_period(o, filter.customer_id, filter.date_from, filter.date_to))
            .collect();

        let total_orders = matching.len() as i64;
        let total_cents: i64 = matching.iter().map(|o| o.total_cents).sum();
        let average_cents = (total_orders > 0).then(|| total_cents as f64 / total_orders as f64);

        let mut groups: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
        for order in &matching {
            let entry = groups.entry(order.payment_method.as_str()).or_default();
            entry.0 += 1;
            entry.1 += order.total_cents;
        }
        let by_payment_method = groups
            .into_iter()
            .map(|(method, (count, cents))| PaymentMethodBreakdown {
                payment_method: method.to_string(),
                order_count: count,
                total_cents: cents,
            })
            .collect();

        Ok(OrderStatistics {
            total_orders,
            total_cents,
            average_cents,
            by_payment_method,
        })
    }
}

#[async_trait]
impl LineItemRepository for MemoryTx {
    async fn list_line_items(
        &mut self,
        order_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<LineItem>, StoreError> {
        // Stored in insertion order already.
        Ok(self
            .tables()?
            .line_items
            .iter()
            .filter(|i| i.order_id == order_id && (include_deleted || i.deleted_at.is_none()))
            .cloned()
            .collect())
    }

    async fn insert_line_item(&mut self, item: &NewLineItem) -> Result<LineItem, StoreError> {
        let tables = self.tables()?;
        if !tables.orders.iter().any(|o| o.id == item.order_id) {
            return Err(StoreError::Conflict("line_items_order_id_fkey".to_string()));
        }

        let now = Utc::now();
        let item = LineItem {
            id: Uuid::new_v4(),
            order_id: item.order_id,
            product_id: item.product_id,
            kind: item.kind,
            unit_price_cents: item.unit_price_cents,
            line_number: item.line_number,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        tables.line_items.push(item.clone());
        Ok(item)
    }

    async fn soft_delete_line_items(&mut self, order_id: Uuid) -> Result<u64, StoreError> {
        let tables = self.tables()?;
        let now = Utc::now();
        let mut affected = 0;
        for item in tables
            .line_items
            .iter_mut()
            .filter(|i| i.order_id == order_id && i.deleted_at.is_none())
        {
            item.deleted_at = Some(now);
            item.updated_at = now;
            affected += 1;
        }
        Ok(affected)
    }
}

/// API key repository kept in a concurrent map.
#[derive(Clone, Default)]
pub struct MemoryApiKeyRepository {
    keys: Arc<DashMap<Uuid, ApiKey>>,
}

impl MemoryApiKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyRepository for MemoryApiKeyRepository {
    async fn insert_api_key(&self, key: &NewApiKey) -> Result<ApiKey, StoreError> {
        if self.keys.iter().any(|k| k.key_hash == key.key_hash) {
            return Err(StoreError::Conflict("api_keys_key_hash_key".to_string()));
        }

        let now = Utc::now();
        let stored = ApiKey {
            id: Uuid::new_v4(),
            name: key.name.clone(),
            key_hash: key.key_hash.clone(),
            key_prefix: key.key_prefix.clone(),
            key_type: key.key_type,
            rate_limit_per_minute: key.rate_limit_per_minute,
            allowed_endpoints: key.allowed_endpoints.clone(),
            metadata: key.metadata.clone(),
            is_active: true,
            last_used_at: None,
            total_requests: 0,
            created_at: now,
            updated_at: now,
        };
        self.keys.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_active_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>, StoreError> {
        Ok(self
            .keys
            .iter()
            .filter(|k| k.is_active && k.key_prefix == prefix)
            .map(|k| k.value().clone())
            .collect())
    }

    async fn find_api_key(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.keys.get(&id).map(|k| k.value().clone()))
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, StoreError> {
        let mut keys: Vec<ApiKey> = self.keys.iter().map(|k| k.value().clone()).collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn set_api_key_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.keys.get_mut(&id).map(|mut key| {
            key.is_active = active;
            key.updated_at = Utc::now();
            key.clone()
        }))
    }

    async fn record_usage(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut key) = self.keys.get_mut(&id) {
            key.total_requests += 1;
            key.last_used_at = Some(at);
        }
        Ok(())
    }
}
