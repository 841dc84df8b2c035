//! PostgreSQL adapters built on sqlx.
//!
//! Every `PgSalesTx` wraps one database transaction. Queries are plain SQL
//! strings bound at runtime; list and statistics queries add their optional
//! filters through `QueryBuilder`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder, Transaction, types::Json};
use uuid::Uuid;

use crate::{
    db::DbPool,
    models::{
        api_key::{ApiKey, ApiKeyType, NewApiKey},
        customer::{Customer, CustomerFields},
        order::{
            LineItem, NewLineItem, NewOrder, Order, OrderListFilter, OrderStatistics,
            PaymentMethodBreakdown, StatsFilter,
        },
        product::ProductKind,
    },
    repos::{
        ApiKeyRepository, CustomerRepository, LineItemRepository, OrderRepository, SalesStore,
        SalesTx, StoreError,
    },
};

const CUSTOMER_COLUMNS: &str =
    "id, first_name, last_name, national_id, email, created_at, updated_at, deleted_at";

const ORDER_COLUMNS: &str =
    "id, order_date, payment_method, customer_id, total_cents, created_at, updated_at, deleted_at";

const LINE_ITEM_COLUMNS: &str = "id, order_id, product_id, kind, unit_price_cents, line_number, \
     created_at, updated_at, deleted_at";

const API_KEY_COLUMNS: &str = "id, name, key_hash, key_prefix, key_type, rate_limit_per_minute, \
     allowed_endpoints, metadata, is_active, last_used_at, total_requests, created_at, updated_at";

/// Map unique-constraint violations to `StoreError::Conflict`.
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.constraint().unwrap_or("unique").to_string());
        }
    }
    StoreError::Database(err)
}

/// Escape `%`, `_` and `\` so user text is matched literally by `ILIKE`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Append the filters shared by listings and statistics.
fn push_order_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    customer_id: Option<Uuid>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
) {
    if let Some(customer_id) = customer_id {
        qb.push(" AND customer_id = ").push_bind(customer_id);
    }
    if let Some(from) = date_from {
        qb.push(" AND order_date >= ").push_bind(from);
    }
    if let Some(to) = date_to {
        qb.push(" AND order_date <= ").push_bind(to);
    }
}

/// Sales store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgSalesStore {
    pool: DbPool,
}

impl PgSalesStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SalesStore for PgSalesStore {
    async fn begin(&self) -> Result<Box<dyn SalesTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSalesTx { tx: Some(tx) }))
    }
}

/// One open PostgreSQL transaction.
///
/// Dropping it without `commit` rolls the transaction back.
pub struct PgSalesTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSalesTx {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::TransactionClosed)
    }
}

#[async_trait]
impl SalesTx for PgSalesTx {
    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl CustomerRepository for PgSalesTx {
    async fn find_customer(
        &mut self,
        id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<Customer>, StoreError> {
        let sql = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1 AND ($2 OR deleted_at IS NULL)"
        );
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .bind(include_deleted)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(customer)
    }

    async fn find_customer_by_national_id(
        &mut self,
        national_id: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE national_id = $1");
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(national_id)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(customer)
    }

    async fn find_customer_by_email(
        &mut self,
        email: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE email = $1");
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(email)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(customer)
    }

    async fn list_customers(&mut self) -> Result<Vec<Customer>, StoreError> {
        let sql = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE deleted_at IS NULL \
             ORDER BY created_at, id"
        );
        let customers = sqlx::query_as::<_, Customer>(&sql)
            .fetch_all(self.conn()?)
            .await?;
        Ok(customers)
    }

    async fn insert_customer(&mut self, fields: &CustomerFields) -> Result<Customer, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO customers (id, first_name, last_name, national_id, email)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {CUSTOMER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Customer>(&sql)
            .bind(Uuid::new_v4())
            .bind(&fields.first_name)
            .bind(&fields.last_name)
            .bind(&fields.national_id)
            .bind(&fields.email)
            .fetch_one(self.conn()?)
            .await
            .map_err(map_write_error)
    }

    async fn update_customer(
        &mut self,
        id: Uuid,
        fields: &CustomerFields,
    ) -> Result<Option<Customer>, StoreError> {
        let sql = format!(
            r#"
            UPDATE customers
            SET first_name = $2,
                last_name = $3,
                national_id = $4,
                email = $5,
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {CUSTOMER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .bind(&fields.first_name)
            .bind(&fields.last_name)
            .bind(&fields.national_id)
            .bind(&fields.email)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_write_error)
    }

    async fn soft_delete_customer(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let affected = sqlx::query(
            "UPDATE customers SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(self.conn()?)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }
}

#[derive(sqlx::FromRow)]
struct StatsTotals {
    total_orders: i64,
    total_cents: i64,
    average_cents: Option<f64>,
}

#[async_trait]
impl OrderRepository for PgSalesTx {
    async fn find_order(
        &mut self,
        id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<Order>, StoreError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND ($2 OR deleted_at IS NULL)"
        );
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .bind(include_deleted)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(order)
    }

    async fn list_orders(
        &mut self,
        filter: &OrderListFilter,
    ) -> Result<(Vec<Order>, i64), StoreError> {
        let conn = self.conn()?;

        let mut count = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM orders WHERE deleted_at IS NULL",
        );
        push_order_filters(&mut count, filter.customer_id, filter.date_from, filter.date_to);
        if let Some(method) = &filter.payment_method {
            count
                .push(" AND payment_method ILIKE ")
                .push_bind(format!("%{}%", escape_like(method)));
        }
        let total: i64 = count.build_query_scalar().fetch_one(&mut *conn).await?;

        let mut page = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE deleted_at IS NULL"
        ));
        push_order_filters(&mut page, filter.customer_id, filter.date_from, filter.date_to);
        if let Some(method) = &filter.payment_method {
            page.push(" AND payment_method ILIKE ")
                .push_bind(format!("%{}%", escape_like(method)));
        }
        page.push(" ORDER BY order_date DESC, created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(filter.per_page))
            .push(" OFFSET ")
            .push_bind(filter.offset());
        let orders = page.build_query_as::<Order>().fetch_all(&mut *conn).await?;

        Ok((orders, total))
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO orders (id, order_date, payment_method, customer_id, total_cents)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(Uuid::new_v4())
            .bind(order.order_date)
            .bind(&order.payment_method)
            .bind(order.customer_id)
            .bind(order.total_cents)
            .fetch_one(self.conn()?)
            .await?;
        Ok(order)
    }

    async fn update_order(
        &mut self,
        id: Uuid,
        order: &NewOrder,
    ) -> Result<Option<Order>, StoreError> {
        let sql = format!(
            r#"
            UPDATE orders
            SET order_date = $2,
                payment_method = $3,
                customer_id = $4,
                total_cents = $5,
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .bind(order.order_date)
            .bind(&order.payment_method)
            .bind(order.customer_id)
            .bind(order.total_cents)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(order)
    }

    async fn soft_delete_order(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let affected = sqlx::query(
            "UPDATE orders SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(self.conn()?)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn order_statistics(
        &mut self,
        filter: &StatsFilter,
    ) -> Result<OrderStatistics, StoreError> {
        let conn = self.conn()?;

        let mut totals = QueryBuilder::<Postgres>::new(
            r#"
            SELECT COUNT(*) AS total_orders,
                   COALESCE(SUM(total_cents), 0)::BIGINT AS total_cents,
                   AVG(total_cents)::DOUBLE PRECISION AS average_cents
            FROM orders
            WHERE deleted_at IS NULL"#,
        );
        push_order_filters(&mut totals, filter.customer_id, filter.date_from, filter.date_to);
        let totals = totals
            .build_query_as::<StatsTotals>()
            .fetch_one(&mut *conn)
            .await?;

        let mut breakdown = QueryBuilder::<Postgres>::new(
            r#"
            SELECT payment_method,
                   COUNT(*) AS order_count,
                   COALESCE(SUM(total_cents), 0)::BIGINT AS total_cents
            FROM orders
            WHERE deleted_at IS NULL"#,
        );
        push_order_filters(&mut breakdown, filter.customer_id, filter.date_from, filter.date_to);
        breakdown.push(" GROUP BY payment_method ORDER BY payment_method");
        let by_payment_method = breakdown
            .build_query_as::<PaymentMethodBreakdown>()
            .fetch_all(&mut *conn)
            .await?;

        Ok(OrderStatistics {
            total_orders: totals.total_orders,
            total_cents: totals.total_cents,
            average_cents: totals.average_cents,
            by_payment_method,
        })
    }
}

/// Raw `line_items` row; `kind` is stored as text.
#[derive(sqlx::FromRow)]
struct LineItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: i64,
    kind: String,
    unit_price_cents: i64,
    line_number: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<LineItemRow> for LineItem {
    type Error = StoreError;

    fn try_from(row: LineItemRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<ProductKind>()
            .map_err(|e| StoreError::Corrupt(format!("line item {}: {e}", row.id)))?;
        Ok(LineItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            kind,
            unit_price_cents: row.unit_price_cents,
            line_number: row.line_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[async_trait]
impl LineItemRepository for PgSalesTx {
    async fn list_line_items(
        &mut self,
        order_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<LineItem>, StoreError> {
        let sql = format!(
            "SELECT {LINE_ITEM_COLUMNS} FROM line_items \
             WHERE order_id = $1 AND ($2 OR deleted_at IS NULL) \
             ORDER BY created_at, line_number"
        );
        sqlx::query_as::<_, LineItemRow>(&sql)
            .bind(order_id)
            .bind(include_deleted)
            .fetch_all(self.conn()?)
            .await?
            .into_iter()
            .map(LineItem::try_from)
            .collect()
    }

    async fn insert_line_item(&mut self, item: &NewLineItem) -> Result<LineItem, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO line_items (id, order_id, product_id, kind, unit_price_cents, line_number)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {LINE_ITEM_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, LineItemRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(item.order_id)
            .bind(item.product_id)
            .bind(item.kind.as_str())
            .bind(item.unit_price_cents)
            .bind(item.line_number)
            .fetch_one(self.conn()?)
            .await?;
        LineItem::try_from(row)
    }

    async fn soft_delete_line_items(&mut self, order_id: Uuid) -> Result<u64, StoreError> {
        let affected = sqlx::query(
            "UPDATE line_items SET deleted_at = NOW(), updated_at = NOW() \
             WHERE order_id = $1 AND deleted_at IS NULL",
        )
        .bind(order_id)
        .execute(self.conn()?)
        .await?
        .rows_affected();
        Ok(affected)
    }
}

/// Raw `api_keys` row; JSON columns and the type need mapping.
#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id: Uuid,
    name: String,
    key_hash: String,
    key_prefix: String,
    key_type: String,
    rate_limit_per_minute: i32,
    allowed_endpoints: Option<Json<Vec<String>>>,
    metadata: Option<serde_json::Value>,
    is_active: bool,
    last_used_at: Option<DateTime<Utc>>,
    total_requests: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ApiKeyRow> for ApiKey {
    type Error = StoreError;

    fn try_from(row: ApiKeyRow) -> Result<Self, Self::Error> {
        let key_type = row
            .key_type
            .parse::<ApiKeyType>()
            .map_err(|e| StoreError::Corrupt(format!("api key {}: {e}", row.id)))?;
        Ok(ApiKey {
            id: row.id,
            name: row.name,
            key_hash: row.key_hash,
            key_prefix: row.key_prefix,
            key_type,
            rate_limit_per_minute: row.rate_limit_per_minute,
            allowed_endpoints: row.allowed_endpoints.map(|Json(e)| e),
            metadata: row.metadata,
            is_active: row.is_active,
            last_used_at: row.last_used_at,
            total_requests: row.total_requests,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// API key repository backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgApiKeyRepository {
    pool: DbPool,
}

impl PgApiKeyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyRepository for PgApiKeyRepository {
    async fn insert_api_key(&self, key: &NewApiKey) -> Result<ApiKey, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO api_keys (
                id, name, key_hash, key_prefix, key_type,
                rate_limit_per_minute, allowed_endpoints, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {API_KEY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ApiKeyRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&key.name)
            .bind(&key.key_hash)
            .bind(&key.key_prefix)
            .bind(key.key_type.as_str())
            .bind(key.rate_limit_per_minute)
            .bind(key.allowed_endpoints.clone().map(Json))
            .bind(&key.metadata)
            .fetch_one(&self.pool)
            .await
            .map_err(map_write_error)?;
        ApiKey::try_from(row)
    }

    async fn find_active_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>, StoreError> {
        let sql = format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_prefix = $1 AND is_active = true"
        );
        sqlx::query_as::<_, ApiKeyRow>(&sql)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ApiKey::try_from)
            .collect()
    }

    async fn find_api_key(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError> {
        let sql = format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = $1");
        sqlx::query_as::<_, ApiKeyRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ApiKey::try_from)
            .transpose()
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, StoreError> {
        let sql = format!("SELECT {API_KEY_COLUMNS} FROM api_keys ORDER BY created_at DESC");
        sqlx::query_as::<_, ApiKeyRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ApiKey::try_from)
            .collect()
    }

    async fn set_api_key_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> Result<Option<ApiKey>, StoreError> {
        let sql = format!(
            "UPDATE api_keys SET is_active = $2, updated_at = NOW() WHERE id = $1 \
             RETURNING {API_KEY_COLUMNS}"
        );
        sqlx::query_as::<_, ApiKeyRow>(&sql)
            .bind(id)
            .bind(active)
            .fetch_optional(&self.pool)
            .await?
            .map(ApiKey::try_from)
            .transpose()
    }

    async fn record_usage(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE api_keys
            SET total_requests = total_requests + 1,
                last_used_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
