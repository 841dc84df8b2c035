//! Customer data models and API request/response types.
//!
//! This module defines:
//! - `Customer`: Database entity representing a customer
//! - `CustomerRequest`: Request body for creating and replacing customers
//! - `CustomerResponse`: Response body returned to clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a customer record from the database.
///
/// # Database Table
///
/// Maps to the `customers` table. `national_id` and `email` are unique
/// across all rows, soft-deleted ones included.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Customer {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker. Deleted customers stay in the table so old
    /// orders keep a valid reference.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Normalized, validated customer attributes ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerFields {
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
    pub email: String,
}

/// Request body for `POST /api/customers` and `PUT /api/customers/{id}`.
///
/// # JSON Example
///
/// ```json
/// {
///   "first_name": "Ana",
///   "last_name": "Pérez",
///   "national_id": "30.123.456",
///   "email": " Ana.Perez@Example.com "
/// }
/// ```
///
/// Values are normalized before validation (see `CustomerService`).
#[derive(Debug, Deserialize)]
pub struct CustomerRequest {
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
    pub email: String,
}

/// Response body for customer endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub national_id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Customer> for CustomerResponse {
    fn from(customer: Customer) -> Self {
        Self {
            full_name: customer.full_name(),
            id: customer.id,
            first_name: customer.first_name,
            last_name: customer.last_name,
            national_id: customer.national_id,
            email: customer.email,
            created_at: customer.created_at,
            updated_at: customer.updated_at,
        }
    }
}
