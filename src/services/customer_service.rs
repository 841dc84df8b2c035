//! Customer service: normalization, validation and CRUD.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    models::customer::{Customer, CustomerFields, CustomerRequest},
    repos::{CustomerRepository, SalesStore, SalesTx, StoreError},
};

const MAX_NAME_LEN: usize = 100;
const MAX_EMAIL_LEN: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum CustomerError {
    #[error("{0}")]
    Validation(String),

    #[error("customer {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Trim and upper-case a name.
pub fn normalize_name(value: &str) -> String {
    value.trim().to_uppercase()
}

/// Trim and lower-case an email address.
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Keep only the digits of a national id (`30.123.456` → `30123456`).
pub fn normalize_national_id(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

/// Normalize a request and check field formats.
///
/// Uniqueness is checked separately, against the store.
pub fn validate(request: &CustomerRequest) -> Result<CustomerFields, CustomerError> {
    let fields = CustomerFields {
        first_name: normalize_name(&request.first_name),
        last_name: normalize_name(&request.last_name),
        national_id: normalize_national_id(&request.national_id),
        email: normalize_email(&request.email),
    };

    for (field, value) in [
        ("first_name", &fields.first_name),
        ("last_name", &fields.last_name),
    ] {
        let len = value.chars().count();
        if len == 0 {
            return Err(CustomerError::Validation(format!("{field} is required")));
        }
        if len > MAX_NAME_LEN {
            return Err(CustomerError::Validation(format!(
                "{field} must be at most {MAX_NAME_LEN} characters"
            )));
        }
    }

    if !(7..=8).contains(&fields.national_id.len()) {
        return Err(CustomerError::Validation(
            "national_id must have 7 or 8 digits".to_string(),
        ));
    }

    if fields.email.len() > MAX_EMAIL_LEN {
        return Err(CustomerError::Validation(format!(
            "email must be at most {MAX_EMAIL_LEN} characters"
        )));
    }
    if !is_valid_email(&fields.email) {
        return Err(CustomerError::Validation(
            "email must be a valid email address".to_string(),
        ));
    }

    Ok(fields)
}

#[derive(Clone)]
pub struct CustomerService {
    store: Arc<dyn SalesStore>,
}

impl CustomerService {
    pub fn new(store: Arc<dyn SalesStore>) -> Self {
        Self { store }
    }

    /// Active customers, oldest first.
    pub async fn list(&self) -> Result<Vec<Customer>, CustomerError> {
        let mut tx = self.store.begin().await?;
        let customers = tx.list_customers().await?;
        tx.commit().await?;
        Ok(customers)
    }

    pub async fn get(&self, id: Uuid) -> Result<Customer, CustomerError> {
        let mut tx = self.store.begin().await?;
        let customer = tx.find_customer(id, false).await?;
        tx.commit().await?;
        customer.ok_or(CustomerError::NotFound(id))
    }

    pub async fn create(&self, request: CustomerRequest) -> Result<Customer, CustomerError> {
        let fields = validate(&request)?;

        let mut tx = self.store.begin().await?;
        ensure_unique(tx.as_mut(), &fields, None).await?;
        let customer = tx.insert_customer(&fields).await.map_err(conflict)?;
        tx.commit().await?;

        tracing::info!(customer_id = %customer.id, "customer created");
        Ok(customer)
    }

    pub async fn update(
        &self,
        id: Uuid,
        request: CustomerRequest,
    ) -> Result<Customer, CustomerError> {
        let fields = validate(&request)?;

        let mut tx = self.store.begin().await?;
        if tx.find_customer(id, false).await?.is_none() {
            return Err(CustomerError::NotFound(id));
        }
        ensure_unique(tx.as_mut(), &fields, Some(id)).await?;
        let customer = tx
            .update_customer(id, &fields)
            .await
            .map_err(conflict)?
            .ok_or(CustomerError::NotFound(id))?;
        tx.commit().await?;

        tracing::info!(customer_id = %id, "customer updated");
        Ok(customer)
    }

    /// Soft-delete a customer. Their orders are left untouched.
    pub async fn delete(&self, id: Uuid) -> Result<(), CustomerError> {
        let mut tx = self.store.begin().await?;
        if !tx.soft_delete_customer(id).await? {
            return Err(CustomerError::NotFound(id));
        }
        tx.commit().await?;

        tracing::info!(customer_id = %id, "customer deleted");
        Ok(())
    }
}

/// Reject a national id or email already used by another customer,
/// soft-deleted ones included.
async fn ensure_unique(
    tx: &mut dyn SalesTx,
    fields: &CustomerFields,
    except: Option<Uuid>,
) -> Result<(), CustomerError> {
    let taken_by_other = |found: Option<Customer>| found.is_some_and(|c| Some(c.id) != except);

    if taken_by_other(tx.find_customer_by_national_id(&fields.national_id).await?) {
        return Err(CustomerError::Validation(
            "national_id has already been taken".to_string(),
        ));
    }
    if taken_by_other(tx.find_customer_by_email(&fields.email).await?) {
        return Err(CustomerError::Validation(
            "email has already been taken".to_string(),
        ));
    }
    Ok(())
}

/// A unique violation that slipped past `ensure_unique` (concurrent write).
fn conflict(err: StoreError) -> CustomerError {
    match err {
        StoreError::Conflict(constraint) => {
            CustomerError::Validation(format!("duplicate value violates {constraint}"))
        }
        other => CustomerError::Store(other),
    }
}
