//! Client for the products service's internal pricing endpoints.
//!
//! A lookup asks `<base>/api/internal/{services|bundles}/{id}` for one
//! product and normalizes whatever shape the answer has into a
//! `ProductQuote`. Transport failures and non-2xx answers are retried a
//! fixed number of times; answers that arrive but make no sense are not.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::models::product::{ProductKind, ProductQuote};

/// Name used when the products service omits one.
pub const DEFAULT_PRODUCT_NAME: &str = "Unnamed product";

/// Price fields accepted from the products service, in order of preference.
const PRICE_FIELDS: [&str; 3] = ["cost", "price", "computed_price"];

const USER_AGENT: &str = concat!("sales-service/", env!("CARGO_PKG_VERSION"));

/// Errors of price lookups, single or batched.
#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("unknown product kind '{0}', expected service or bundle")]
    UnknownKind(String),

    #[error("invalid product id {0}, expected a positive integer")]
    InvalidProductId(i64),

    /// Every attempt failed at the transport level or with a non-2xx status.
    #[error(
        "products service unavailable for {kind} {product_id} after {attempts} attempt(s): {last_error}"
    )]
    RemoteUnavailable {
        product_id: i64,
        kind: ProductKind,
        attempts: u32,
        last_error: String,
    },

    #[error("products service returned an unreadable body for product {product_id}: {reason}")]
    MalformedResponse { product_id: i64, reason: String },

    #[error("products service answered for product {} when asked for {requested}", .received.as_deref().unwrap_or("<none>"))]
    BadGatewayMismatch {
        requested: i64,
        received: Option<String>,
    },

    #[error("products service returned no price for product {product_id}")]
    BadGatewayMissingPrice { product_id: i64 },

    /// At least one item of a batch failed; every failure is listed.
    #[error("{} of the requested products could not be priced", .0.len())]
    PartialBatchFailure(Vec<ItemFailure>),
}

/// One failed item of a batch lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub index: usize,
    pub product_id: i64,
    pub kind: ProductKind,
    pub message: String,
}

/// Connection settings for the products service.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub base_url: String,
    /// Sent as `X-Service-Token` when set
    pub service_token: Option<String>,
    pub timeout: Duration,
    /// Total attempts per lookup, first one included
    pub attempts: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    pub health_timeout: Duration,
}

/// Source of product prices.
#[async_trait]
pub trait PricingClient: Send + Sync {
    /// Price one product.
    async fn fetch_price(
        &self,
        product_id: i64,
        kind: ProductKind,
    ) -> Result<ProductQuote, PricingError>;

    /// Whether the products service answers its health endpoint.
    async fn check_connectivity(&self) -> bool;
}

/// `PricingClient` over HTTP.
#[derive(Clone)]
pub struct HttpPricingClient {
    client: reqwest::Client,
    config: PricingConfig,
}

/// Outcome of a single attempt that did not produce a JSON body.
enum AttemptError {
    /// Worth another attempt
    Retryable(String),
    Fatal(PricingError),
}

impl HttpPricingClient {
    pub fn new(config: PricingConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get_json(&self, url: &str, product_id: i64) -> Result<Value, AttemptError> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(token) = &self.config.service_token {
            request = request.header("X-Service-Token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Retryable(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        serde_json::from_slice(&body).map_err(|e| {
            AttemptError::Fatal(PricingError::MalformedResponse {
                product_id,
                reason: e.to_string(),
            })
        })
    }
}

#[async_trait]
impl PricingClient for HttpPricingClient {
    /// Price one product.
    ///
    /// # Process
    ///
    /// 1. Reject non-positive ids without a network call
    /// 2. GET the kind-specific endpoint, up to `attempts` times
    /// 3. Unwrap the `data` envelope and validate the payload
    ///
    /// # Errors
    ///
    /// - `InvalidProductId`: id is zero or negative
    /// - `RemoteUnavailable`: every attempt failed
    /// - `MalformedResponse`: 2xx body is not JSON
    /// - `BadGatewayMismatch` / `BadGatewayMissingPrice`: payload is unusable
    async fn fetch_price(
        &self,
        product_id: i64,
        kind: ProductKind,
    ) -> Result<ProductQuote, PricingError> {
        if product_id <= 0 {
            return Err(PricingError::InvalidProductId(product_id));
        }

        let url = self.url(&format!(
            "/api/internal/{}/{}",
            kind.path_segment(),
            product_id
        ));
        let attempts = self.config.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.get_json(&url, product_id).await {
                Ok(body) => return normalize_quote(product_id, kind, body),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retryable(reason)) => {
                    tracing::warn!(
                        product_id,
                        %kind,
                        attempt,
                        error = %reason,
                        "products service call failed"
                    );
                    last_error = reason;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Err(PricingError::RemoteUnavailable {
            product_id,
            kind,
            attempts,
            last_error,
        })
    }

    async fn check_connectivity(&self) -> bool {
        let result = self
            .client
            .get(self.url("/api/health"))
            .timeout(self.config.health_timeout)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %e, "products service health check failed");
                false
            }
        }
    }
}

/// Read a JSON number or numeric string as `f64`.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Render a JSON scalar the way it should appear in error messages.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turn a products-service answer into a quote for `requested_id`.
///
/// The payload is `body.data` when that is an object, otherwise `body`.
/// Checks run in a fixed order: id present, price present, id matches.
pub fn normalize_quote(
    requested_id: i64,
    kind: ProductKind,
    body: Value,
) -> Result<ProductQuote, PricingError> {
    let payload = match body {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };

    let Some(id_value) = payload.get("id").filter(|v| !v.is_null()) else {
        return Err(PricingError::BadGatewayMismatch {
            requested: requested_id,
            received: None,
        });
    };

    let price = PRICE_FIELDS
        .iter()
        .filter_map(|field| payload.get(*field))
        .find_map(as_number)
        .ok_or(PricingError::BadGatewayMissingPrice {
            product_id: requested_id,
        })?;

    let id_matches = as_number(id_value).is_some_and(|id| id == requested_id as f64);
    if !id_matches {
        return Err(PricingError::BadGatewayMismatch {
            requested: requested_id,
            received: Some(render(id_value)),
        });
    }

    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(DEFAULT_PRODUCT_NAME)
        .to_string();
    let description = payload
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ProductQuote {
        id: requested_id,
        kind,
        name,
        price,
        description,
        raw_payload: payload,
    })
}
