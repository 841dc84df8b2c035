//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::{
    db::DbPool,
    middleware::internal::InternalTokens,
    rate_limit::RateLimitStore,
    repos::{ApiKeyRepository, SalesStore},
    services::{
        authenticator::{Authenticator, RateLimitDefaults},
        batch_pricing::BatchPricingResolver,
        customer_service::CustomerService,
        order_service::OrderService,
        pricing_client::PricingClient,
    },
};

/// Everything a request may need. Cheap to clone: every field is an `Arc`
/// underneath.
#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub customers: CustomerService,
    pub authenticator: Authenticator,
    pub pricing: Arc<dyn PricingClient>,
    /// `None` when running on the in-memory store
    pub pool: Option<DbPool>,
    pub internal_tokens: Arc<InternalTokens>,
    /// Expose causes of 500 responses
    pub debug: bool,
}

/// Adapters and settings `AppState` is assembled from.
pub struct StateParts {
    pub store: Arc<dyn SalesStore>,
    pub keys: Arc<dyn ApiKeyRepository>,
    pub counters: Arc<dyn RateLimitStore>,
    pub pricing: Arc<dyn PricingClient>,
    pub pool: Option<DbPool>,
    pub rate_limits: RateLimitDefaults,
    pub internal_tokens: InternalTokens,
    pub debug: bool,
}

impl AppState {
    pub fn new(parts: StateParts) -> Self {
        let resolver = BatchPricingResolver::new(parts.pricing.clone());
        Self {
            orders: OrderService::new(parts.store.clone(), resolver),
            customers: CustomerService::new(parts.store),
            authenticator: Authenticator::new(parts.keys, parts.counters, parts.rate_limits),
            pricing: parts.pricing,
            pool: parts.pool,
            internal_tokens: Arc::new(parts.internal_tokens),
            debug: parts.debug,
        }
    }
}
