//! Batch price resolution.
//!
//! Resolving a batch is all-or-nothing: either every item is priced, or the
//! caller gets a single `PartialBatchFailure` listing each item that failed.

use std::sync::Arc;

use crate::{
    models::product::{PriceRequest, ResolvedItem},
    services::pricing_client::{ItemFailure, PricingClient, PricingError},
};

#[derive(Clone)]
pub struct BatchPricingResolver {
    client: Arc<dyn PricingClient>,
}

impl BatchPricingResolver {
    pub fn new(client: Arc<dyn PricingClient>) -> Self {
        Self { client }
    }

    /// Price every item of `items`, in order.
    ///
    /// # Process
    ///
    /// 1. Look up each item sequentially through the pricing client
    /// 2. Record failures and keep going
    /// 3. Return the resolved items only if none failed
    ///
    /// # Errors
    ///
    /// `PartialBatchFailure` with one entry per failed item, in input order.
    pub async fn resolve_batch(
        &self,
        items: &[PriceRequest],
    ) -> Result<Vec<ResolvedItem>, PricingError> {
        let mut resolved = Vec::with_capacity(items.len());
        let mut failures = Vec::new();

        for (index, item) in items.iter().enumerate() {
            match self.client.fetch_price(item.product_id, item.kind).await {
                Ok(quote) => resolved.push(ResolvedItem {
                    index,
                    requested_product_id: item.product_id,
                    requested_kind: item.kind,
                    quote,
                }),
                Err(err) => {
                    tracing::warn!(
                        index,
                        product_id = item.product_id,
                        kind = %item.kind,
                        error = %err,
                        "price lookup failed"
                    );
                    failures.push(ItemFailure {
                        index,
                        product_id: item.product_id,
                        kind: item.kind,
                        message: err.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(PricingError::PartialBatchFailure(failures));
        }
        Ok(resolved)
    }
}
