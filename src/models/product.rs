//! Product types shared with the remote products service.
//!
//! The sales service never owns products. It only snapshots their price at
//! order time, so these types describe what a price lookup asks for and what
//! it returns.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::services::pricing_client::PricingError;

/// Discriminator between standalone services and composite bundles.
///
/// Each kind is resolved through its own endpoint namespace on the
/// products service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Service,
    Bundle,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Service => "service",
            ProductKind::Bundle => "bundle",
        }
    }

    /// Path segment used by the products service for this kind.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ProductKind::Service => "services",
            ProductKind::Bundle => "bundles",
        }
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductKind {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service" => Ok(ProductKind::Service),
            "bundle" => Ok(ProductKind::Bundle),
            other => Err(PricingError::UnknownKind(other.to_string())),
        }
    }
}

/// One product to price: the pair the products service is queried with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceRequest {
    pub product_id: i64,
    pub kind: ProductKind,
}

/// Normalized answer of the products service for a single product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductQuote {
    pub id: i64,
    pub kind: ProductKind,
    pub name: String,
    /// Unit price in currency units, whichever source field supplied it
    pub price: f64,
    pub description: Option<String>,
    /// Payload exactly as the products service returned it (after envelope unwrap)
    pub raw_payload: serde_json::Value,
}

/// A quote tied back to the line of the request that asked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedItem {
    /// Position of the item in the request
    pub index: usize,
    pub requested_product_id: i64,
    pub requested_kind: ProductKind,
    pub quote: ProductQuote,
}
