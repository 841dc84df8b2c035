//! Data models representing database entities and API payloads.

/// API key authentication model
pub mod api_key;
/// Customer model
pub mod customer;
/// Order and line-item models
pub mod order;
/// Product lookup types shared with the products service
pub mod product;
