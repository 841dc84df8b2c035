//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They depend on repository and client traits, never on axum types.

pub mod authenticator;
pub mod batch_pricing;
pub mod customer_service;
pub mod order_service;
pub mod pricing_client;
