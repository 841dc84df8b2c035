//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to a service on `AppState`
//! 3. Returns HTTP response (JSON, status code)

/// API key administration endpoints
pub mod api_keys;
/// Customer endpoints
pub mod customers;
/// Health check endpoints
pub mod health;
/// Service-to-service lookups
pub mod internal;
/// Order endpoints
pub mod orders;
