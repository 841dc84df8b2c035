//! HTTP middleware components.
//!
//! Middleware are functions that run before route handlers.
//! They authenticate requests and short-circuit the ones that fail.

/// API key authentication middleware
pub mod auth;
/// Service token gate for internal routes
pub mod internal;
