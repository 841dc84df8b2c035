//! Sales Service
//!
//! REST API for customers and orders. Order lines are priced by the remote
//! products service at write time; requests are authenticated with typed,
//! rate-limited API keys, and sibling services reach internal lookups with
//! a shared service token.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx, or an in-memory store
//! - **Rate limiting**: per-key minute buckets in Redis or in process
//! - **Authentication**: API keys stored as SHA-256 hashes
//! - **Format**: JSON requests/responses

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod repos;
pub mod routes;
pub mod services;
pub mod state;
