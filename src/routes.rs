//! Route table.
//!
//! Four groups, each with its own gate:
//! - public: health checks
//! - any API key: customers and orders
//! - admin API key: key administration
//! - service token: internal lookups

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    error,
    handlers::{api_keys, customers, health, internal, orders},
    middleware::{
        auth::{self, KeyGate},
        internal as internal_gate,
    },
    models::api_key::ApiKeyType,
    state::AppState,
};

const ADMIN_ONLY: &[ApiKeyType] = &[ApiKeyType::Admin];

/// Build the application router with every route and middleware attached.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/orders/health", get(health::pricing_health));

    let keyed_routes = Router::new()
        .route(
            "/api/customers",
            get(customers::list_customers).post(customers::create_customer),
        )
        .route(
            "/api/customers/{id}",
            get(customers::get_customer)
                .put(customers::update_customer)
                .delete(customers::delete_customer),
        )
        .route(
            "/api/orders",
            get(orders::list_orders).post(orders::create_order),
        )
        .route("/api/orders/stats", get(orders::order_stats))
        .route(
            "/api/orders/{id}",
            get(orders::get_order)
                .put(orders::update_order)
                .delete(orders::delete_order),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            KeyGate::any(state.authenticator.clone()),
            auth::require_api_key,
        ));

    let admin_routes = Router::new()
        .route(
            "/api/admin/api-keys",
            get(api_keys::list_api_keys).post(api_keys::create_api_key),
        )
        .route("/api/admin/api-keys/{id}", get(api_keys::get_api_key))
        .route(
            "/api/admin/api-keys/{id}/enable",
            post(api_keys::enable_api_key),
        )
        .route(
            "/api/admin/api-keys/{id}/disable",
            post(api_keys::disable_api_key),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            KeyGate::only(state.authenticator.clone(), ADMIN_ONLY),
            auth::require_api_key,
        ));

    let internal_routes = Router::new()
        .route("/api/internal/customers/{id}", get(internal::get_customer))
        .route("/api/internal/orders/{id}", get(internal::get_order))
        .route_layer(axum_middleware::from_fn_with_state(
            state.internal_tokens.clone(),
            internal_gate::require_service_token,
        ));

    Router::new()
        .merge(public_routes)
        .merge(keyed_routes)
        .merge(admin_routes)
        .merge(internal_routes)
        // Runs outside every handler and gate so it sees their 500s
        .layer(axum_middleware::from_fn_with_state(
            state.debug,
            error::debug_details,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
