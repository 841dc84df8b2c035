//! Shared fixtures for the HTTP tests: the real router over in-memory
//! adapters and a pricing client with fixed answers.

#![allow(dead_code)]

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use tower::ServiceExt;

use sales_service::{
    middleware::internal::InternalTokens,
    models::{api_key::ApiKeyType, product::{ProductKind, ProductQuote}},
    rate_limit::MemoryRateLimitStore,
    repos::memory::{MemoryApiKeyRepository, MemoryStore},
    routes::build_router,
    services::{
        authenticator::{KeySpec, RateLimitDefaults},
        pricing_client::{PricingClient, PricingError},
    },
    state::{AppState, StateParts},
};

pub const SALES_TOKEN: &str = "sales-token";

/// Prices by product id; unknown ids are unavailable.
pub struct FakePricing {
    prices: HashMap<i64, f64>,
    reachable: bool,
}

impl FakePricing {
    pub fn catalog() -> Self {
        Self {
            prices: HashMap::from([(1, 45_000.0), (2, 75_000.0), (3, 30_000.0), (4, 0.0)]),
            reachable: true,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            prices: HashMap::new(),
            reachable: false,
        }
    }
}

#[async_trait]
impl PricingClient for FakePricing {
    async fn fetch_price(
        &self,
        product_id: i64,
        kind: ProductKind,
    ) -> Result<ProductQuote, PricingError> {
        match self.prices.get(&product_id) {
            Some(&price) => Ok(ProductQuote {
                id: product_id,
                kind,
                name: format!("product {product_id}"),
                price,
                description: None,
                raw_payload: json!({ "id": product_id, "price": price }),
            }),
            None => Err(PricingError::RemoteUnavailable {
                product_id,
                kind,
                attempts: 3,
                last_error: "connection refused".to_string(),
            }),
        }
    }

    async fn check_connectivity(&self) -> bool {
        self.reachable
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: MemoryStore,
    /// Raw admin key
    pub admin_key: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_pricing(FakePricing::catalog()).await
    }

    pub async fn with_pricing(pricing: FakePricing) -> Self {
        let store = MemoryStore::new();
        let state = AppState::new(StateParts {
            store: Arc::new(store.clone()),
            keys: Arc::new(MemoryApiKeyRepository::new()),
            counters: Arc::new(MemoryRateLimitStore::new()),
            pricing: Arc::new(pricing),
            pool: None,
            rate_limits: RateLimitDefaults::default(),
            internal_tokens: InternalTokens {
                products: Some("products-token".to_string()),
                sales: Some(SALES_TOKEN.to_string()),
                gateway: None,
                allow_any_origin: false,
            },
            debug: false,
        });

        let admin_key = state
            .authenticator
            .generate(KeySpec {
                name: "ops".to_string(),
                key_type: ApiKeyType::Admin,
                rate_limit_per_minute: None,
                allowed_endpoints: None,
                metadata: None,
            })
            .await
            .unwrap()
            .secret;

        Self {
            router: build_router(state.clone()),
            state,
            store,
            admin_key,
        }
    }

    /// Create a key of `key_type` and return the raw secret.
    pub async fn key(
        &self,
        key_type: ApiKeyType,
        rate_limit: Option<i32>,
        allowed_endpoints: Option<Vec<&str>>,
    ) -> String {
        self.state
            .authenticator
            .generate(KeySpec {
                name: format!("{key_type} test key"),
                key_type,
                rate_limit_per_minute: rate_limit,
                allowed_endpoints: allowed_endpoints
                    .map(|e| e.into_iter().map(str::to_string).collect()),
                metadata: None,
            })
            .await
            .unwrap()
            .secret
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a request authenticated with the admin key.
    pub async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = self
            .send(request(method, uri, Some(&self.admin_key), body))
            .await;
        into_parts(response).await
    }

    pub async fn create_customer(&self, national_id: &str, email: &str) -> Value {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/customers",
                Some(json!({
                    "first_name": "ana",
                    "last_name": "pérez",
                    "national_id": national_id,
                    "email": email,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }
}

pub fn request(method: Method, uri: &str, api_key: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// An internal-route request from `peer`.
pub fn internal_request(uri: &str, token: Option<&str>, peer: &str) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("X-Service-Token", token);
    }
    let mut request = builder.body(Body::empty()).unwrap();
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub async fn into_parts(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}
