//! API key authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Read the API key from the `X-API-Key` header
//! 2. Run it through the `Authenticator` (key, type, endpoint, quota)
//! 3. Inject the resulting `AuthContext` into the request
//! 4. Reject the request with the authenticator's error otherwise

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{
    error::AppError,
    models::api_key::ApiKeyType,
    services::authenticator::Authenticator,
};

pub use crate::services::authenticator::AuthContext;

/// Header carrying the raw API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Middleware state: the authenticator and the key types a route group accepts.
#[derive(Clone)]
pub struct KeyGate {
    authenticator: Authenticator,
    allowed_types: &'static [ApiKeyType],
}

impl KeyGate {
    /// Accept every key type.
    pub fn any(authenticator: Authenticator) -> Self {
        Self {
            authenticator,
            allowed_types: &[],
        }
    }

    pub fn only(authenticator: Authenticator, allowed_types: &'static [ApiKeyType]) -> Self {
        Self {
            authenticator,
            allowed_types,
        }
    }
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `X-API-Key` header from request
/// 2. Authenticate it against the request path
/// 3. If admitted: inject `AuthContext` into request, call next handler
/// 4. Otherwise: return the 401, 403 or 429 error
///
/// # Headers
///
/// ```text
/// X-API-Key: ak_3f9c...
/// ```
pub async fn require_api_key(
    State(gate): State<KeyGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let credential = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let path = request.uri().path().to_string();

    let auth_context = gate
        .authenticator
        .authenticate(credential.as_deref(), &path, gate.allowed_types)
        .await?;

    tracing::debug!(api_key_id = %auth_context.api_key_id, path, "request authenticated");

    // Route handlers can now extract this using Extension<AuthContext>
    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}
