//! Service-to-service gate for `/api/internal/*` routes.
//!
//! Callers present a shared static token in `X-Service-Token`. The token
//! names the calling service, and the connection must come from loopback or
//! a private network unless the service runs locally.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::error::AppError;

/// Header carrying the shared service token.
pub const SERVICE_TOKEN_HEADER: &str = "X-Service-Token";

/// Configured service tokens. Unset tokens match nothing.
#[derive(Debug, Clone, Default)]
pub struct InternalTokens {
    pub products: Option<String>,
    pub sales: Option<String>,
    pub gateway: Option<String>,
    /// Skip the origin check (local and development environments)
    pub allow_any_origin: bool,
}

impl InternalTokens {
    /// Name of the service owning `token`.
    pub fn resolve(&self, token: &str) -> Option<&'static str> {
        [
            ("products", &self.products),
            ("sales", &self.sales),
            ("gateway", &self.gateway),
        ]
        .into_iter()
        .find_map(|(service, configured)| {
            configured
                .as_deref()
                .filter(|c| !c.is_empty() && bool::from(c.as_bytes().ct_eq(token.as_bytes())))
                .map(|_| service)
        })
    }
}

/// Loopback or RFC 1918 private address.
pub fn is_trusted_origin(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| v4.is_loopback() || v4.is_private())
        }
    }
}

/// The service that called an internal route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCaller(pub &'static str);

/// Service token middleware function.
///
/// # Flow
///
/// 1. `X-Service-Token` must be present (401 `service_token_required`)
/// 2. It must equal a configured token (401 `invalid_service_token`)
/// 3. The peer address must be trusted (403 `origin_not_allowed`)
/// 4. Inject `ServiceCaller` and call the next handler
pub async fn require_service_token(
    State(tokens): State<Arc<InternalTokens>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(SERVICE_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|t| !t.is_empty())
        .ok_or(AppError::ServiceTokenRequired)?;

    let service = tokens.resolve(token).ok_or_else(|| {
        tracing::warn!("internal route called with an unknown service token");
        AppError::InvalidServiceToken
    })?;

    if !tokens.allow_any_origin {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        if !peer.is_some_and(is_trusted_origin) {
            tracing::warn!(service, ?peer, "internal route called from untrusted origin");
            return Err(AppError::OriginNotAllowed);
        }
    }

    request.extensions_mut().insert(ServiceCaller(service));
    Ok(next.run(request).await)
}
