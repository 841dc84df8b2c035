//! Error types and HTTP error response handling.
//!
//! Services raise their own error enums; this module wraps them in
//! `AppError` and decides how each one looks on the wire.

use axum::{
    Json,
    extract::{
        Request, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use crate::{
    rate_limit::WINDOW_SECS,
    repos::StoreError,
    services::{
        authenticator::AuthError, customer_service::CustomerError, order_service::OrderError,
        pricing_client::PricingError,
    },
};

/// Body size cap when rewriting error responses in debug mode.
const DEBUG_BODY_LIMIT: usize = 64 * 1024;

/// Application-wide error type.
///
/// Each variant maps to an HTTP status code and a stable error code.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Request body, query or path did not pass validation.
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Customer(#[from] CustomerError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal route called without `X-Service-Token`.
    #[error("service token required")]
    ServiceTokenRequired,

    #[error("invalid service token")]
    InvalidServiceToken,

    /// Internal route called from outside the private network.
    #[error("origin not allowed")]
    OriginNotAllowed,
}

/// Cause of a 500 response, attached as a response extension so the debug
/// middleware can expose it.
#[derive(Debug, Clone)]
pub struct InternalErrorDetail(pub String);

/// How an error is rendered.
struct Rendered {
    status: StatusCode,
    code: &'static str,
    message: String,
    /// Extra fields merged into the `error` object
    extra: Option<(&'static str, Value)>,
}

impl Rendered {
    fn new(status: StatusCode, code: &'static str, message: String) -> Self {
        Self {
            status,
            code,
            message,
            extra: None,
        }
    }

    fn internal(code: &'static str, message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message.to_string())
    }
}

fn render_pricing(err: &PricingError) -> Rendered {
    let message = err.to_string();
    match err {
        PricingError::UnknownKind(_) | PricingError::InvalidProductId(_) => {
            Rendered::new(StatusCode::BAD_REQUEST, "invalid_product", message)
        }
        PricingError::RemoteUnavailable { .. } => {
            Rendered::new(StatusCode::SERVICE_UNAVAILABLE, "remote_unavailable", message)
        }
        PricingError::MalformedResponse { .. }
        | PricingError::BadGatewayMismatch { .. }
        | PricingError::BadGatewayMissingPrice { .. } => {
            Rendered::new(StatusCode::BAD_GATEWAY, "bad_gateway", message)
        }
        PricingError::PartialBatchFailure(failures) => Rendered {
            status: StatusCode::BAD_REQUEST,
            code: "partial_batch_failure",
            message,
            extra: Some(("failures", json!(failures))),
        },
    }
}

impl AppError {
    fn render(&self) -> Rendered {
        let message = self.to_string();
        match self {
            AppError::Validation(_) => {
                Rendered::new(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", message)
            }

            AppError::Customer(CustomerError::Validation(_)) => {
                Rendered::new(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", message)
            }
            AppError::Customer(CustomerError::NotFound(_)) => {
                Rendered::new(StatusCode::NOT_FOUND, "customer_not_found", message)
            }
            AppError::Customer(CustomerError::Store(_)) | AppError::Store(_) => {
                Rendered::internal("internal_error", "An internal error occurred")
            }

            AppError::Order(OrderError::CustomerNotFound(_)) => {
                Rendered::new(StatusCode::NOT_FOUND, "customer_not_found", message)
            }
            AppError::Order(OrderError::OrderNotFound(_)) => {
                Rendered::new(StatusCode::NOT_FOUND, "order_not_found", message)
            }
            AppError::Order(OrderError::Pricing(err)) | AppError::Pricing(err) => {
                render_pricing(err)
            }
            AppError::Order(
                OrderError::InvalidProductPrice { .. } | OrderError::TotalOverflow { .. },
            ) => {
                Rendered::new(StatusCode::BAD_REQUEST, "invalid_product_price", message)
            }
            AppError::Order(OrderError::Processing(_)) => {
                Rendered::internal("order_processing_error", "The order could not be processed")
            }

            AppError::Auth(AuthError::MissingCredential) => {
                Rendered::new(StatusCode::UNAUTHORIZED, "api_key_required", message)
            }
            AppError::Auth(AuthError::InvalidCredential) => {
                Rendered::new(StatusCode::UNAUTHORIZED, "invalid_api_key", message)
            }
            AppError::Auth(AuthError::Forbidden(_)) => {
                Rendered::new(StatusCode::FORBIDDEN, "forbidden", message)
            }
            AppError::Auth(AuthError::EndpointNotAllowed(_)) => {
                Rendered::new(StatusCode::FORBIDDEN, "endpoint_not_allowed", message)
            }
            AppError::Auth(AuthError::RateLimitExceeded { .. }) => Rendered {
                status: StatusCode::TOO_MANY_REQUESTS,
                code: "rate_limit_exceeded",
                message,
                extra: Some(("retry_after", json!(WINDOW_SECS))),
            },
            AppError::Auth(AuthError::NotFound(_)) => {
                Rendered::new(StatusCode::NOT_FOUND, "api_key_not_found", message)
            }
            AppError::Auth(AuthError::Validation(_)) => {
                Rendered::new(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", message)
            }
            AppError::Auth(AuthError::Store(_)) => {
                Rendered::internal("internal_error", "An internal error occurred")
            }

            AppError::ServiceTokenRequired => {
                Rendered::new(StatusCode::UNAUTHORIZED, "service_token_required", message)
            }
            AppError::InvalidServiceToken => {
                Rendered::new(StatusCode::UNAUTHORIZED, "invalid_service_token", message)
            }
            AppError::OriginNotAllowed => {
                Rendered::new(StatusCode::FORBIDDEN, "origin_not_allowed", message)
            }
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// 500 responses never carry the cause in the body; it is logged and
/// attached as an `InternalErrorDetail` extension instead.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let rendered = self.render();

        let mut error = json!({
            "code": rendered.code,
            "message": rendered.message,
        });
        if let (Some((key, value)), Some(object)) = (rendered.extra, error.as_object_mut()) {
            object.insert(key.to_string(), value);
        }

        let mut response = (rendered.status, Json(json!({ "error": error }))).into_response();

        if rendered.status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(WINDOW_SECS));
        }

        if rendered.status.is_server_error() {
            tracing::error!(error = ?self, code = rendered.code, "request failed");
            response
                .extensions_mut()
                .insert(InternalErrorDetail(self.to_string()));
        }

        response
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

/// Append the cause of 500 responses as `error.debug` when debug mode is on.
pub async fn debug_details(State(debug): State<bool>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if !debug {
        return response;
    }
    let Some(InternalErrorDetail(detail)) = response.extensions().get::<InternalErrorDetail>().cloned()
    else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let Ok(bytes) = axum::body::to_bytes(body, DEBUG_BODY_LIMIT).await else {
        return (parts.status, Json(json!({ "error": { "debug": detail } }))).into_response();
    };

    let mut value: Value = serde_json::from_slice(&bytes).unwrap_or_else(|_| json!({ "error": {} }));
    if let Some(error) = value.get_mut("error").and_then(Value::as_object_mut) {
        error.insert("debug".to_string(), Value::String(detail));
    }

    parts.headers.remove(header::CONTENT_LENGTH);
    (parts, Json(value)).into_response()
}
