//! API key administration handlers. Admin keys only.
//!
//! - GET /api/admin/api-keys
//! - POST /api/admin/api-keys
//! - GET /api/admin/api-keys/{id}
//! - POST /api/admin/api-keys/{id}/enable
//! - POST /api/admin/api-keys/{id}/disable

use axum::{
    Extension, Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::api_key::{
        ApiKeyDetailsResponse, ApiKeyResponse, ApiKeyType, CreateApiKeyRequest,
        CreatedApiKeyResponse,
    },
    services::authenticator::KeySpec,
    state::AppState,
};

pub async fn list_api_keys(
    State(state): State<AppState>,
) -> Result<Json<Vec<ApiKeyResponse>>, AppError> {
    let keys = state.authenticator.list().await?;
    Ok(Json(keys.into_iter().map(Into::into).collect()))
}

/// Create an API key.
///
/// # Request Body
///
/// ```json
/// {
///   "name": "storefront",
///   "key_type": "frontend",
///   "rate_limit_per_minute": 60,
///   "allowed_endpoints": ["/api/orders*"],
///   "metadata": { "client": "web" }
/// }
/// ```
///
/// # Response (201 Created)
///
/// The stored key plus `key`, the raw secret. It is not retrievable later.
pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Result<Json<CreateApiKeyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedApiKeyResponse>), AppError> {
    let Json(request) = body?;
    let key_type = request
        .key_type
        .parse::<ApiKeyType>()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let generated = state
        .authenticator
        .generate(KeySpec {
            name: request.name,
            key_type,
            rate_limit_per_minute: request.rate_limit_per_minute,
            allowed_endpoints: request.allowed_endpoints,
            metadata: request.metadata,
        })
        .await?;

    tracing::info!(
        created_by = %auth.api_key_id,
        api_key_id = %generated.api_key.id,
        "API key issued through admin endpoint"
    );
    Ok((
        StatusCode::CREATED,
        Json(CreatedApiKeyResponse {
            api_key: generated.api_key.into(),
            key: generated.secret,
        }),
    ))
}

/// Key details with current-minute quota usage.
pub async fn get_api_key(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ApiKeyDetailsResponse>, AppError> {
    let Path(id) = id?;
    let key = state.authenticator.get(id).await?;
    let usage = state.authenticator.usage(&key).await?;
    Ok(Json(ApiKeyDetailsResponse {
        api_key: key.into(),
        usage,
    }))
}

pub async fn enable_api_key(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    let Path(id) = id?;
    let key = state.authenticator.set_active(id, true).await?;
    Ok(Json(key.into()))
}

/// Disabled keys fail authentication with 401 `invalid_api_key`.
pub async fn disable_api_key(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    let Path(id) = id?;
    let key = state.authenticator.set_active(id, false).await?;
    Ok(Json(key.into()))
}
