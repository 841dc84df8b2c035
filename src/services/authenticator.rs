//! API key authentication, per-minute quotas and key management.
//!
//! # Admission
//!
//! A request is admitted only after every step below succeeds, in order:
//!
//! 1. An `X-API-Key` credential is present
//! 2. An active key with the credential's prefix has its SHA-256 hash
//! 3. The key type is one the route accepts
//! 4. The request path matches the key's endpoint allowlist
//! 5. The key's per-minute quota has room (internal keys skip this)
//!
//! Usage is recorded only for admitted requests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{
    models::api_key::{ApiKey, ApiKeyType, KEY_PREFIX_LEN, KeyUsage, NewApiKey},
    rate_limit::{RateLimitStore, WINDOW_SECS, bucket_key},
    repos::{ApiKeyRepository, StoreError},
};

/// Random characters after the type marker of a raw key.
const SECRET_RANDOM_LEN: usize = 40;

const MAX_KEY_NAME_LEN: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("API key required")]
    MissingCredential,

    #[error("invalid API key")]
    InvalidCredential,

    #[error("API key type '{0}' is not allowed on this route")]
    Forbidden(ApiKeyType),

    #[error("API key is not allowed to access {0}")]
    EndpointNotAllowed(String),

    #[error("rate limit of {limit} requests per minute exceeded")]
    RateLimitExceeded { limit: u64 },

    #[error("API key {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Identity of an admitted request.
///
/// Inserted into request extensions by the API key middleware; handlers
/// extract it with `Extension<AuthContext>`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    pub api_key_id: Uuid,
    pub name: String,
    pub key_type: ApiKeyType,
}

/// Default per-minute quotas by key type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDefaults {
    pub frontend: i32,
    pub admin: i32,
    pub internal: i32,
}

impl RateLimitDefaults {
    pub fn for_type(&self, key_type: ApiKeyType) -> i32 {
        match key_type {
            ApiKeyType::Frontend => self.frontend,
            ApiKeyType::Admin => self.admin,
            ApiKeyType::Internal => self.internal,
        }
    }
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            frontend: 60,
            admin: 120,
            internal: 1000,
        }
    }
}

/// What to create a key with.
#[derive(Debug, Clone)]
pub struct KeySpec {
    pub name: String,
    pub key_type: ApiKeyType,
    /// Falls back to the type's default
    pub rate_limit_per_minute: Option<i32>,
    pub allowed_endpoints: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

/// A freshly created key and its raw secret.
///
/// This is the only place the secret exists after creation.
#[derive(Debug)]
pub struct GeneratedKey {
    pub api_key: ApiKey,
    pub secret: String,
}

/// SHA-256 of a raw key, hex encoded.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// A new raw key: the type marker followed by random alphanumerics.
pub fn generate_secret(key_type: ApiKeyType) -> String {
    let random: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{}{random}", key_type.secret_prefix())
}

fn key_prefix(secret: &str) -> String {
    secret.chars().take(KEY_PREFIX_LEN).collect()
}

#[derive(Clone)]
pub struct Authenticator {
    keys: Arc<dyn ApiKeyRepository>,
    counters: Arc<dyn RateLimitStore>,
    defaults: RateLimitDefaults,
}

impl Authenticator {
    pub fn new(
        keys: Arc<dyn ApiKeyRepository>,
        counters: Arc<dyn RateLimitStore>,
        defaults: RateLimitDefaults,
    ) -> Self {
        Self {
            keys,
            counters,
            defaults,
        }
    }

    /// Authenticate a request to `path` made now.
    ///
    /// An empty `allowed_types` accepts every key type.
    pub async fn authenticate(
        &self,
        credential: Option<&str>,
        path: &str,
        allowed_types: &[ApiKeyType],
    ) -> Result<AuthContext, AuthError> {
        self.authenticate_at(Utc::now(), credential, path, allowed_types)
            .await
    }

    /// Authenticate a request to `path` made at `now`.
    ///
    /// `now` selects the quota window.
    pub async fn authenticate_at(
        &self,
        now: DateTime<Utc>,
        credential: Option<&str>,
        path: &str,
        allowed_types: &[ApiKeyType],
    ) -> Result<AuthContext, AuthError> {
        let key = self.verify(credential).await?;

        if !allowed_types.is_empty() && !allowed_types.contains(&key.key_type) {
            tracing::warn!(key_prefix = %key.key_prefix, key_type = %key.key_type, path, "key type rejected");
            return Err(AuthError::Forbidden(key.key_type));
        }

        if !key.allows_endpoint(path) {
            tracing::warn!(key_prefix = %key.key_prefix, path, "endpoint not in key allowlist");
            return Err(AuthError::EndpointNotAllowed(path.to_string()));
        }

        if key.key_type.is_rate_limited() {
            let limit = u64::try_from(key.rate_limit_per_minute).unwrap_or(0);
            let admitted = self
                .counters
                .try_acquire(&bucket_key(key.id, now), limit, WINDOW_SECS)
                .await?;
            if admitted.is_none() {
                tracing::warn!(key_prefix = %key.key_prefix, limit, "rate limit exceeded");
                return Err(AuthError::RateLimitExceeded { limit });
            }
        }

        if let Err(e) = self.keys.record_usage(key.id, now).await {
            tracing::error!(api_key_id = %key.id, error = %e, "failed to record API key usage");
        }

        Ok(AuthContext {
            api_key_id: key.id,
            name: key.name,
            key_type: key.key_type,
        })
    }

    /// Resolve a raw credential to its active key.
    ///
    /// Every key sharing the credential's prefix is checked.
    pub async fn verify(&self, credential: Option<&str>) -> Result<ApiKey, AuthError> {
        let credential = credential
            .filter(|c| !c.trim().is_empty())
            .ok_or(AuthError::MissingCredential)?;

        let hash = hash_secret(credential);
        let candidates = self.keys.find_active_by_prefix(&key_prefix(credential)).await?;

        let mut matched = None;
        for candidate in candidates {
            let equal: bool = candidate.key_hash.as_bytes().ct_eq(hash.as_bytes()).into();
            if equal && matched.is_none() {
                matched = Some(candidate);
            }
        }
        matched.ok_or(AuthError::InvalidCredential)
    }

    /// Create a key and return it with its raw secret.
    ///
    /// # Process
    ///
    /// 1. Validate name, quota and allowlist
    /// 2. Generate `<type marker><40 alphanumerics>`
    /// 3. Store its hash and first 8 characters
    pub async fn generate(&self, spec: KeySpec) -> Result<GeneratedKey, AuthError> {
        let name = spec.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_KEY_NAME_LEN {
            return Err(AuthError::Validation(format!(
                "name must be between 1 and {MAX_KEY_NAME_LEN} characters"
            )));
        }

        let rate_limit_per_minute = spec
            .rate_limit_per_minute
            .unwrap_or_else(|| self.defaults.for_type(spec.key_type));
        if rate_limit_per_minute < 1 {
            return Err(AuthError::Validation(
                "rate_limit_per_minute must be at least 1".to_string(),
            ));
        }

        let allowed_endpoints = spec.allowed_endpoints.map(|patterns| {
            patterns
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
        });

        let secret = generate_secret(spec.key_type);
        let api_key = self
            .keys
            .insert_api_key(&NewApiKey {
                name,
                key_hash: hash_secret(&secret),
                key_prefix: key_prefix(&secret),
                key_type: spec.key_type,
                rate_limit_per_minute,
                allowed_endpoints,
                metadata: spec.metadata,
            })
            .await?;

        tracing::info!(
            api_key_id = %api_key.id,
            key_prefix = %api_key.key_prefix,
            key_type = %api_key.key_type,
            "API key created"
        );
        Ok(GeneratedKey { api_key, secret })
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<ApiKey, AuthError> {
        let key = self
            .keys
            .set_api_key_active(id, active)
            .await?
            .ok_or(AuthError::NotFound(id))?;

        tracing::info!(api_key_id = %id, active, "API key status changed");
        Ok(key)
    }

    pub async fn get(&self, id: Uuid) -> Result<ApiKey, AuthError> {
        self.keys
            .find_api_key(id)
            .await?
            .ok_or(AuthError::NotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<ApiKey>, AuthError> {
        Ok(self.keys.list_api_keys().await?)
    }

    /// Quota usage of `key` in the current minute.
    pub async fn usage(&self, key: &ApiKey) -> Result<KeyUsage, AuthError> {
        let used = self.counters.current(&bucket_key(key.id, Utc::now())).await?;
        let remaining = key
            .key_type
            .is_rate_limited()
            .then(|| u64::try_from(key.rate_limit_per_minute).unwrap_or(0).saturating_sub(used));

        Ok(KeyUsage {
            used_this_minute: used,
            remaining_this_minute: remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rate_limit::MemoryRateLimitStore, repos::memory::MemoryApiKeyRepository};
    use chrono::{TimeDelta, TimeZone};

    fn authenticator() -> (Authenticator, MemoryApiKeyRepository) {
        let repo = MemoryApiKeyRepository::new();
        let auth = Authenticator::new(
            Arc::new(repo.clone()),
            Arc::new(MemoryRateLimitStore::new()),
            RateLimitDefaults::default(),
        );
        (auth, repo)
    }

    fn spec(key_type: ApiKeyType) -> KeySpec {
        KeySpec {
            name: "storefront".to_string(),
            key_type,
            rate_limit_per_minute: None,
            allowed_endpoints: None,
            metadata: None,
        }
    }

    fn minute(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 10, m, 0).unwrap()
    }

    #[test]
    fn hashing_is_stable_hex() {
        let hash = hash_secret("ak_secret");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_secret("ak_secret"));
        assert_ne!(hash, hash_secret("ak_secreT"));
    }

    #[tokio::test]
    async fn credential_differing_only_in_last_char_is_rejected() {
        let (auth, _) = authenticator();
        let generated = auth.generate(spec(ApiKeyType::Frontend)).await.unwrap();

        let mut forged = generated.secret.clone();
        let last = forged.pop().unwrap();
        forged.push(if last == 'a' { 'b' } else { 'a' });

        assert!(matches!(
            auth.verify(Some(&forged)).await,
            Err(AuthError::InvalidCredential)
        ));
        let mut truncated = generated.secret.clone();
        truncated.pop();
        assert!(matches!(
            auth.verify(Some(&truncated)).await,
            Err(AuthError::InvalidCredential)
        ));
        assert!(auth.verify(Some(&generated.secret)).await.is_ok());
    }

    #[test]
    fn secrets_carry_type_marker() {
        let secret = generate_secret(ApiKeyType::Admin);
        assert!(secret.starts_with("admin_"));
        assert_eq!(secret.len(), "admin_".len() + SECRET_RANDOM_LEN);
        assert!(secret["admin_".len()..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(secret, generate_secret(ApiKeyType::Admin));
    }

    #[tokio::test]
    async fn generated_key_authenticates() {
        let (auth, repo) = authenticator();
        let generated = auth.generate(spec(ApiKeyType::Frontend)).await.unwrap();

        assert!(generated.secret.starts_with("ak_"));
        assert_eq!(generated.api_key.key_prefix, &generated.secret[..KEY_PREFIX_LEN]);
        assert_eq!(generated.api_key.rate_limit_per_minute, 60);
        assert_ne!(generated.api_key.masked_key(), generated.secret);
        assert_ne!(generated.api_key.key_hash, generated.secret);

        let ctx = auth
            .authenticate(Some(&generated.secret), "/api/orders", &[])
            .await
            .unwrap();
        assert_eq!(ctx.api_key_id, generated.api_key.id);
        assert_eq!(ctx.key_type, ApiKeyType::Frontend);

        let stored = repo.find_api_key(generated.api_key.id).await.unwrap().unwrap();
        assert_eq!(stored.total_requests, 1);
        assert!(stored.last_used_at.is_some());
    }

    #[tokio::test]
    async fn missing_wrong_and_disabled_credentials() {
        let (auth, _) = authenticator();
        let generated = auth.generate(spec(ApiKeyType::Frontend)).await.unwrap();

        for missing in [None, Some(""), Some("   ")] {
            assert!(matches!(
                auth.authenticate(missing, "/api/orders", &[]).await,
                Err(AuthError::MissingCredential)
            ));
        }

        let mut tampered = generated.secret.clone();
        tampered.push('x');
        assert!(matches!(
            auth.authenticate(Some(&tampered), "/api/orders", &[]).await,
            Err(AuthError::InvalidCredential)
        ));

        auth.set_active(generated.api_key.id, false).await.unwrap();
        assert!(matches!(
            auth.authenticate(Some(&generated.secret), "/api/orders", &[]).await,
            Err(AuthError::InvalidCredential)
        ));

        auth.set_active(generated.api_key.id, true).await.unwrap();
        assert!(auth
            .authenticate(Some(&generated.secret), "/api/orders", &[])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn type_check_precedes_endpoint_check() {
        let (auth, _) = authenticator();
        let mut restricted = spec(ApiKeyType::Frontend);
        restricted.allowed_endpoints = Some(vec!["/api/orders*".to_string()]);
        let generated = auth.generate(restricted).await.unwrap();

        let err = auth
            .authenticate(Some(&generated.secret), "/api/admin/api-keys", &[ApiKeyType::Admin])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(ApiKeyType::Frontend)));

        let err = auth
            .authenticate(Some(&generated.secret), "/api/customers", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EndpointNotAllowed(p) if p == "/api/customers"));

        assert!(auth
            .authenticate(Some(&generated.secret), "/api/orders/42", &[ApiKeyType::Frontend])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn quota_resets_with_the_minute() {
        let (auth, repo) = authenticator();
        let mut limited = spec(ApiKeyType::Frontend);
        limited.rate_limit_per_minute = Some(3);
        let generated = auth.generate(limited).await.unwrap();
        let secret = Some(generated.secret.as_str());

        for _ in 0..3 {
            auth.authenticate_at(minute(5), secret, "/api/orders", &[])
                .await
                .unwrap();
        }
        let err = auth
            .authenticate_at(minute(5) + TimeDelta::seconds(59), secret, "/api/orders", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RateLimitExceeded { limit: 3 }));

        // Rejected requests are not counted as usage.
        let stored = repo.find_api_key(generated.api_key.id).await.unwrap().unwrap();
        assert_eq!(stored.total_requests, 3);

        assert!(auth
            .authenticate_at(minute(6), secret, "/api/orders", &[])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn internal_keys_are_never_limited() {
        let (auth, _) = authenticator();
        let mut internal = spec(ApiKeyType::Internal);
        internal.rate_limit_per_minute = Some(5);
        let generated = auth.generate(internal).await.unwrap();
        assert!(generated.secret.starts_with("ik_"));

        for _ in 0..1001 {
            auth.authenticate_at(minute(1), Some(&generated.secret), "/api/orders", &[])
                .await
                .unwrap();
        }

        let usage = auth.usage(&generated.api_key).await.unwrap();
        assert_eq!(usage.remaining_this_minute, None);
    }

    #[tokio::test]
    async fn keys_sharing_a_prefix_are_told_apart() {
        let (auth, repo) = authenticator();
        for secret in ["ak_SAMEPREFIX_one", "ak_SAMEPREFIX_two"] {
            repo.insert_api_key(&NewApiKey {
                name: secret.to_string(),
                key_hash: hash_secret(secret),
                key_prefix: key_prefix(secret),
                key_type: ApiKeyType::Frontend,
                rate_limit_per_minute: 60,
                allowed_endpoints: None,
                metadata: None,
            })
            .await
            .unwrap();
        }

        let ctx = auth
            .authenticate(Some("ak_SAMEPREFIX_two"), "/api/orders", &[])
            .await
            .unwrap();
        assert_eq!(ctx.name, "ak_SAMEPREFIX_two");
    }

    #[tokio::test]
    async fn usage_reports_remaining_quota() {
        let (auth, _) = authenticator();
        let mut limited = spec(ApiKeyType::Admin);
        limited.rate_limit_per_minute = Some(10);
        let generated = auth.generate(limited).await.unwrap();

        for _ in 0..4 {
            auth.authenticate(Some(&generated.secret), "/api/admin/api-keys", &[])
                .await
                .unwrap();
        }
        let usage = auth.usage(&generated.api_key).await.unwrap();
        // All four requests may straddle a minute boundary.
        assert!(usage.used_this_minute <= 4);
        assert_eq!(
            usage.remaining_this_minute,
            Some(10 - usage.used_this_minute)
        );
    }

    #[tokio::test]
    async fn generate_validates_input() {
        let (auth, _) = authenticator();
        let mut blank = spec(ApiKeyType::Frontend);
        blank.name = "  ".to_string();
        assert!(matches!(auth.generate(blank).await, Err(AuthError::Validation(_))));

        let mut zero = spec(ApiKeyType::Frontend);
        zero.rate_limit_per_minute = Some(0);
        assert!(matches!(auth.generate(zero).await, Err(AuthError::Validation(_))));

        assert!(matches!(
            auth.get(Uuid::new_v4()).await,
            Err(AuthError::NotFound(_))
        ));
    }
}
