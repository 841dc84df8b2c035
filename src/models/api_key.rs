//! API Key model for authentication.
//!
//! API keys authenticate frontends, administrators and sibling services.
//! Only a SHA-256 hash of each key is stored, next to a short visible prefix
//! used to narrow the lookup before the hash is checked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Number of leading characters of a raw key stored in clear for lookup.
pub const KEY_PREFIX_LEN: usize = 8;

/// Category of an API key. Routes may restrict which categories they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyType {
    Frontend,
    Internal,
    Admin,
}

impl ApiKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyType::Frontend => "frontend",
            ApiKeyType::Internal => "internal",
            ApiKeyType::Admin => "admin",
        }
    }

    /// Leading marker of raw keys of this type, so a leaked key is
    /// recognizable at a glance.
    pub fn secret_prefix(&self) -> &'static str {
        match self {
            ApiKeyType::Frontend => "ak_",
            ApiKeyType::Internal => "ik_",
            ApiKeyType::Admin => "admin_",
        }
    }

    /// Internal keys are exempt from per-minute quotas.
    pub fn is_rate_limited(&self) -> bool {
        !matches!(self, ApiKeyType::Internal)
    }
}

impl fmt::Display for ApiKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown API key type '{0}', expected frontend, internal or admin")]
pub struct UnknownKeyType(pub String);

impl FromStr for ApiKeyType {
    type Err = UnknownKeyType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frontend" => Ok(ApiKeyType::Frontend),
            "internal" => Ok(ApiKeyType::Internal),
            "admin" => Ok(ApiKeyType::Admin),
            other => Err(UnknownKeyType(other.to_string())),
        }
    }
}

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table. `key_hash` is never serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKey {
    pub id: Uuid,
    pub name: String,

    /// SHA-256 hash of the raw key (64 hex characters)
    pub key_hash: String,

    /// First `KEY_PREFIX_LEN` characters of the raw key
    pub key_prefix: String,

    pub key_type: ApiKeyType,
    pub rate_limit_per_minute: i32,

    /// Glob patterns of reachable paths. `None` or empty means unrestricted.
    pub allowed_endpoints: Option<Vec<String>>,

    pub metadata: Option<serde_json::Value>,

    /// Inactive keys are rejected during authentication. This revokes access
    /// without deleting the record.
    pub is_active: bool,

    pub last_used_at: Option<DateTime<Utc>>,
    pub total_requests: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    /// Display-safe rendering of the key: the prefix, a mask, then the
    /// prefix's last four characters again (`ak_3f9c1****9c1d` style).
    pub fn masked_key(&self) -> String {
        let tail_start = self
            .key_prefix
            .char_indices()
            .rev()
            .nth(3)
            .map_or(0, |(i, _)| i);
        format!("{}****{}", self.key_prefix, &self.key_prefix[tail_start..])
    }

    /// Whether this key may call `path`.
    pub fn allows_endpoint(&self, path: &str) -> bool {
        match self.allowed_endpoints.as_deref() {
            None | Some([]) => true,
            Some(patterns) => patterns.iter().any(|p| glob_match(p, path)),
        }
    }
}

/// Values written when a key is created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewApiKey {
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub key_type: ApiKeyType,
    pub rate_limit_per_minute: i32,
    pub allowed_endpoints: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

/// Request body for `POST /api/admin/api-keys`.
///
/// # JSON Example
///
/// ```json
/// {
///   "name": "storefront",
///   "key_type": "frontend",
///   "rate_limit_per_minute": 60,
///   "allowed_endpoints": ["/api/orders*", "/api/customers/*"],
///   "metadata": { "client": "web" }
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default = "default_key_type")]
    pub key_type: String,
    pub rate_limit_per_minute: Option<i32>,
    pub allowed_endpoints: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

fn default_key_type() -> String {
    ApiKeyType::Frontend.as_str().to_string()
}

/// Response body for API key endpoints. Never contains the hash.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub name: String,
    pub key_type: ApiKeyType,
    pub masked_key: String,
    pub rate_limit_per_minute: i32,
    pub allowed_endpoints: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub total_requests: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            masked_key: key.masked_key(),
            id: key.id,
            name: key.name,
            key_type: key.key_type,
            rate_limit_per_minute: key.rate_limit_per_minute,
            allowed_endpoints: key.allowed_endpoints,
            metadata: key.metadata,
            is_active: key.is_active,
            last_used_at: key.last_used_at,
            total_requests: key.total_requests,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}

/// Response of key creation: the only time the raw key leaves the service.
#[derive(Debug, Serialize)]
pub struct CreatedApiKeyResponse {
    #[serde(flatten)]
    pub api_key: ApiKeyResponse,
    pub key: String,
}

/// Current-minute quota usage of a key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyUsage {
    pub used_this_minute: u64,
    /// `None` for keys exempt from quotas
    pub remaining_this_minute: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ApiKeyDetailsResponse {
    #[serde(flatten)]
    pub api_key: ApiKeyResponse,
    pub usage: KeyUsage,
}

/// Shell-style wildcard match (`fnmatch` without flags).
///
/// `*` matches any run of characters including `/`, `?` matches exactly one
/// character, `[...]` matches one character from a set or range, `[!...]`
/// negates it. An unterminated `[` is a literal. A backslash makes the next
/// character literal, inside or outside brackets.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    // Last `*` seen and the text position it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(&pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    } else if text[t] == '[' {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                '\\' => {
                    // A trailing backslash stands for itself
                    let literal = pattern.get(p + 1).copied().unwrap_or('\\');
                    if literal == text[t] {
                        p = (p + 2).min(pattern.len());
                        t += 1;
                        continue;
                    }
                }
                c if c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }

        match backtrack {
            Some((star, absorbed)) => {
                p = star + 1;
                t = absorbed + 1;
                backtrack = Some((star, absorbed + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Match `c` against the bracket class starting at `pattern[start]`.
///
/// Returns whether it matched and the index just past the class, or `None`
/// when the class is not terminated.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negated = matches!(pattern.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    loop {
        let current = *pattern.get(i)?;
        if current == ']' && !first {
            return Some((matched != negated, i + 1));
        }
        first = false;

        if current == '\\' {
            if let Some(&escaped) = pattern.get(i + 1) {
                if escaped == c {
                    matched = true;
                }
                i += 2;
                continue;
            }
        }

        if pattern.get(i + 1) == Some(&'-') && pattern.get(i + 2).is_some_and(|&e| e != ']') {
            let end = pattern[i + 2];
            if current <= c && c <= end {
                matched = true;
            }
            i += 3;
        } else {
            if current == c {
                matched = true;
            }
            i += 1;
        }
    }
}
