//! Authentication extractors.
//!
//! - `AuthUser` - any player, identified by the JWT `sub` claim
//! - `AdminUser` - a player whose token carries `role = "admin"`
//!
//! Tokens are RS256 JWTs validated against the identity provider's JWKS.
//! When `auth_test_tokens` is enabled, `test-token:<uuid>` and
//! `test-token:<uuid>:admin` are accepted as well.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use gamevault_core::UserId;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ApiError;
use crate::state::AppState;

/// How long to cache JWKS keys before refreshing.
const JWKS_CACHE_DURATION: Duration = Duration::from_secs(3600);

/// Timeout for JWKS fetch requests.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Role claim value granting admin access.
const ADMIN_ROLE: &str = "admin";

/// Caller role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Regular player.
    Player,
    /// Operator with access to `/v1/admin`.
    Admin,
}

impl Role {
    fn from_claim(role: Option<&str>) -> Self {
        match role {
            Some(ADMIN_ROLE) => Self::Admin,
            _ => Self::Player,
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
    /// Role from the token.
    pub role: Role,
}

impl AuthUser {
    /// Whether the caller may use admin endpoints.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// An authenticated admin.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

/// Read the bearer token from the `authorization` header.
fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)
}

/// Resolve a bearer token into a caller.
pub async fn authenticate(token: &str, state: &AppState) -> Result<AuthUser, ApiError> {
    if state.config.auth_test_tokens {
        if let Some(rest) = token.strip_prefix("test-token:") {
            return parse_test_token(rest);
        }
    }

    let claims = validate_jwt(token, state).await?;
    let user_id = claims
        .sub
        .parse::<UserId>()
        .map_err(|_| ApiError::Unauthorized)?;

    Ok(AuthUser {
        user_id,
        role: Role::from_claim(claims.role.as_deref()),
    })
}

fn parse_test_token(rest: &str) -> Result<AuthUser, ApiError> {
    let (user_id, role) = match rest.split_once(':') {
        Some((user_id, role)) => (user_id, Some(role)),
        None => (rest, None),
    };
    let user_id = user_id
        .parse::<UserId>()
        .map_err(|_| ApiError::Unauthorized)?;
    Ok(AuthUser {
        user_id,
        role: Role::from_claim(role),
    })
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let token = bearer_token(parts)?;
            authenticate(token, state).await
        })
    }
}

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let token = bearer_token(parts)?;
            let user = authenticate(token, state).await?;
            if !user.is_admin() {
                tracing::warn!(user_id = %user.user_id, "Admin endpoint refused");
                return Err(ApiError::Forbidden);
            }
            tracing::info!(admin_id = %user.user_id, "Admin authenticated");
            Ok(AdminUser(user))
        })
    }
}

/// JWT claims issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Role; `"admin"` unlocks admin endpoints.
    #[serde(default)]
    pub role: Option<String>,
    /// Audience (can be string or array).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Issuer.
    pub iss: String,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    #[serde(default)]
    pub iat: i64,
}

/// JWKS (JSON Web Key Set) response structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    /// List of JWK keys.
    pub keys: Vec<Jwk>,
}

/// Single JSON Web Key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA").
    pub kty: String,
    /// Key ID.
    pub kid: Option<String>,
    /// RSA public key modulus (base64url encoded).
    pub n: Option<String>,
    /// RSA public key exponent (base64url encoded).
    pub e: Option<String>,
}

struct JwksKeys {
    keys: HashMap<String, DecodingKey>,
    default_key: Option<DecodingKey>,
    last_updated: Option<Instant>,
}

/// Cached signing keys of the identity provider.
pub struct JwksCache {
    client: reqwest::Client,
    inner: RwLock<JwksKeys>,
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache").finish_non_exhaustive()
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksCache {
    /// Empty cache; keys are fetched on first use.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            inner: RwLock::new(JwksKeys {
                keys: HashMap::new(),
                default_key: None,
                last_updated: None,
            }),
        }
    }
}

impl JwksKeys {
    fn is_expired(&self) -> bool {
        self.last_updated
            .map_or(true, |at| at.elapsed() >= JWKS_CACHE_DURATION)
    }

    fn lookup(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self.keys.get(kid).cloned(),
            None => self.default_key.clone(),
        }
    }
}

/// Validate a JWT token against the JWKS.
async fn validate_jwt(token: &str, state: &AppState) -> Result<JwtClaims, ApiError> {
    let header = decode_header(token).map_err(|e| {
        tracing::debug!(error = %e, "Failed to decode JWT header");
        ApiError::Unauthorized
    })?;

    let decoding_key = get_decoding_key(header.kid.as_deref(), state).await?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[&state.config.auth_audience]);
    validation.set_issuer(&[&state.config.auth_base_url]);

    let token_data = decode::<JwtClaims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })?;

    Ok(token_data.claims)
}

/// Get a decoding key from cache or fetch from JWKS endpoint.
async fn get_decoding_key(kid: Option<&str>, state: &AppState) -> Result<DecodingKey, ApiError> {
    let cache = &state.jwks;
    {
        let keys = cache.inner.read().await;
        if !keys.is_expired() {
            if let Some(key) = keys.lookup(kid) {
                return Ok(key);
            }
        }
    }

    let jwks = fetch_jwks(&cache.client, &state.config.auth_base_url).await?;

    let mut keys = cache.inner.write().await;
    keys.keys.clear();
    keys.default_key = None;
    keys.last_updated = Some(Instant::now());

    for jwk in &jwks.keys {
        if let Some(decoding_key) = jwk_to_decoding_key(jwk) {
            if let Some(ref key_kid) = jwk.kid {
                keys.keys.insert(key_kid.clone(), decoding_key.clone());
            }
            if keys.default_key.is_none() {
                keys.default_key = Some(decoding_key);
            }
        }
    }

    keys.lookup(kid).ok_or(ApiError::Unauthorized)
}

/// Fetch JWKS from the identity provider.
async fn fetch_jwks(client: &reqwest::Client, base_url: &str) -> Result<Jwks, ApiError> {
    let jwks_url = format!("{base_url}/.well-known/jwks.json");

    tracing::debug!(url = %jwks_url, "Fetching JWKS");

    let response = client.get(&jwks_url).send().await.map_err(|e| {
        tracing::error!(error = %e, url = %jwks_url, "Failed to fetch JWKS");
        ApiError::ExternalService("Failed to fetch authentication keys".into())
    })?;

    if !response.status().is_success() {
        tracing::error!(
            status = %response.status(),
            url = %jwks_url,
            "JWKS fetch returned non-success status"
        );
        return Err(ApiError::ExternalService(
            "Failed to fetch authentication keys".into(),
        ));
    }

    let jwks: Jwks = response.json().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to parse JWKS response");
        ApiError::ExternalService("Failed to parse authentication keys".into())
    })?;

    tracing::info!(keys_count = %jwks.keys.len(), "JWKS fetched successfully");

    Ok(jwks)
}

/// Convert a JWK to a `DecodingKey`.
fn jwk_to_decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    if jwk.kty != "RSA" {
        tracing::debug!(kty = %jwk.kty, "Skipping non-RSA JWK");
        return None;
    }

    let n = jwk.n.as_ref()?;
    let e = jwk.e.as_ref()?;

    DecodingKey::from_rsa_components(n, e).ok()
}
