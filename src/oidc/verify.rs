//! Identity token verification: JWT signature validation with cached JWKS.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Resolve the issuer's `jwks_uri` through discovery (cached per issuer).
//! 3. Fetch the issuer's JWKS (cached for 1 hour; refreshed on unknown `kid`).
//! 4. Verify the signature and `exp` with 60 seconds of clock leeway.
//! 5. Check `iss` against the expected issuer and `aud` against the client id.
//! 6. Return a [`VerifiedIdentity`] with the extracted claims.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, TokenData, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::discovery::{ProviderMetadata, same_issuer};

/// Error variants for identity token verification failures.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// JWT decode / signature / expiry verification failed.
    #[error("JWT verification failed: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    /// The JWT header contains no `kid` field.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` in the JWT header is not in the issuer's JWKS.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// Network or HTTP error while fetching JWKS.
    #[error("JWKS fetch error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Provider metadata could not be discovered.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// The token's `iss` claim did not match the expected issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Expected issuer URL.
        expected: String,
        /// Actual issuer URL found in the token.
        actual: String,
    },
}

/// Verified identity extracted from a valid identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    /// `sub` claim (opaque user ID).
    pub subject: String,
    /// Email address, empty when the token carries none.
    pub email: String,
    /// Display name (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Issuer URL.
    pub issuer: String,
    /// Token expiry (Unix timestamp).
    pub expires_at: u64,
}

/// Claims read from an identity token.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    iss: String,
    sub: String,
    /// Audience (may be a single string or an array)
    #[serde(default)]
    aud: serde_json::Value,
    exp: u64,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Verifies identity tokens for a given issuer and audience.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `token` as issued by `issuer` for `audience`.
    async fn verify(
        &self,
        token: &str,
        issuer: &str,
        audience: &str,
    ) -> Result<VerifiedIdentity, OidcError>;
}

/// Cached JWKS entry.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS cache, one entry per issuer.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    /// Default time a fetched JWKS is trusted.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    /// Create with the default 1-hour TTL.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_ttl(http, Self::DEFAULT_TTL)
    }

    /// Create with a custom TTL.
    #[must_use]
    pub fn with_ttl(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            http,
            ttl,
        }
    }

    /// Return the cached JWKS for `issuer`, or fetch from `jwks_uri` if stale.
    ///
    /// If `force_refresh` is `true`, the cache is bypassed regardless of TTL.
    pub async fn get_or_fetch(
        &self,
        issuer: &str,
        jwks_uri: &str,
        force_refresh: bool,
    ) -> Result<JwkSet, OidcError> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(issuer) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(issuer = %issuer, "Fetching JWKS from {jwks_uri}");
        let jwks: JwkSet = self
            .http
            .get(jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.inner.insert(
            issuer.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(jwks)
    }
}

/// JWKS-backed [`IdentityVerifier`].
pub struct OidcVerifier {
    http: reqwest::Client,
    jwks_cache: JwksCache,
    metadata: DashMap<String, ProviderMetadata>,
}

impl OidcVerifier {
    /// Create a verifier using `http` for discovery and JWKS fetches.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            jwks_cache: JwksCache::new(http.clone()),
            http,
            metadata: DashMap::new(),
        }
    }

    async fn jwks_uri(&self, issuer: &str) -> Result<String, OidcError> {
        if let Some(meta) = self.metadata.get(issuer) {
            return Ok(meta.jwks_uri.clone());
        }
        let meta = ProviderMetadata::discover(&self.http, issuer)
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;
        let uri = meta.jwks_uri.clone();
        self.metadata.insert(issuer.to_string(), meta);
        Ok(uri)
    }

    /// Find a decoding key by `kid`, refreshing the JWKS cache if not found.
    async fn find_decoding_key(
        &self,
        kid: &str,
        issuer: &str,
        jwks_uri: &str,
    ) -> Result<DecodingKey, OidcError> {
        let jwks = self.jwks_cache.get_or_fetch(issuer, jwks_uri, false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        // Unknown kid: refresh once and retry
        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.jwks_cache.get_or_fetch(issuer, jwks_uri, true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| OidcError::UnknownKeyId(kid.to_string()))
    }
}

#[async_trait]
impl IdentityVerifier for OidcVerifier {
    async fn verify(
        &self,
        token: &str,
        issuer: &str,
        audience: &str,
    ) -> Result<VerifiedIdentity, OidcError> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header.kid.clone().ok_or(OidcError::MissingKeyId)?;

        if !issuer.starts_with("https://") {
            warn!(issuer = %issuer, "OIDC issuer is not HTTPS");
        }

        let jwks_uri = self.jwks_uri(issuer).await?;
        let decoding_key = self.find_decoding_key(&kid, issuer, &jwks_uri).await?;

        let mut validation = build_validation(&header);
        // Audience is checked below to support both string and array forms.
        validation.validate_aud = false;

        let token_data: TokenData<IdTokenClaims> =
            jsonwebtoken::decode(token, &decoding_key, &validation)?;
        let claims = token_data.claims;

        if !same_issuer(&claims.iss, issuer) {
            return Err(OidcError::IssuerMismatch {
                expected: issuer.to_string(),
                actual: claims.iss,
            });
        }

        check_audience(&claims.aud, audience)?;

        Ok(VerifiedIdentity {
            subject: claims.sub,
            email: claims.email.unwrap_or_default(),
            name: claims.name,
            issuer: claims.iss,
            expires_at: claims.exp,
        })
    }
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|k| k.common.key_id.as_deref() == Some(kid))?;

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}

/// Build a [`Validation`] from the JWT header algorithm.
fn build_validation(header: &Header) -> Validation {
    let alg = match header.alg {
        Algorithm::RS256 => Algorithm::RS256,
        Algorithm::RS384 => Algorithm::RS384,
        Algorithm::RS512 => Algorithm::RS512,
        Algorithm::ES256 => Algorithm::ES256,
        Algorithm::ES384 => Algorithm::ES384,
        other => {
            warn!(alg = ?other, "Unsupported JWT algorithm, defaulting to RS256");
            Algorithm::RS256
        }
    };

    let mut v = Validation::new(alg);
    v.leeway = 60;
    v
}

/// Validate that the token's `aud` claim contains `expected`.
fn check_audience(aud_claim: &serde_json::Value, expected: &str) -> Result<(), OidcError> {
    let matches = match aud_claim {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Array(arr) => arr.iter().any(|v| v.as_str() == Some(expected)),
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(OidcError::JwtError(jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::InvalidAudience,
        )))
    }
}
