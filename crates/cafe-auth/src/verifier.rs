//! Bearer token verification
//!
//! [`TokenVerifier`] turns a raw `Authorization` header value into a verified
//! [`ClaimSet`], or the [`AuthFailure`] explaining why it could not.
//!
//! The pipeline, in order:
//!
//! 1. Header present, exactly `Bearer <token>`
//! 2. Token is three dot-separated segments
//! 3. Header segment decodes to JSON with `alg` and `kid`
//! 4. `alg` is the configured asymmetric algorithm
//! 5. `kid` resolves through the [`KeyProviderCache`]
//! 6. Signature verifies under that key
//! 7. `exp` is in the future, `aud` contains the expected audience, `iss`
//!    matches the trusted issuer
//!
//! The algorithm is pinned before the key lookup, so `none` or HMAC tokens
//! never cause a JWKS fetch.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::claims::{ClaimSet, RawClaims};
use crate::config::AuthSettings;
use crate::error::{AuthConfigError, AuthFailure};
use crate::jwks::{KeyLookupError, KeyProviderCache};

/// The subset of the JOSE header the verifier cares about
#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
    kid: Option<String>,
}

/// Verifies bearer tokens issued by one trusted identity provider.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: KeyProviderCache,
    algorithm: Algorithm,
    issuer: String,
    audience: String,
    leeway: Duration,
    /// Signature-only validation; claims are checked by hand afterwards
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier over an existing key cache.
    pub fn new(keys: KeyProviderCache, settings: &AuthSettings) -> Self {
        let mut validation = Validation::new(settings.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            keys,
            algorithm: settings.algorithm,
            issuer: settings.issuer(),
            audience: settings.audience.clone(),
            leeway: settings.leeway,
            validation,
        }
    }

    /// Validate the settings and build a verifier with its own key cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are incomplete or the key cache
    /// cannot be created.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, AuthConfigError> {
        settings.validate()?;
        let keys = KeyProviderCache::from_settings(settings)?;
        Ok(Self::new(keys, settings))
    }

    /// The key cache this verifier resolves signing keys through
    pub fn key_provider(&self) -> &KeyProviderCache {
        &self.keys
    }

    /// Verify the value of an `Authorization` header.
    ///
    /// `None` means the header was absent.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthFailure`] for the first check that fails.
    pub async fn verify(&self, authorization: Option<&str>) -> Result<ClaimSet, AuthFailure> {
        let token = bearer_token(authorization)?;
        self.verify_token(token).await
    }

    /// Verify a bare token (without the `Bearer ` prefix).
    ///
    /// # Errors
    ///
    /// Returns the [`AuthFailure`] for the first check that fails.
    pub async fn verify_token(&self, token: &str) -> Result<ClaimSet, AuthFailure> {
        self.verify_token_at(token, unix_now()).await
    }

    async fn verify_token_at(&self, token: &str, now: u64) -> Result<ClaimSet, AuthFailure> {
        let header = decode_header(token)?;

        if Algorithm::from_str(&header.alg).ok() != Some(self.algorithm) {
            return Err(AuthFailure::UnsupportedAlgorithm(header.alg));
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthFailure::MalformedToken("token header has no kid".to_string()))?;

        let key = self.keys.get_key(&kid).await.map_err(|e| match e {
            KeyLookupError::NotFound { kid } => AuthFailure::UnknownSigningKey { kid },
            KeyLookupError::Unavailable(reason) => AuthFailure::KeyProviderUnavailable(reason),
        })?;

        let raw = jsonwebtoken::decode::<RawClaims>(token, &key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AuthFailure::InvalidSignature,
                ErrorKind::InvalidAlgorithm => {
                    AuthFailure::UnsupportedAlgorithm(format!("{:?}", self.algorithm))
                }
                _ => AuthFailure::MalformedToken(e.to_string()),
            })?
            .claims;

        let claims = self.validate_claims(raw, now)?;
        debug!(subject = %claims.subject, kid = %kid, "Token verified");
        Ok(claims)
    }

    /// Check expiry, then audience, then issuer.
    fn validate_claims(&self, raw: RawClaims, now: u64) -> Result<ClaimSet, AuthFailure> {
        let exp = raw.exp.ok_or(AuthFailure::TokenExpired)?;
        if exp.saturating_add(self.leeway.as_secs()) <= now {
            return Err(AuthFailure::TokenExpired);
        }

        let audience = raw.aud.ok_or(AuthFailure::InvalidAudience)?;
        if !audience.contains(&self.audience) {
            return Err(AuthFailure::InvalidAudience);
        }

        let issuer = raw.iss.ok_or(AuthFailure::InvalidIssuer)?;
        if issuer != self.issuer {
            return Err(AuthFailure::InvalidIssuer);
        }

        let subject = raw
            .sub
            .ok_or_else(|| AuthFailure::MalformedToken("token has no sub claim".to_string()))?;

        Ok(ClaimSet::new(
            subject,
            issuer,
            audience.into_vec(),
            exp,
            raw.permissions,
        ))
    }
}

/// Pull the token out of a `Bearer <token>` header value.
///
/// # Errors
///
/// [`AuthFailure::MissingAuthHeader`] for `None`, otherwise
/// [`AuthFailure::InvalidHeaderFormat`] unless the value is exactly two
/// space-separated parts with the literal `Bearer` first.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str, AuthFailure> {
    let value = authorization.ok_or(AuthFailure::MissingAuthHeader)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AuthFailure::InvalidHeaderFormat),
    }
}

fn decode_header(token: &str) -> Result<TokenHeader, AuthFailure> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthFailure::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(segments[0].trim_end_matches('='))
        .map_err(|e| AuthFailure::MalformedToken(format!("header is not base64url: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthFailure::MalformedToken(format!("header is not a JOSE object: {e}")))
}

fn unix_now() -> u64 {
    unix_seconds(SystemTime::now())
}

/// Seconds since the epoch. A clock set before the epoch reads as the end of
/// time so every token counts as expired.
fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).map_or(u64::MAX, |d| d.as_secs())
}
