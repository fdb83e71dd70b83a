//! Auth settings
//!
//! [`AuthSettings`] is the validated form of the identity-provider
//! configuration (`AUTH_DOMAIN`, `API_AUDIENCE`, `ALGORITHM`) plus the
//! JWKS cache knobs.

use jsonwebtoken::Algorithm;
use std::str::FromStr;
use std::time::Duration;
use url::{Host, Url};

use crate::error::AuthConfigError;

/// Conventional location of the identity provider's key set.
pub const JWKS_PATH: &str = ".well-known/jwks.json";

/// Default key set time-to-live (10 minutes).
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(600);

/// Default bound on a single JWKS fetch.
pub const DEFAULT_JWKS_TIMEOUT: Duration = Duration::from_secs(5);

/// Default minimum spacing between miss-triggered refreshes.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Identity provider trust settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Identity provider domain, e.g. `dev-shop.us.auth0.com`.
    pub domain: String,
    /// Expected `aud` claim.
    pub audience: String,
    /// The one asymmetric algorithm tokens must be signed with.
    pub algorithm: Algorithm,
    /// Expected `iss`; derived from `domain` when `None`.
    pub issuer: Option<String>,
    /// JWKS endpoint; derived from `domain` when `None`.
    pub jwks_url: Option<String>,
    /// How long a fetched key set is trusted before it is refreshed.
    pub jwks_ttl: Duration,
    /// Timeout for one JWKS fetch.
    pub jwks_timeout: Duration,
    /// Miss-triggered refreshes closer together than this are skipped.
    pub min_refresh_interval: Duration,
    /// Clock skew tolerated on `exp`.
    pub leeway: Duration,
}

impl AuthSettings {
    /// Create settings with default cache behavior.
    ///
    /// # Errors
    ///
    /// Returns an error if `algorithm` is unknown or symmetric.
    pub fn new(
        domain: impl Into<String>,
        audience: impl Into<String>,
        algorithm: &str,
    ) -> Result<Self, AuthConfigError> {
        Ok(Self {
            domain: domain.into(),
            audience: audience.into(),
            algorithm: parse_algorithm(algorithm)?,
            issuer: None,
            jwks_url: None,
            jwks_ttl: DEFAULT_JWKS_TTL,
            jwks_timeout: DEFAULT_JWKS_TIMEOUT,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            leeway: Duration::ZERO,
        })
    }

    /// Override the expected issuer
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Override the JWKS endpoint
    #[must_use]
    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = Some(url.into());
        self
    }

    /// Set the key set TTL
    #[must_use]
    pub fn with_jwks_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_ttl = ttl;
        self
    }

    /// Set the JWKS fetch timeout
    #[must_use]
    pub fn with_jwks_timeout(mut self, timeout: Duration) -> Self {
        self.jwks_timeout = timeout;
        self
    }

    /// Set the minimum interval between miss-triggered refreshes
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Set the clock skew leeway applied to `exp`
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Expected issuer: the override, or `https://{domain}/`.
    pub fn issuer(&self) -> String {
        match &self.issuer {
            Some(issuer) => issuer.clone(),
            None => format!("{}/", self.domain_base()),
        }
    }

    /// JWKS endpoint: the override, or `https://{domain}/.well-known/jwks.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or is plain HTTP on a
    /// non-loopback host.
    pub fn jwks_url(&self) -> Result<Url, AuthConfigError> {
        let raw = match &self.jwks_url {
            Some(url) => url.clone(),
            None => format!("{}/{}", self.domain_base(), JWKS_PATH),
        };
        let url = Url::parse(&raw).map_err(|source| AuthConfigError::InvalidJwksUrl {
            url: raw.clone(),
            source,
        })?;

        if url.scheme() != "https" && !is_loopback(&url) {
            return Err(AuthConfigError::InsecureJwksUrl(raw));
        }
        Ok(url)
    }

    /// Check required settings are present.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first empty setting, or a bad JWKS URL.
    pub fn validate(&self) -> Result<(), AuthConfigError> {
        if self.domain.trim().is_empty() && (self.issuer.is_none() || self.jwks_url.is_none()) {
            return Err(AuthConfigError::MissingSetting("AUTH_DOMAIN"));
        }
        if self.audience.trim().is_empty() {
            return Err(AuthConfigError::MissingSetting("API_AUDIENCE"));
        }
        self.jwks_url().map(|_| ())
    }

    /// `https://{domain}` with any scheme or trailing slash in `domain` tolerated.
    fn domain_base(&self) -> String {
        let domain = self.domain.trim().trim_end_matches('/');
        if domain.starts_with("https://") || domain.starts_with("http://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        }
    }
}

/// Parse an `ALGORITHM` value, rejecting symmetric algorithms.
///
/// # Errors
///
/// Returns an error if the name is unknown or names an HMAC algorithm.
pub fn parse_algorithm(name: &str) -> Result<Algorithm, AuthConfigError> {
    let algorithm = Algorithm::from_str(name.trim())
        .map_err(|_| AuthConfigError::UnknownAlgorithm(name.to_string()))?;

    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Err(AuthConfigError::SymmetricAlgorithm(name.to_string()))
        }
        _ => Ok(algorithm),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost",
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
