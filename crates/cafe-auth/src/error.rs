//! Authorization failure taxonomy
//!
//! Every way a request can be turned away by the auth layer maps to exactly one
//! [`AuthFailure`] variant. Each variant carries a stable snake_case code and an
//! HTTP status, and renders itself as the uniform auth error body:
//!
//! ```json
//! { "success": false, "error_code": 401, "error_message": "token_expired" }
//! ```

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::{HeaderValue, StatusCode, header};
use serde_json::json;
use thiserror::Error;

/// Request-time authorization failures.
///
/// Everything maps to `401 Unauthorized` except the permission failures
/// (`403 Forbidden`) and [`AuthFailure::KeyProviderUnavailable`], which is an
/// infrastructure fault rather than a credential problem (`500`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// No `Authorization` header on the request.
    #[error("Authorization header is expected")]
    MissingAuthHeader,

    /// Header is not exactly `Bearer <token>`.
    #[error("Authorization header must be of the form `Bearer <token>`")]
    InvalidHeaderFormat,

    /// Token structure or header segment could not be decoded.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The token's `kid` is not in the identity provider's key set.
    #[error("No signing key found for kid `{kid}`")]
    UnknownSigningKey {
        /// Key ID taken from the token header.
        kid: String,
    },

    /// The token declares an algorithm other than the configured one.
    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signature does not verify against the resolved key.
    #[error("Invalid token signature")]
    InvalidSignature,

    /// `exp` is missing or not strictly in the future.
    #[error("Token expired")]
    TokenExpired,

    /// `aud` does not contain the expected audience.
    #[error("Incorrect audience")]
    InvalidAudience,

    /// `iss` does not match the trusted issuer.
    #[error("Incorrect issuer")]
    InvalidIssuer,

    /// The claim set does not carry the permission the route requires.
    #[error("Permission `{0}` not granted")]
    PermissionDenied(String),

    /// The token has no `permissions` claim at all.
    #[error("Permissions not included in token")]
    PermissionsNotConfigured,

    /// Signing keys could not be fetched from the identity provider.
    #[error("Signing keys unavailable: {0}")]
    KeyProviderUnavailable(String),
}

impl AuthFailure {
    /// HTTP status this failure is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PermissionDenied(_) | Self::PermissionsNotConfigured => StatusCode::FORBIDDEN,
            Self::KeyProviderUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Stable machine-readable code, used as `error_message` in responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingAuthHeader => "missing_auth_header",
            Self::InvalidHeaderFormat => "invalid_header_format",
            Self::MalformedToken(_) => "malformed_token",
            Self::UnknownSigningKey { .. } => "unknown_signing_key",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::InvalidSignature => "invalid_signature",
            Self::TokenExpired => "token_expired",
            Self::InvalidAudience => "invalid_audience",
            Self::InvalidIssuer => "invalid_issuer",
            Self::PermissionDenied(_) => "permission_denied",
            Self::PermissionsNotConfigured => "permissions_not_configured",
            Self::KeyProviderUnavailable(_) => "key_provider_unavailable",
        }
    }

    /// RFC 6750 error attribute for the `WWW-Authenticate` challenge.
    fn bearer_error(&self) -> &'static str {
        match self {
            Self::MissingAuthHeader => "invalid_request",
            Self::InvalidHeaderFormat => "invalid_request",
            Self::PermissionDenied(_) | Self::PermissionsNotConfigured => "insufficient_scope",
            _ => "invalid_token",
        }
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "error_code": status.as_u16(),
            "error_message": self.code(),
        }));

        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            let challenge = format!("Bearer error=\"{}\"", self.bearer_error());
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

/// Errors raised while building the auth components from configuration.
#[derive(Debug, Error)]
pub enum AuthConfigError {
    /// `ALGORITHM` is not a known JWS algorithm name.
    #[error("Unknown signing algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Symmetric algorithms cannot be verified with published public keys.
    #[error("Signing algorithm {0} is symmetric; only asymmetric algorithms are accepted")]
    SymmetricAlgorithm(String),

    /// The JWKS URL does not parse.
    #[error("Invalid JWKS URL `{url}`: {source}")]
    InvalidJwksUrl {
        /// Offending URL text.
        url: String,
        /// Parse error.
        #[source]
        source: url::ParseError,
    },

    /// The JWKS URL is plain HTTP on a non-loopback host.
    #[error("JWKS endpoint must use HTTPS (HTTP only allowed for loopback hosts): {0}")]
    InsecureJwksUrl(String),

    /// A required setting is empty.
    #[error("Missing auth setting: {0}")]
    MissingSetting(&'static str),

    /// The HTTP client for JWKS fetching could not be built.
    #[error("Failed to build JWKS HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
