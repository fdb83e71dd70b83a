//! Permission-gated request middleware
//!
//! [`Authorizer`] wraps any handler with a required permission:
//!
//! ```rust,ignore
//! use axum::{Router, routing::post};
//! use cafe_auth::Authorizer;
//!
//! let authorizer = Authorizer::new(verifier);
//!
//! let app = Router::new().route(
//!     "/drinks",
//!     post(create_drink).route_layer(authorizer.require("post:drinks")),
//! );
//! ```
//!
//! Each request is verified and checked independently. On success the
//! verified [`ClaimSet`](crate::ClaimSet) is inserted into the request
//! extensions (extract it with `Extension<ClaimSet>`) and the inner service
//! runs. On failure the inner service is never called and the
//! [`AuthFailure`](crate::AuthFailure) is rendered as the response.

mod layer;
mod service;

pub use layer::RequirePermissionLayer;
pub use service::{RequirePermissionFuture, RequirePermissionService};

use http::HeaderMap;
use http::header::AUTHORIZATION;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::claims::ClaimSet;
use crate::enforcer;
use crate::error::AuthFailure;
use crate::verifier::TokenVerifier;

/// Shared entry point for guarding routes.
///
/// Cheap to clone; every layer it produces shares one verifier and key cache.
#[derive(Debug, Clone)]
pub struct Authorizer {
    verifier: Arc<TokenVerifier>,
}

impl Authorizer {
    /// Create an authorizer around a verifier
    pub fn new(verifier: TokenVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }

    /// Layer requiring `permission` on every request it guards.
    pub fn require(&self, permission: impl Into<String>) -> RequirePermissionLayer {
        RequirePermissionLayer::new(Arc::clone(&self.verifier), permission.into())
    }

    /// Verify the request's `Authorization` header, then check `permission`.
    ///
    /// # Errors
    ///
    /// Returns the first [`AuthFailure`] from verification or enforcement.
    pub async fn authorize_request(
        &self,
        headers: &HeaderMap,
        permission: &str,
    ) -> Result<ClaimSet, AuthFailure> {
        authorize_headers(&self.verifier, headers, permission).await
    }
}

pub(crate) async fn authorize_headers(
    verifier: &TokenVerifier,
    headers: &HeaderMap,
    permission: &str,
) -> Result<ClaimSet, AuthFailure> {
    let authorization = match headers.get(AUTHORIZATION) {
        Some(value) => Some(value.to_str().map_err(|_| AuthFailure::InvalidHeaderFormat)?),
        None => None,
    };

    let outcome = match verifier.verify(authorization).await {
        Ok(claims) => enforcer::authorize(claims, permission),
        Err(failure) => Err(failure),
    };

    match &outcome {
        Ok(claims) => debug!(subject = %claims.subject, permission, "Request authorized"),
        Err(failure @ AuthFailure::KeyProviderUnavailable(_)) => {
            error!(
                permission,
                error = %failure,
                "Cannot authorize request: signing keys unavailable"
            );
        }
        Err(failure) => warn!(permission, code = failure.code(), "Request rejected"),
    }
    outcome
}
