//! # Cafe Auth - Bearer Token Authorization
//!
//! Verification of identity-provider-issued bearer tokens and per-route
//! permission enforcement for the drinks API.
//!
//! ## Architecture
//!
//! - [`jwks`] - [`KeyProviderCache`]: the identity provider's signing keys,
//!   fetched from its JWKS endpoint and swapped in atomically
//! - [`verifier`] - [`TokenVerifier`]: header parsing, signature and claim
//!   validation, producing a [`ClaimSet`]
//! - [`enforcer`] - [`authorize`]: checks a [`ClaimSet`] grants a permission
//! - [`middleware`] - [`Authorizer`]: tower layers that gate handlers on a
//!   permission and render [`AuthFailure`] responses
//! - [`config`] - [`AuthSettings`]: issuer, audience, algorithm and cache knobs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{Extension, Router, routing::get};
//! use cafe_auth::{AuthSettings, Authorizer, ClaimSet, TokenVerifier};
//!
//! # fn build() -> Result<Router, Box<dyn std::error::Error>> {
//! let settings = AuthSettings::new("dev-shop.us.auth0.com", "drinks", "RS256")?;
//! let authorizer = Authorizer::new(TokenVerifier::from_settings(&settings)?);
//!
//! async fn detail(Extension(claims): Extension<ClaimSet>) -> String {
//!     format!("hello {}", claims.subject)
//! }
//!
//! let app: Router = Router::new().route(
//!     "/drinks-detail",
//!     get(detail).route_layer(authorizer.require("get:drinks-detail")),
//! );
//! # Ok(app)
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `test-util` - RSA test signers, claim builders and a wiremock-backed
//!   identity provider ([`testutil`])

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod claims;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod jwks;
pub mod middleware;
pub mod verifier;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

#[doc(inline)]
pub use claims::{Audience, ClaimSet};
#[doc(inline)]
pub use config::AuthSettings;
#[doc(inline)]
pub use enforcer::authorize;
#[doc(inline)]
pub use error::{AuthConfigError, AuthFailure};
#[doc(inline)]
pub use jwks::{KeyLookupError, KeyProviderCache};
#[doc(inline)]
pub use middleware::{Authorizer, RequirePermissionLayer, RequirePermissionService};
#[doc(inline)]
pub use verifier::TokenVerifier;
