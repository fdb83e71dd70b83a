//! # Cafe Server - Drinks Catalog Service
//!
//! HTTP service over a drinks catalog. Reading drink titles is public;
//! reading recipes and every write require a bearer token from the trusted
//! identity provider carrying the route's permission.
//!
//! ## Architecture
//!
//! - [`config`] - [`ServerConfig`] from environment variables and optional file
//! - [`logging`] - [`LoggingConfig`] tracing subscriber setup
//! - [`catalog`] - drink types, [`CatalogStore`](catalog::CatalogStore) and
//!   [`LocalCatalog`](catalog::LocalCatalog)
//! - [`routes`] - the axum [`Router`](axum::Router) with permission-gated routes
//! - [`error`] - [`ApiError`] response bodies
//!
//! Token verification and permission checks live in [`cafe_auth`].

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;

#[doc(inline)]
pub use config::{ConfigError, ServerConfig};
#[doc(inline)]
pub use error::ApiError;
#[doc(inline)]
pub use logging::LoggingConfig;
#[doc(inline)]
pub use routes::{AppState, router};

use axum::Router;
use cafe_auth::{AuthConfigError, Authorizer, TokenVerifier};
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{CatalogError, LocalCatalog};

/// Failures while assembling the application
#[derive(Debug, Error)]
pub enum StartupError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Auth components could not be built
    #[error(transparent)]
    Auth(#[from] AuthConfigError),

    /// Catalog could not be opened
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Build the verifier, prime its key cache and open the catalog.
///
/// A failed key prime is logged and left to the first request to retry.
///
/// # Errors
///
/// Returns an error if the auth settings are invalid or the catalog cannot be
/// opened.
pub async fn build_app(config: &ServerConfig) -> Result<Router, StartupError> {
    let settings = config.auth_settings()?;
    let verifier = TokenVerifier::from_settings(&settings)?;

    let keys = verifier.key_provider();
    match keys.refresh().await {
        Ok(count) => info!(jwks_url = %keys.jwks_url(), key_count = count, "Signing keys primed"),
        Err(e) => warn!(
            jwks_url = %keys.jwks_url(),
            error = %e,
            "Could not prime signing keys; will retry on first request"
        ),
    }

    let catalog = LocalCatalog::open(&config.db_url).await?;
    Ok(router(AppState::new(catalog), &Authorizer::new(verifier)))
}
