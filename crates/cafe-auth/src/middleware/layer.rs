//! Tower Layer for permission-gated routes

use std::sync::Arc;
use tower::Layer;

use super::service::RequirePermissionService;
use crate::verifier::TokenVerifier;

/// Tower Layer that guards a service with one required permission.
///
/// Built by [`Authorizer::require`](super::Authorizer::require).
#[derive(Debug, Clone)]
pub struct RequirePermissionLayer {
    verifier: Arc<TokenVerifier>,
    permission: Arc<str>,
}

impl RequirePermissionLayer {
    /// Create a layer requiring `permission`
    pub fn new(verifier: Arc<TokenVerifier>, permission: impl Into<Arc<str>>) -> Self {
        Self {
            verifier,
            permission: permission.into(),
        }
    }
}

impl<S> Layer<S> for RequirePermissionLayer {
    type Service = RequirePermissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequirePermissionService::new(
            inner,
            Arc::clone(&self.verifier),
            Arc::clone(&self.permission),
        )
    }
}
