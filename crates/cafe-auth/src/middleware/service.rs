//! Tower Service for permission-gated routes

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use tower_service::Service;

use super::authorize_headers;
use crate::verifier::TokenVerifier;

/// Future returned by [`RequirePermissionService`]
pub type RequirePermissionFuture<E> = BoxFuture<'static, Result<Response, E>>;

/// Tower Service that authorizes each request before forwarding it.
///
/// Authorization failures become responses, so the error type is the inner
/// service's.
#[derive(Debug, Clone)]
pub struct RequirePermissionService<S> {
    inner: S,
    verifier: Arc<TokenVerifier>,
    permission: Arc<str>,
}

impl<S> RequirePermissionService<S> {
    /// Wrap `inner`
    pub fn new(inner: S, verifier: Arc<TokenVerifier>, permission: Arc<str>) -> Self {
        Self {
            inner,
            verifier,
            permission,
        }
    }
}

impl<S, B> Service<http::Request<B>> for RequirePermissionService<S>
where
    S: Service<http::Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = RequirePermissionFuture<S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        // The clone may not be ready; keep it and drive the one poll_ready saw
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let verifier = Arc::clone(&self.verifier);
        let permission = Arc::clone(&self.permission);

        Box::pin(async move {
            match authorize_headers(&verifier, req.headers(), &permission).await {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                    inner.call(req).await
                }
                Err(failure) => Ok(failure.into_response()),
            }
        })
    }
}
