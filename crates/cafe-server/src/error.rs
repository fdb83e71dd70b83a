//! HTTP errors for catalog routes
//!
//! Rendered as `{"success": false, "error": <status>, "message": <text>}`.
//! Authorization failures are rendered separately by `cafe_auth`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::catalog::CatalogError;

/// Request failures outside the auth layer
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource or route does not exist
    #[error("Not found")]
    NotFound,

    /// Well-formed request that cannot be applied
    #[error("Unprocessable")]
    Unprocessable,

    /// Body could not be parsed
    #[error("Bad Request")]
    BadRequest,

    /// Storage or other server-side fault
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unprocessable => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "error": status.as_u16(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(_) => ApiError::NotFound,
            CatalogError::Unprocessable(reason) => {
                warn!(%reason, "Catalog change rejected");
                ApiError::Unprocessable
            }
            CatalogError::UnsupportedLocation(_) | CatalogError::Storage(_) => {
                error!(error = %err, "Catalog storage failure");
                ApiError::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(reason = %rejection.body_text(), "Rejected request body");
        match rejection {
            JsonRejection::JsonDataError(_) => ApiError::Unprocessable,
            _ => ApiError::BadRequest,
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        ApiError::NotFound
    }
}
