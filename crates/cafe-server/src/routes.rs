//! HTTP routes
//!
//! | Method | Path | Permission |
//! |--------|------|------------|
//! | GET | `/drinks` | none |
//! | GET | `/drinks-detail` | `get:drinks-detail` |
//! | POST | `/drinks` | `post:drinks` |
//! | PATCH | `/drinks/{id}` | `patch:drinks` |
//! | DELETE | `/drinks/{id}` | `delete:drinks` |

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::{delete, get, patch, post};
use axum::{Extension, Json, Router};
use cafe_auth::{Authorizer, ClaimSet};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::catalog::{CatalogStore, DrinkPatch, NewDrink};
use crate::error::ApiError;

/// Read the detail view of every drink
pub const GET_DRINKS_DETAIL: &str = "get:drinks-detail";
/// Create drinks
pub const POST_DRINKS: &str = "post:drinks";
/// Update drinks
pub const PATCH_DRINKS: &str = "patch:drinks";
/// Delete drinks
pub const DELETE_DRINKS: &str = "delete:drinks";

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    /// Catalog backing every route
    pub catalog: Arc<dyn CatalogStore>,
}

impl AppState {
    /// State over any catalog implementation
    pub fn new(catalog: impl CatalogStore + 'static) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Build the application router.
pub fn router(state: AppState, authorizer: &Authorizer) -> Router {
    Router::new()
        .route(
            "/drinks",
            get(list_drinks).merge(post(create_drink).route_layer(authorizer.require(POST_DRINKS))),
        )
        .route(
            "/drinks-detail",
            get(list_drink_details).route_layer(authorizer.require(GET_DRINKS_DETAIL)),
        )
        .route(
            "/drinks/{id}",
            patch(update_drink)
                .route_layer(authorizer.require(PATCH_DRINKS))
                .merge(delete(delete_drink).route_layer(authorizer.require(DELETE_DRINKS))),
        )
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn list_drinks(State(state): State<AppState>) -> ApiResult {
    let drinks: Vec<_> = state.catalog.list().await?.iter().map(|d| d.summary()).collect();
    Ok(Json(json!({ "success": true, "drinks": drinks })))
}

async fn list_drink_details(State(state): State<AppState>) -> ApiResult {
    let drinks = state.catalog.list().await?;
    Ok(Json(json!({ "success": true, "drinks": drinks })))
}

async fn create_drink(
    State(state): State<AppState>,
    Extension(claims): Extension<ClaimSet>,
    body: Result<Json<NewDrink>, JsonRejection>,
) -> ApiResult {
    let Json(new_drink) = body?;
    let drink = state.catalog.create(new_drink).await?;
    info!(id = drink.id, title = %drink.title, subject = %claims.subject, "Drink created");
    Ok(Json(json!({ "success": true, "drinks": drink })))
}

async fn update_drink(
    State(state): State<AppState>,
    Extension(claims): Extension<ClaimSet>,
    id: Result<Path<u64>, PathRejection>,
    body: Result<Json<DrinkPatch>, JsonRejection>,
) -> ApiResult {
    let Path(id) = id?;
    state.catalog.get(id).await?;
    let Json(patch) = body?;

    let drink = state.catalog.update(id, patch).await?;
    info!(id, subject = %claims.subject, "Drink updated");
    Ok(Json(json!({ "success": true, "drinks": drink })))
}

async fn delete_drink(
    State(state): State<AppState>,
    Extension(claims): Extension<ClaimSet>,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult {
    let Path(id) = id?;
    state.catalog.get(id).await?;

    let deleted = state.catalog.delete(id).await?;
    info!(id = deleted, subject = %claims.subject, "Drink deleted");
    Ok(Json(json!({ "success": true, "delete": deleted })))
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}
