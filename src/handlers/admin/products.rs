use axum::extract::State;
use axum::http::StatusCode;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{CreateProduct, Product};

/// POST /admin/products
pub async fn create_product(
    State(state): State<AppState>,
    Json(body): Json<CreateProduct>,
) -> Result<(StatusCode, Json<Product>)> {
    if body.max_domains < 1 {
        return Err(AppError::BadRequest("max_domains must be at least 1".into()));
    }

    let conn = state.db.get()?;
    let product = queries::create_product(&conn, &body)?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// GET /admin/products
pub async fn list_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    let conn = state.db.get()?;
    let products = queries::list_products(&conn)?;
    Ok(Json(products))
}
