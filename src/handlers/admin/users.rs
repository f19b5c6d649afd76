use axum::extract::State;
use axum::http::StatusCode;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{CreateUser, User};

/// POST /admin/users — minimal account records for license ownership.
pub async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUser>,
) -> Result<(StatusCode, Json<User>)> {
    let conn = state.db.get()?;

    if queries::get_user_by_email(&conn, &body.email)?.is_some() {
        return Err(AppError::Conflict(
            "A user with this email already exists".into(),
        ));
    }

    let user = queries::create_user(&conn, &body)?;
    Ok((StatusCode::CREATED, Json(user)))
}
