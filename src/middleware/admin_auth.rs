use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::db::AppState;
use crate::util::extract_bearer_token;

/// Require the configured admin bearer token on /admin routes.
///
/// With no ADMIN_API_KEY configured the whole admin surface is disabled
/// rather than open.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(ref expected) = state.admin_api_key else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let token = extract_bearer_token(request.headers()).ok_or(StatusCode::UNAUTHORIZED)?;
    if token != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
