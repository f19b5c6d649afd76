pub mod admin;
pub mod public;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::db::AppState;
use crate::error::Denial;
use crate::middleware::admin_auth;

/// Error response for a domain-level refusal: HTTP status from the denial
/// kind, body carries the stable code so clients can branch on it.
pub(crate) fn denial_response(denial: Denial) -> Response {
    (
        denial.status(),
        axum::Json(json!({ "error": denial.message(), "code": denial.code() })),
    )
        .into_response()
}

pub fn public_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    Router::new()
        .route("/verify", post(public::verify_code))
        .route("/verify/raw", get(public::verify_raw))
        .route("/activate", post(public::activate_domain))
        .route("/deactivate", post(public::deactivate_domain))
        .route("/domains", get(public::list_domains))
        .route("/register", post(public::register))
        .with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    Router::new()
        .route("/admin/licenses", post(admin::create_license))
        .route("/admin/licenses/{key}", get(admin::get_license))
        .route("/admin/licenses/{key}/status", post(admin::set_license_status))
        .route("/admin/licenses/{key}/renew", post(admin::renew_license))
        .route("/admin/products", get(admin::list_products).post(admin::create_product))
        .route("/admin/users", post(admin::create_user))
        .route("/admin/attempts", get(admin::query_attempts))
        .route("/admin/attempts/stats", get(admin::attempt_stats))
        .route("/admin/attempts/suspicious", get(admin::suspicious_ips))
        .route("/admin/attempts/purge", post(admin::purge_attempts))
        .layer(from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

/// The full application router. Rate limiting and tracing layers are added
/// by the binary; tests drive this router directly.
pub fn app(state: AppState) -> Router {
    public_router(state.clone()).merge(admin_router(state))
}
