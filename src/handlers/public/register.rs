use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::handlers::denial_response;
use crate::models::License;
use crate::registration::Registration;
use crate::util::extract_request_info;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub purchase_code: String,
    pub account_id: String,
    #[serde(default)]
    pub product_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub created: bool,
    pub license: License,
}

/// POST /register — materialize a verified purchase code into a license for
/// an account. Idempotent per (code, account).
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Result<Response> {
    let request = extract_request_info(&headers);

    let registration = state
        .registrar
        .auto_register(
            &body.purchase_code,
            body.product_id.as_deref(),
            &body.account_id,
            &request,
        )
        .await?;

    match registration {
        Registration::Created { license, .. } => Ok((
            StatusCode::CREATED,
            Json(RegisterResponse {
                created: true,
                license,
            }),
        )
            .into_response()),
        Registration::Existing(license) => Ok(Json(RegisterResponse {
            created: false,
            license: *license,
        })
        .into_response()),
        Registration::Denied(denial) => Ok(denial_response(denial)),
    }
}
