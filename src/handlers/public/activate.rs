use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::handlers::denial_response;
use crate::util::extract_request_info;

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub license_key: String,
    pub domain: String,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub activated: bool,
    /// True when the domain was already bound (idempotent success)
    pub already_active: bool,
    pub domain: String,
    pub domains_in_use: i64,
    pub max_domains: i64,
}

/// POST /activate — bind a domain to a license, counted against its quota.
pub async fn activate_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ActivateRequest>,
) -> Result<Response> {
    let request = extract_request_info(&headers);

    let activation = state
        .activation
        .activate(&body.license_key, &body.domain, &request)?;

    let response = match activation {
        Activation::Activated {
            domain,
            domains_in_use,
            max_domains,
        } => ActivateResponse {
            activated: true,
            already_active: false,
            domain,
            domains_in_use,
            max_domains,
        },
        Activation::AlreadyActive {
            domain,
            domains_in_use,
            max_domains,
        } => ActivateResponse {
            activated: true,
            already_active: true,
            domain,
            domains_in_use,
            max_domains,
        },
        Activation::Denied(denial) => return Ok(denial_response(denial)),
    };

    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize)]
pub struct DeactivateRequest {
    pub license_key: String,
    pub domain: String,
}

#[derive(Debug, Serialize)]
pub struct DeactivateResponse {
    pub deactivated: bool,
}

/// POST /deactivate — unbind a domain, freeing a quota slot.
pub async fn deactivate_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DeactivateRequest>,
) -> Result<Response> {
    let request = extract_request_info(&headers);

    match state
        .activation
        .deactivate(&body.license_key, &body.domain, &request)?
    {
        Ok(deactivated) => Ok(Json(DeactivateResponse { deactivated }).into_response()),
        Err(denial) => Ok(denial_response(denial)),
    }
}

#[derive(Debug, Deserialize)]
pub struct DomainsQuery {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct DomainInfo {
    pub domain: String,
    pub activated_at: i64,
}

#[derive(Debug, Serialize)]
pub struct DomainsResponse {
    pub domains: Vec<DomainInfo>,
    pub max_domains: i64,
}

/// GET /domains — the license's domain set in activation order.
pub async fn list_domains(
    State(state): State<AppState>,
    Query(query): Query<DomainsQuery>,
) -> Result<Response> {
    match state.activation.list_domains(&query.key)? {
        Ok((domains, max_domains)) => {
            let domains = domains
                .into_iter()
                .map(|d| DomainInfo {
                    domain: d.domain,
                    activated_at: d.activated_at,
                })
                .collect();
            Ok(Json(DomainsResponse {
                domains,
                max_domains,
            })
            .into_response())
        }
        Err(denial) => Ok(denial_response(denial)),
    }
}
