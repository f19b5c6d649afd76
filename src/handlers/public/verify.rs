use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::marketplace::RemoteItem;
use crate::models::{License, LicenseStatus, VerificationSource};
use crate::normalize::{clean_license_key, normalize_purchase_code};
use crate::util::extract_request_info;
use crate::verifier::{RawVerification, Verification};

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub purchase_code: String,
    #[serde(default)]
    pub product_id: Option<String>,
    /// When present, a confirmed remote sale is auto-registered for this
    /// account.
    #[serde(default)]
    pub account_id: Option<String>,
}

/// License fields safe to echo to a verification caller. The license key
/// itself is never included — verification proves validity, not ownership.
#[derive(Debug, Serialize)]
pub struct LicenseSummary {
    pub product_id: String,
    pub status: LicenseStatus,
    pub license_expires_at: Option<i64>,
    pub support_expires_at: Option<i64>,
    pub max_domains: i64,
}

impl From<&License> for LicenseSummary {
    fn from(license: &License) -> Self {
        Self {
            product_id: license.product_id.clone(),
            status: license.status,
            license_expires_at: license.license_expires_at,
            support_expires_at: license.support_expires_at,
            max_domains: license.max_domains,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<VerificationSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<LicenseSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<RemoteItem>,
    /// True when the failure is transient and worth retrying
    #[serde(skip_serializing_if = "is_false")]
    pub retryable: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl VerifyResponse {
    fn invalid(reason: &'static str) -> Self {
        Self {
            valid: false,
            source: None,
            reason: Some(reason),
            license: None,
            item: None,
            retryable: false,
        }
    }
}

/// POST /verify — dual-source purchase-code verification.
pub async fn verify_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>> {
    let request = extract_request_info(&headers);

    // Format failures are rejected before any I/O
    let code = match normalize_purchase_code(&body.purchase_code) {
        Ok(code) => code,
        Err(denial) => return Ok(Json(VerifyResponse::invalid(denial.code()))),
    };

    let verification = state
        .verifier
        .verify(
            &code,
            body.product_id.as_deref(),
            body.account_id.as_deref(),
            &request,
        )
        .await?;

    let response = match verification {
        Verification::Local(license) => VerifyResponse {
            valid: true,
            source: Some(VerificationSource::Database),
            reason: None,
            license: Some(LicenseSummary::from(license.as_ref())),
            item: None,
            retryable: false,
        },
        Verification::Remote(sale) => VerifyResponse {
            valid: true,
            source: Some(VerificationSource::Remote),
            reason: None,
            license: None,
            item: Some(sale.item.clone()),
            retryable: false,
        },
        Verification::Invalid => VerifyResponse::invalid("not_found"),
        Verification::WrongProduct => VerifyResponse::invalid("wrong_product"),
        Verification::TooManyAttempts => VerifyResponse::invalid("too_many_attempts"),
        Verification::Unverifiable(_) => VerifyResponse {
            retryable: true,
            ..VerifyResponse::invalid("unverifiable")
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct RawVerifyQuery {
    pub key: String,
    #[serde(default)]
    pub product_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RawVerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<LicenseSummary>,
}

/// GET /verify/raw — exact license-key lookup with an explicit rejection
/// reason instead of a collapsed "invalid".
pub async fn verify_raw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RawVerifyQuery>,
) -> Result<Json<RawVerifyResponse>> {
    let request = extract_request_info(&headers);

    let key = match clean_license_key(&query.key) {
        Ok(key) => key,
        Err(denial) => {
            return Ok(Json(RawVerifyResponse {
                valid: false,
                reason: Some(denial.code()),
                license: None,
            }));
        }
    };

    let raw = state
        .verifier
        .verify_raw(&key, query.product_id.as_deref(), &request)?;

    let response = match raw {
        RawVerification::Valid(license) => RawVerifyResponse {
            valid: true,
            reason: None,
            license: Some(LicenseSummary::from(license.as_ref())),
        },
        other => RawVerifyResponse {
            valid: false,
            reason: other.reason(),
            license: None,
        },
    };

    Ok(Json(response))
}
