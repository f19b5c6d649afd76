use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::models::{CreateLicense, License, LicenseStatus, LicenseWithDomains};
use crate::normalize::normalize_purchase_code;
use crate::util::LicenseTerms;

/// Request body for issuing a license directly (payment flow, trials, bulk).
#[derive(Debug, Deserialize)]
pub struct IssueLicenseBody {
    pub user_id: String,
    pub product_id: String,
    /// Marketplace code to bind; omitted for licenses sold outside the
    /// marketplace (a synthetic code is generated)
    #[serde(default)]
    pub purchase_code: Option<String>,
    /// Override license expiration (days from now, null for lifetime).
    /// If not specified, uses the product's license_days
    #[serde(default)]
    pub license_days: Option<Option<i32>>,
    /// Override support expiration (days from now)
    #[serde(default)]
    pub support_days: Option<Option<i32>>,
    /// Override the product's default domain quota
    #[serde(default)]
    pub max_domains: Option<i64>,
}

/// POST /admin/licenses — direct issuance outside the marketplace flow.
pub async fn create_license(
    State(state): State<AppState>,
    Json(body): Json<IssueLicenseBody>,
) -> Result<(StatusCode, Json<License>)> {
    let conn = state.db.get()?;

    let product = queries::get_product_by_id(&conn, &body.product_id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    if queries::get_user_by_id(&conn, &body.user_id)?.is_none() {
        return Err(AppError::NotFound("Account not found".into()));
    }

    let purchase_code = match body.purchase_code {
        Some(ref raw) => normalize_purchase_code(raw)
            .map_err(|denial| AppError::BadRequest(denial.message()))?
            .canonical()
            .to_string(),
        // Synthetic code for non-marketplace sales; same canonical shape
        None => Uuid::new_v4().simple().to_string(),
    };

    if queries::get_license_for_account(&conn, &purchase_code, &body.user_id)?.is_some() {
        return Err(AppError::Conflict(
            "A license for this code and account already exists".into(),
        ));
    }

    let now = Utc::now().timestamp();
    let license_days = body.license_days.unwrap_or(product.license_days);
    let support_days = body.support_days.unwrap_or(product.support_days);
    let terms = LicenseTerms::from_days(license_days, support_days, now);
    queries::validate_expiry(terms.license_expires_at, now)?;

    let max_domains = body.max_domains.unwrap_or(product.max_domains);
    if max_domains < 1 {
        return Err(AppError::BadRequest("max_domains must be at least 1".into()));
    }

    let license = queries::create_license(
        &conn,
        &CreateLicense {
            purchase_code,
            user_id: body.user_id.clone(),
            product_id: product.id.clone(),
            license_expires_at: terms.license_expires_at,
            support_expires_at: terms.support_expires_at,
            max_domains,
        },
    )?;

    state.notifier.license_created(&license);

    Ok((StatusCode::CREATED, Json(license)))
}

#[derive(Debug, Deserialize)]
pub struct LicensePath {
    pub key: String,
}

/// GET /admin/licenses/{key}
pub async fn get_license(
    State(state): State<AppState>,
    Path(path): Path<LicensePath>,
) -> Result<Json<LicenseWithDomains>> {
    let conn = state.db.get()?;

    let license = queries::get_license_by_key(&conn, &path.key)?
        .ok_or_else(|| AppError::NotFound("License key not found".into()))?;
    let domains = queries::list_domains_for_license(&conn, &license.id)?
        .into_iter()
        .map(|d| d.domain)
        .collect();

    Ok(Json(LicenseWithDomains { license, domains }))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusBody {
    pub status: LicenseStatus,
}

/// POST /admin/licenses/{key}/status — administrative transition.
pub async fn set_license_status(
    State(state): State<AppState>,
    Path(path): Path<LicensePath>,
    Json(body): Json<SetStatusBody>,
) -> Result<Json<License>> {
    let conn = state.db.get()?;

    let license = queries::get_license_by_key(&conn, &path.key)?
        .ok_or_else(|| AppError::NotFound("License key not found".into()))?;

    queries::set_license_status(&conn, &license.id, body.status)?;
    let updated = queries::get_license_by_id(&conn, &license.id)?
        .ok_or_else(|| AppError::Internal("License vanished during update".into()))?;

    let suspended = body.status == LicenseStatus::Suspended;
    let reactivated =
        body.status == LicenseStatus::Active && license.status != LicenseStatus::Active;
    state
        .notifier
        .license_status_changed(&updated, suspended, reactivated);

    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct RenewBody {
    pub days: i64,
}

#[derive(Debug, Serialize)]
pub struct RenewResponse {
    #[serde(flatten)]
    pub license: License,
    pub renewed: bool,
}

/// POST /admin/licenses/{key}/renew — push expiry forward. Lifetime
/// licenses are returned unchanged.
pub async fn renew_license(
    State(state): State<AppState>,
    Path(path): Path<LicensePath>,
    Json(body): Json<RenewBody>,
) -> Result<Json<RenewResponse>> {
    if body.days < 1 {
        return Err(AppError::BadRequest("days must be at least 1".into()));
    }

    let conn = state.db.get()?;

    let license = queries::get_license_by_key(&conn, &path.key)?
        .ok_or_else(|| AppError::NotFound("License key not found".into()))?;

    let renewed = queries::renew_license(&conn, &license.id, body.days)?
        .ok_or_else(|| AppError::Internal("License vanished during renewal".into()))?;

    state.notifier.license_renewed(&renewed);

    Ok(Json(RenewResponse {
        license: renewed,
        renewed: true,
    }))
}
