//! Shared utility functions for the keygate application.

use axum::http::HeaderMap;

use crate::models::Product;

const SECONDS_PER_DAY: i64 = 86400;

/// Calculated license/support expiry timestamps.
#[derive(Debug, Clone, Copy)]
pub struct LicenseTerms {
    /// When the license expires (None = lifetime)
    pub license_expires_at: Option<i64>,
    /// When support ends (None = unbounded)
    pub support_expires_at: Option<i64>,
}

impl LicenseTerms {
    /// Calculate terms from a product's day-count configuration.
    pub fn from_product(product: &Product, base_time: i64) -> Self {
        Self::from_days(product.license_days, product.support_days, base_time)
    }

    pub fn from_days(license_days: Option<i32>, support_days: Option<i32>, base_time: i64) -> Self {
        Self {
            license_expires_at: license_days.map(|days| base_time + (days as i64) * SECONDS_PER_DAY),
            support_expires_at: support_days.map(|days| base_time + (days as i64) * SECONDS_PER_DAY),
        }
    }
}

/// Caller identity attached to audit records.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Extract client IP address and user-agent from request headers.
///
/// Tries `x-forwarded-for` first (for proxied requests), then `x-real-ip`,
/// and extracts the `user-agent` header for audit logging.
pub fn extract_request_info(headers: &HeaderMap) -> RequestInfo {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    RequestInfo { ip, user_agent }
}

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}
