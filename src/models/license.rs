use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Inactive,
    Suspended,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    /// System-issued key, unique, compared verbatim
    pub license_key: String,
    /// Marketplace-issued code, stored in canonical (normalized) form
    pub purchase_code: String,
    pub user_id: String,
    pub product_id: String,
    pub status: LicenseStatus,
    /// None = lifetime license
    pub license_expires_at: Option<i64>,
    pub support_expires_at: Option<i64>,
    pub max_domains: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    /// Status with lazy expiry applied: a license whose expiry has passed is
    /// expired at read time regardless of the stored `status` value.
    pub fn effective_status(&self, now: i64) -> LicenseStatus {
        if self.status == LicenseStatus::Active
            && let Some(expires_at) = self.license_expires_at
            && now > expires_at
        {
            return LicenseStatus::Expired;
        }
        self.status
    }

    pub fn is_effectively_active(&self, now: i64) -> bool {
        self.effective_status(now) == LicenseStatus::Active
    }

    pub fn support_active(&self, now: i64) -> bool {
        match self.support_expires_at {
            Some(until) => now <= until,
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateLicense {
    /// Canonical purchase code (already normalized)
    pub purchase_code: String,
    pub user_id: String,
    pub product_id: String,
    pub license_expires_at: Option<i64>,
    pub support_expires_at: Option<i64>,
    pub max_domains: i64,
}

/// One activated hostname, a row of the license's ordered domain set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivatedDomain {
    pub id: String,
    pub license_id: String,
    pub domain: String,
    pub activated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LicenseWithDomains {
    #[serde(flatten)]
    pub license: License,
    pub domains: Vec<String>,
}
