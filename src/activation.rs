//! Domain activation against a license's quota.
//!
//! The quota check and the append run inside one write-locking transaction
//! (see `queries::append_domain`), so concurrent requests for the last slot
//! serialize: with K slots free, exactly K of N racing activations win.

use chrono::Utc;

use crate::audit::{AuditLogger, hash_code};
use crate::db::{DbPool, queries};
use crate::error::{Denial, Result};
use crate::models::{ActivatedDomain, LicenseStatus, NewAttempt, VerificationSource};
use crate::normalize::{clean_license_key, is_valid_hostname, normalize_domain};
use crate::util::RequestInfo;

#[derive(Debug)]
pub enum Activation {
    Activated {
        domain: String,
        domains_in_use: i64,
        max_domains: i64,
    },
    /// The domain was already on the license — activating twice is not an
    /// error.
    AlreadyActive {
        domain: String,
        domains_in_use: i64,
        max_domains: i64,
    },
    Denied(Denial),
}

#[derive(Clone)]
pub struct ActivationManager {
    db: DbPool,
    audit: AuditLogger,
}

impl ActivationManager {
    pub fn new(db: DbPool, audit: AuditLogger) -> Self {
        Self { db, audit }
    }

    /// Bind a domain to the license identified by `raw_key`.
    pub fn activate(
        &self,
        raw_key: &str,
        raw_domain: &str,
        request: &RequestInfo,
    ) -> Result<Activation> {
        let key = match clean_license_key(raw_key) {
            Ok(key) => key,
            Err(denial) => return Ok(Activation::Denied(denial)),
        };
        let code_hash = hash_code(&key);

        let domain = normalize_domain(raw_domain);
        if !is_valid_hostname(&domain) {
            self.record(&code_hash, Some(domain.clone()), false, "invalid hostname", request);
            return Ok(Activation::Denied(Denial::InvalidFormat(format!(
                "{:?} is not a valid hostname",
                raw_domain
            ))));
        }

        let mut conn = self.db.get()?;

        let Some(license) = queries::get_license_by_key(&conn, &key)? else {
            self.record(&code_hash, Some(domain.clone()), false, "license key not found", request);
            return Ok(Activation::Denied(Denial::NotFound));
        };

        let now = Utc::now().timestamp();
        match license.effective_status(now) {
            LicenseStatus::Active => {}
            LicenseStatus::Inactive => {
                self.record(&code_hash, Some(domain.clone()), false, "license inactive", request);
                return Ok(Activation::Denied(Denial::LicenseInactive));
            }
            LicenseStatus::Suspended => {
                self.record(&code_hash, Some(domain.clone()), false, "license suspended", request);
                return Ok(Activation::Denied(Denial::LicenseSuspended));
            }
            LicenseStatus::Expired => {
                self.record(&code_hash, Some(domain.clone()), false, "license expired", request);
                return Ok(Activation::Denied(Denial::LicenseExpired));
            }
        }

        let outcome =
            queries::append_domain(&mut conn, &license.id, license.max_domains, &domain)?;

        match outcome {
            queries::DomainAppend::Appended(_) => {
                let in_use = queries::count_domains_for_license(&conn, &license.id)?;
                self.record(&code_hash, Some(domain.clone()), true, "domain activated", request);
                Ok(Activation::Activated {
                    domain,
                    domains_in_use: in_use,
                    max_domains: license.max_domains,
                })
            }
            queries::DomainAppend::AlreadyPresent(_) => {
                let in_use = queries::count_domains_for_license(&conn, &license.id)?;
                self.record(&code_hash, Some(domain.clone()), true, "domain already active", request);
                Ok(Activation::AlreadyActive {
                    domain,
                    domains_in_use: in_use,
                    max_domains: license.max_domains,
                })
            }
            queries::DomainAppend::QuotaExceeded { .. } => {
                self.record(&code_hash, Some(domain.clone()), false, "domain quota exceeded", request);
                Ok(Activation::Denied(Denial::QuotaExceeded))
            }
        }
    }

    /// Unbind a domain, freeing a quota slot. Returns false when the domain
    /// was not bound.
    pub fn deactivate(
        &self,
        raw_key: &str,
        raw_domain: &str,
        request: &RequestInfo,
    ) -> Result<std::result::Result<bool, Denial>> {
        let key = match clean_license_key(raw_key) {
            Ok(key) => key,
            Err(denial) => return Ok(Err(denial)),
        };
        let domain = normalize_domain(raw_domain);
        let conn = self.db.get()?;

        let Some(license) = queries::get_license_by_key(&conn, &key)? else {
            return Ok(Err(Denial::NotFound));
        };

        let removed = queries::remove_domain(&conn, &license.id, &domain)?;
        self.record(
            &hash_code(&key),
            Some(domain),
            removed,
            if removed { "domain deactivated" } else { "domain was not active" },
            request,
        );
        Ok(Ok(removed))
    }

    /// The license's domain set in activation order.
    pub fn list_domains(
        &self,
        raw_key: &str,
    ) -> Result<std::result::Result<(Vec<ActivatedDomain>, i64), Denial>> {
        let key = match clean_license_key(raw_key) {
            Ok(key) => key,
            Err(denial) => return Ok(Err(denial)),
        };
        let conn = self.db.get()?;

        let Some(license) = queries::get_license_by_key(&conn, &key)? else {
            return Ok(Err(Denial::NotFound));
        };

        let domains = queries::list_domains_for_license(&conn, &license.id)?;
        Ok(Ok((domains, license.max_domains)))
    }

    fn record(
        &self,
        code_hash: &str,
        domain: Option<String>,
        outcome: bool,
        message: &str,
        request: &RequestInfo,
    ) {
        self.audit.record(NewAttempt {
            code_hash: code_hash.to_string(),
            domain,
            outcome,
            message: message.to_string(),
            source: VerificationSource::DatabaseRaw,
            ip_address: request.ip.clone(),
            user_agent: request.user_agent.clone(),
            error_detail: None,
        });
    }
}
