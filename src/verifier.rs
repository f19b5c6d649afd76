//! Dual-source license verification.
//!
//! The local store is authoritative and cheap; the marketplace is a
//! network-dependent fallback used only to discover legitimacy the first
//! time. Once a remote sale is materialized into a local license, subsequent
//! lookups never leave the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::audit::{AuditLogger, hash_code};
use crate::db::{DbPool, queries};
use crate::error::Result;
use crate::marketplace::{MarketplaceClient, RemoteLookup, RemoteSale};
use crate::models::{License, LicenseStatus, NewAttempt, VerificationSource};
use crate::normalize::PurchaseCode;
use crate::notify::Notifier;
use crate::registration::{Registration, materialize_remote_sale};
use crate::util::RequestInfo;

/// Tagged verification result. `Invalid` is an affirmative negative;
/// `Unverifiable` means the truth is unknown and the caller may retry.
#[derive(Debug)]
pub enum Verification {
    /// Confirmed by the authoritative local store
    Local(Box<License>),
    /// Confirmed by the marketplace (and materialized locally when an
    /// account context was present)
    Remote(Box<RemoteSale>),
    /// Neither source knows the code
    Invalid,
    /// The sale is real but for a different product than requested
    WrongProduct,
    /// Failed-attempt budget exhausted; refused without a remote call
    TooManyAttempts,
    Unverifiable(String),
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Local(_) | Verification::Remote(_))
    }
}

/// Raw license-key classification. Callers get the *reason* a key is
/// rejected, not a collapsed "invalid".
#[derive(Debug)]
pub enum RawVerification {
    Valid(Box<License>),
    NotFound,
    WrongProduct,
    Inactive,
    Suspended,
    Expired,
}

impl RawVerification {
    /// Stable reason code for API responses (`license_status:<state>` for
    /// status blocks, matching how operators read the audit log).
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            RawVerification::Valid(_) => None,
            RawVerification::NotFound => Some("not_found"),
            RawVerification::WrongProduct => Some("wrong_product"),
            RawVerification::Inactive => Some("license_status:inactive"),
            RawVerification::Suspended => Some("license_status:suspended"),
            RawVerification::Expired => Some("license_expired"),
        }
    }
}

/// Failed-attempt budget for one code within a trailing window. The count is
/// a log-derived heuristic, not a strict counter; see DESIGN.md.
#[derive(Debug, Clone, Copy)]
pub struct AttemptBudget {
    /// 0 disables the guard
    pub max_failed: i64,
    pub window_secs: i64,
}

/// Short-TTL cache of positive marketplace lookups, keyed by a hash of
/// (code, product, time bucket). Entries expire with their bucket, so a
/// cached sale is never served past the TTL. Negative results are never
/// cached: a fresh local miss must always stay a miss.
#[derive(Clone)]
pub struct VerifyCache {
    ttl_secs: i64,
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

struct CacheEntry {
    sale: RemoteSale,
    bucket: i64,
}

impl VerifyCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl_secs,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn bucket(&self, now: i64) -> i64 {
        now / self.ttl_secs.max(1)
    }

    fn cache_key(canonical: &str, product_id: Option<&str>, bucket: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"keygate-vcache-v1:");
        hasher.update(canonical.as_bytes());
        hasher.update(b":");
        hasher.update(product_id.unwrap_or("*").as_bytes());
        hasher.update(b":");
        hasher.update(bucket.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, canonical: &str, product_id: Option<&str>, now: i64) -> Option<RemoteSale> {
        if self.ttl_secs <= 0 {
            return None;
        }
        let bucket = self.bucket(now);
        let key = Self::cache_key(canonical, product_id, bucket);
        let entries = self.entries.lock().unwrap();
        entries
            .get(&key)
            .filter(|entry| entry.bucket == bucket)
            .map(|entry| entry.sale.clone())
    }

    pub fn insert(&self, canonical: &str, product_id: Option<&str>, now: i64, sale: RemoteSale) {
        if self.ttl_secs <= 0 {
            return;
        }
        let bucket = self.bucket(now);
        let key = Self::cache_key(canonical, product_id, bucket);
        let mut entries = self.entries.lock().unwrap();
        // Old buckets can never be read again; drop them on the way in
        entries.retain(|_, entry| entry.bucket == bucket);
        entries.insert(key, CacheEntry { sale, bucket });
    }
}

#[derive(Clone)]
pub struct Verifier {
    db: DbPool,
    marketplace: MarketplaceClient,
    audit: AuditLogger,
    cache: VerifyCache,
    notifier: Notifier,
    budget: AttemptBudget,
}

impl Verifier {
    pub fn new(
        db: DbPool,
        marketplace: MarketplaceClient,
        audit: AuditLogger,
        cache: VerifyCache,
        notifier: Notifier,
        budget: AttemptBudget,
    ) -> Self {
        Self {
            db,
            marketplace,
            audit,
            cache,
            notifier,
            budget,
        }
    }

    /// Dual-source verification of a normalized purchase code.
    ///
    /// Local store first; on a miss, the marketplace. When `account_id` is
    /// present and the marketplace confirms the sale, the result is
    /// materialized into a local license so the next lookup is local.
    pub async fn verify(
        &self,
        code: &PurchaseCode,
        product_id: Option<&str>,
        account_id: Option<&str>,
        request: &RequestInfo,
    ) -> Result<Verification> {
        let code_hash = hash_code(code.canonical());
        let now = Utc::now().timestamp();

        // Step 1: authoritative local store
        {
            let conn = self.db.get()?;
            if let Some(license) =
                queries::find_active_license(&conn, code.canonical(), product_id, now)?
            {
                self.record(
                    &code_hash,
                    true,
                    "verified against license store",
                    VerificationSource::Database,
                    request,
                    None,
                );
                return Ok(Verification::Local(Box::new(license)));
            }
        }

        // Refuse hammered codes without burning a marketplace call
        if self.budget.max_failed > 0 {
            let recent = self
                .audit
                .failed_count_for_code(&code_hash, self.budget.window_secs);
            if recent >= self.budget.max_failed {
                self.record(
                    &code_hash,
                    false,
                    "attempt budget exhausted",
                    VerificationSource::Database,
                    request,
                    None,
                );
                return Ok(Verification::TooManyAttempts);
            }
        }

        // Step 2: marketplace fallback, short-TTL cache first
        let cached = self.cache.get(code.canonical(), product_id, now);
        let lookup = match cached {
            Some(sale) => RemoteLookup::Sale(sale),
            None => self.marketplace.verify_purchase(code.raw(), None).await,
        };

        match lookup {
            RemoteLookup::Sale(sale) => {
                if let Some(product_id) = product_id {
                    let conn = self.db.get()?;
                    let matches = queries::get_product_by_id(&conn, product_id)?
                        .and_then(|p| p.marketplace_item_id)
                        .is_some_and(|item_id| item_id == sale.item.id);
                    if !matches {
                        self.record(
                            &code_hash,
                            false,
                            "marketplace sale is for a different product",
                            VerificationSource::Remote,
                            request,
                            None,
                        );
                        return Ok(Verification::WrongProduct);
                    }
                }

                self.cache
                    .insert(code.canonical(), product_id, now, sale.clone());

                // Read-through materialization: next lookup hits step 1
                if let Some(account_id) = account_id {
                    self.materialize(code, &sale, product_id, account_id);
                }

                self.record(
                    &code_hash,
                    true,
                    "verified against marketplace",
                    VerificationSource::Remote,
                    request,
                    None,
                );
                Ok(Verification::Remote(Box::new(sale)))
            }
            RemoteLookup::NotFound => {
                self.record(
                    &code_hash,
                    false,
                    "code unknown to store and marketplace",
                    VerificationSource::Remote,
                    request,
                    None,
                );
                Ok(Verification::Invalid)
            }
            RemoteLookup::Unverifiable(detail) => {
                self.record(
                    &code_hash,
                    false,
                    "marketplace unreachable",
                    VerificationSource::Remote,
                    request,
                    Some(detail.clone()),
                );
                Ok(Verification::Unverifiable(detail))
            }
        }
    }

    /// Raw license-key verification: exact lookup ignoring status and
    /// expiry, then explicit classification of the failure reason.
    pub fn verify_raw(
        &self,
        key: &str,
        product_id: Option<&str>,
        request: &RequestInfo,
    ) -> Result<RawVerification> {
        let code_hash = hash_code(key);
        let now = Utc::now().timestamp();
        let conn = self.db.get()?;

        let Some(license) = queries::get_license_by_key(&conn, key)? else {
            self.record(
                &code_hash,
                false,
                "license key not found",
                VerificationSource::DatabaseRaw,
                request,
                None,
            );
            return Ok(RawVerification::NotFound);
        };

        if let Some(product_id) = product_id
            && license.product_id != product_id
        {
            self.record(
                &code_hash,
                false,
                "license key bound to a different product",
                VerificationSource::DatabaseRaw,
                request,
                None,
            );
            return Ok(RawVerification::WrongProduct);
        }

        let classified = match license.effective_status(now) {
            LicenseStatus::Active => RawVerification::Valid(Box::new(license)),
            LicenseStatus::Inactive => RawVerification::Inactive,
            LicenseStatus::Suspended => RawVerification::Suspended,
            LicenseStatus::Expired => RawVerification::Expired,
        };

        match &classified {
            RawVerification::Valid(_) => self.record(
                &code_hash,
                true,
                "license key verified",
                VerificationSource::DatabaseRaw,
                request,
                None,
            ),
            other => self.record(
                &code_hash,
                false,
                other.reason().unwrap_or("rejected"),
                VerificationSource::DatabaseRaw,
                request,
                None,
            ),
        }

        Ok(classified)
    }

    /// Materialize a confirmed remote sale for an account. Failure here must
    /// not fail the verification that discovered the sale.
    fn materialize(&self, code: &PurchaseCode, sale: &RemoteSale, product_id: Option<&str>, account_id: &str) {
        let result = self.db.get().map_err(crate::error::AppError::from).and_then(|mut conn| {
            materialize_remote_sale(&mut conn, code.canonical(), sale, product_id, account_id)
        });
        match result {
            Ok(Registration::Created { ref license, .. }) => {
                self.notifier.license_created(license);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(account_id, "auto-registration after remote verify failed: {}", err);
            }
        }
    }

    fn record(
        &self,
        code_hash: &str,
        outcome: bool,
        message: &str,
        source: VerificationSource,
        request: &RequestInfo,
        error_detail: Option<String>,
    ) {
        self.audit.record(NewAttempt {
            code_hash: code_hash.to_string(),
            domain: None,
            outcome,
            message: message.to_string(),
            source,
            ip_address: request.ip.clone(),
            user_agent: request.user_agent.clone(),
            error_detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::RemoteItem;

    fn sale(item_id: &str) -> RemoteSale {
        RemoteSale {
            item: RemoteItem {
                id: item_id.into(),
                name: Some("Widget".into()),
            },
            amount_cents: Some(4900),
            supported_until: None,
            buyer: None,
        }
    }

    #[test]
    fn test_cache_hit_within_bucket() {
        let cache = VerifyCache::new(300);
        cache.insert("abcdef123456", Some("p1"), 1_000_000, sale("42"));
        let hit = cache.get("abcdef123456", Some("p1"), 1_000_100);
        assert!(hit.is_some_and(|s| s.item.id == "42"));
    }

    #[test]
    fn test_cache_expires_with_bucket() {
        let cache = VerifyCache::new(300);
        cache.insert("abcdef123456", None, 1_000_000, sale("42"));
        // 1_000_000/300 and 1_000_400/300 land in different buckets
        assert!(cache.get("abcdef123456", None, 1_000_400).is_none());
    }

    #[test]
    fn test_cache_keys_include_product() {
        let cache = VerifyCache::new(300);
        cache.insert("abcdef123456", Some("p1"), 1_000_000, sale("42"));
        assert!(cache.get("abcdef123456", Some("p2"), 1_000_000).is_none());
        assert!(cache.get("abcdef123456", None, 1_000_000).is_none());
    }

    #[test]
    fn test_cache_disabled_with_zero_ttl() {
        let cache = VerifyCache::new(0);
        cache.insert("abcdef123456", None, 1_000_000, sale("42"));
        assert!(cache.get("abcdef123456", None, 1_000_000).is_none());
    }

    #[test]
    fn test_raw_verification_reason_codes() {
        assert_eq!(RawVerification::NotFound.reason(), Some("not_found"));
        assert_eq!(
            RawVerification::Suspended.reason(),
            Some("license_status:suspended")
        );
        assert_eq!(RawVerification::Expired.reason(), Some("license_expired"));
    }
}
