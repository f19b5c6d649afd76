use chrono::Utc;
use rand::Rng;
use rusqlite::{Connection, TransactionBehavior, params};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{
    ATTEMPT_COLS, DOMAIN_COLS, FromRow, INVOICE_COLS, LICENSE_COLS, PRODUCT_COLS, USER_COLS,
    query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Unambiguous charset for system-issued license keys (no 0/O, 1/I).
const KEY_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a license key: `KG-` + four groups of five charset characters.
/// Keys are compared verbatim, so the shape here is the shape forever.
pub fn generate_license_key() -> String {
    let mut rng = rand::thread_rng();
    let groups: Vec<String> = (0..4)
        .map(|_| {
            (0..5)
                .map(|_| KEY_CHARSET[rng.gen_range(0..KEY_CHARSET.len())] as char)
                .collect()
        })
        .collect();
    format!("KG-{}", groups.join("-"))
}

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO users (id, email, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![&id, &input.email, &input.name, now],
    )?;

    Ok(User {
        id,
        email: input.email.clone(),
        name: input.name.clone(),
        created_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLS),
        &[&email],
    )
}

// ============ Products ============

pub fn create_product(conn: &Connection, input: &CreateProduct) -> Result<Product> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO products (id, name, marketplace_item_id, license_days, support_days, max_domains, stock, price_cents, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &id,
            &input.name,
            &input.marketplace_item_id,
            input.license_days,
            input.support_days,
            input.max_domains,
            input.stock,
            input.price_cents,
            now,
            now
        ],
    )?;

    Ok(Product {
        id,
        name: input.name.clone(),
        marketplace_item_id: input.marketplace_item_id.clone(),
        license_days: input.license_days,
        support_days: input.support_days,
        max_domains: input.max_domains,
        stock: input.stock,
        price_cents: input.price_cents,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

/// Look up the product a marketplace sale maps to.
pub fn get_product_by_item_id(conn: &Connection, item_id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM products WHERE marketplace_item_id = ?1",
            PRODUCT_COLS
        ),
        &[&item_id],
    )
}

pub fn list_products(conn: &Connection) -> Result<Vec<Product>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM products ORDER BY created_at DESC",
            PRODUCT_COLS
        ),
        [],
    )
}

/// Decrement product stock by one. NULL stock means unlimited and always
/// succeeds; returns false when the product is out of stock.
pub fn decrement_stock(conn: &Connection, product_id: &str) -> Result<bool> {
    let unlimited: Option<bool> = conn
        .query_row(
            "SELECT stock IS NULL FROM products WHERE id = ?1",
            params![product_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    match unlimited {
        None => Ok(false),
        Some(true) => Ok(true),
        Some(false) => {
            let affected = conn.execute(
                "UPDATE products SET stock = stock - 1, updated_at = ?1 WHERE id = ?2 AND stock > 0",
                params![now(), product_id],
            )?;
            Ok(affected > 0)
        }
    }
}

// ============ Licenses ============

pub fn create_license(conn: &Connection, input: &CreateLicense) -> Result<License> {
    let id = gen_id();
    let now = now();

    // Regenerate on the (astronomically unlikely) key collision
    let mut license_key = generate_license_key();
    for _ in 0..3 {
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM licenses WHERE license_key = ?1",
            params![&license_key],
            |row| row.get(0),
        )?;
        if exists == 0 {
            break;
        }
        license_key = generate_license_key();
    }

    conn.execute(
        "INSERT INTO licenses (id, license_key, purchase_code, user_id, product_id, status, license_expires_at, support_expires_at, max_domains, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &id,
            &license_key,
            &input.purchase_code,
            &input.user_id,
            &input.product_id,
            LicenseStatus::Active.as_ref(),
            input.license_expires_at,
            input.support_expires_at,
            input.max_domains,
            now,
            now
        ],
    )?;

    Ok(License {
        id,
        license_key,
        purchase_code: input.purchase_code.clone(),
        user_id: input.user_id.clone(),
        product_id: input.product_id.clone(),
        status: LicenseStatus::Active,
        license_expires_at: input.license_expires_at,
        support_expires_at: input.support_expires_at,
        max_domains: input.max_domains,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )
}

/// Raw-key lookup: exact match, any status, any expiry. The caller
/// classifies the failure reason.
pub fn get_license_by_key(conn: &Connection, license_key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE license_key = ?1",
            LICENSE_COLS
        ),
        &[&license_key],
    )
}

/// Step-1 lookup of dual-source verification: match by license key or
/// canonical purchase code, requiring stored-active status and unexpired (or
/// lifetime) terms, optionally pinned to a product.
pub fn find_active_license(
    conn: &Connection,
    canonical_code: &str,
    product_id: Option<&str>,
    now: i64,
) -> Result<Option<License>> {
    match product_id {
        Some(product_id) => query_one(
            conn,
            &format!(
                "SELECT {} FROM licenses
                 WHERE (license_key = ?1 OR purchase_code = ?1)
                   AND status = 'active'
                   AND (license_expires_at IS NULL OR license_expires_at >= ?2)
                   AND product_id = ?3",
                LICENSE_COLS
            ),
            params![canonical_code, now, product_id],
        ),
        None => query_one(
            conn,
            &format!(
                "SELECT {} FROM licenses
                 WHERE (license_key = ?1 OR purchase_code = ?1)
                   AND status = 'active'
                   AND (license_expires_at IS NULL OR license_expires_at >= ?2)",
                LICENSE_COLS
            ),
            params![canonical_code, now],
        ),
    }
}

/// Any license bound to this canonical purchase code, regardless of owner,
/// status or expiry.
pub fn get_license_by_code(conn: &Connection, canonical_code: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE purchase_code = ?1",
            LICENSE_COLS
        ),
        &[&canonical_code],
    )
}

/// The license a specific account holds for this purchase code, if any.
/// Auto-registration's idempotence check.
pub fn get_license_for_account(
    conn: &Connection,
    canonical_code: &str,
    user_id: &str,
) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE purchase_code = ?1 AND user_id = ?2",
            LICENSE_COLS
        ),
        params![canonical_code, user_id],
    )
}

pub fn set_license_status(conn: &Connection, id: &str, status: LicenseStatus) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_ref(), now(), id],
    )?;
    Ok(affected > 0)
}

/// Push the expiry forward by `days` from max(now, current expiry) and
/// restore a stored `expired` status to active. Lifetime licenses stay
/// lifetime.
pub fn renew_license(conn: &Connection, id: &str, days: i64) -> Result<Option<License>> {
    let Some(license) = get_license_by_id(conn, id)? else {
        return Ok(None);
    };

    let now = now();
    let new_expiry = license
        .license_expires_at
        .map(|exp| exp.max(now) + days * 86400);

    conn.execute(
        "UPDATE licenses SET license_expires_at = ?1,
                status = CASE WHEN status = 'expired' THEN 'active' ELSE status END,
                updated_at = ?2
         WHERE id = ?3",
        params![new_expiry, now, id],
    )?;

    get_license_by_id(conn, id)
}

// ============ License domains ============

/// Outcome of the atomic domain append.
#[derive(Debug)]
pub enum DomainAppend {
    Appended(ActivatedDomain),
    /// The domain was already on the license; no mutation.
    AlreadyPresent(ActivatedDomain),
    /// No slots remain; no mutation.
    QuotaExceeded { in_use: i64, max_domains: i64 },
}

/// Append a domain to a license's domain set, enforcing the quota.
///
/// The whole read-check-append runs inside one immediate (write-locking)
/// transaction, so concurrent activations racing for the last slot serialize
/// and exactly one wins. Callers must pass an already-normalized domain.
pub fn append_domain(
    conn: &mut Connection,
    license_id: &str,
    max_domains: i64,
    domain: &str,
) -> Result<DomainAppend> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let existing: Option<ActivatedDomain> = query_one(
        &tx,
        &format!(
            "SELECT {} FROM license_domains WHERE license_id = ?1 AND domain = ?2",
            DOMAIN_COLS
        ),
        params![license_id, domain],
    )?;
    if let Some(existing) = existing {
        tx.commit()?;
        return Ok(DomainAppend::AlreadyPresent(existing));
    }

    let in_use: i64 = tx.query_row(
        "SELECT COUNT(*) FROM license_domains WHERE license_id = ?1",
        params![license_id],
        |row| row.get(0),
    )?;
    if in_use >= max_domains {
        tx.commit()?;
        return Ok(DomainAppend::QuotaExceeded {
            in_use,
            max_domains,
        });
    }

    let id = gen_id();
    let activated_at = now();
    tx.execute(
        "INSERT INTO license_domains (id, license_id, domain, activated_at) VALUES (?1, ?2, ?3, ?4)",
        params![&id, license_id, domain, activated_at],
    )?;
    tx.execute(
        "UPDATE licenses SET updated_at = ?1 WHERE id = ?2",
        params![activated_at, license_id],
    )?;
    tx.commit()?;

    Ok(DomainAppend::Appended(ActivatedDomain {
        id,
        license_id: license_id.to_string(),
        domain: domain.to_string(),
        activated_at,
    }))
}

/// Domains in activation order (the set is ordered by when each was added).
pub fn list_domains_for_license(
    conn: &Connection,
    license_id: &str,
) -> Result<Vec<ActivatedDomain>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM license_domains WHERE license_id = ?1 ORDER BY rowid",
            DOMAIN_COLS
        ),
        &[&license_id],
    )
}

pub fn count_domains_for_license(conn: &Connection, license_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM license_domains WHERE license_id = ?1",
        params![license_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn remove_domain(conn: &Connection, license_id: &str, domain: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM license_domains WHERE license_id = ?1 AND domain = ?2",
        params![license_id, domain],
    )?;
    Ok(deleted > 0)
}

// ============ Invoices ============

pub fn create_invoice(
    conn: &Connection,
    license: &License,
    amount_cents: i64,
    status: InvoiceStatus,
) -> Result<Invoice> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO invoices (id, license_id, user_id, product_id, amount_cents, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            &license.id,
            &license.user_id,
            &license.product_id,
            amount_cents,
            status.as_ref(),
            now
        ],
    )?;

    Ok(Invoice {
        id,
        license_id: license.id.clone(),
        user_id: license.user_id.clone(),
        product_id: license.product_id.clone(),
        amount_cents,
        status,
        created_at: now,
    })
}

pub fn count_invoices_for_license(conn: &Connection, license_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM invoices WHERE license_id = ?1",
        params![license_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============ Verification attempts (audit database) ============

pub fn create_attempt(
    conn: &Connection,
    input: &NewAttempt,
    status: AttemptStatus,
) -> Result<VerificationAttempt> {
    let id = gen_id();
    let timestamp = now();

    conn.execute(
        "INSERT INTO verification_attempts (id, timestamp, code_hash, domain, outcome, status, message, source, ip_address, user_agent, error_detail)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &id,
            timestamp,
            &input.code_hash,
            &input.domain,
            input.outcome,
            status.as_ref(),
            &input.message,
            input.source.as_ref(),
            &input.ip_address,
            &input.user_agent,
            &input.error_detail
        ],
    )?;

    Ok(VerificationAttempt {
        id,
        timestamp,
        code_hash: input.code_hash.clone(),
        domain: input.domain.clone(),
        outcome: input.outcome,
        status,
        message: input.message.clone(),
        source: input.source,
        ip_address: input.ip_address.clone(),
        user_agent: input.user_agent.clone(),
        error_detail: input.error_detail.clone(),
    })
}

pub fn query_attempts(
    conn: &Connection,
    query: &AttemptQuery,
) -> Result<(Vec<VerificationAttempt>, i64)> {
    // WHERE clause shared between COUNT and SELECT
    let mut where_clause = String::from("WHERE 1=1");
    let mut filters: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref code_hash) = query.code_hash {
        where_clause.push_str(" AND code_hash = ?");
        filters.push(Box::new(code_hash.clone()));
    }
    if let Some(ref ip) = query.ip_address {
        where_clause.push_str(" AND ip_address = ?");
        filters.push(Box::new(ip.clone()));
    }
    if let Some(status) = query.status {
        where_clause.push_str(" AND status = ?");
        filters.push(Box::new(status.as_ref().to_string()));
    }
    if let Some(from_ts) = query.from_timestamp {
        where_clause.push_str(" AND timestamp >= ?");
        filters.push(Box::new(from_ts));
    }
    if let Some(to_ts) = query.to_timestamp {
        where_clause.push_str(" AND timestamp <= ?");
        filters.push(Box::new(to_ts));
    }

    let count_sql = format!(
        "SELECT COUNT(*) FROM verification_attempts {}",
        where_clause
    );
    let filter_refs: Vec<&dyn rusqlite::ToSql> = filters.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, filter_refs.as_slice(), |row| row.get(0))?;

    let select_sql = format!(
        "SELECT {} FROM verification_attempts {} ORDER BY timestamp DESC LIMIT ? OFFSET ?",
        ATTEMPT_COLS, where_clause
    );
    filters.push(Box::new(query.limit()));
    filters.push(Box::new(query.offset()));
    let select_refs: Vec<&dyn rusqlite::ToSql> = filters.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&select_sql)?;
    let attempts = stmt
        .query_map(select_refs.as_slice(), |row| {
            VerificationAttempt::from_row(row)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok((attempts, total))
}

pub fn attempt_stats(conn: &Connection, window_hours: i64) -> Result<AttemptStats> {
    let cutoff = now() - window_hours * 3600;

    let (total, success, failed, error): (i64, i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(status = 'success'), 0),
                COALESCE(SUM(status = 'failed'), 0),
                COALESCE(SUM(status = 'error'), 0)
         FROM verification_attempts WHERE timestamp >= ?1",
        params![cutoff],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let distinct_domains: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT domain) FROM verification_attempts
         WHERE timestamp >= ?1 AND domain IS NOT NULL",
        params![cutoff],
        |row| row.get(0),
    )?;

    let distinct_ips: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT ip_address) FROM verification_attempts
         WHERE timestamp >= ?1 AND ip_address IS NOT NULL",
        params![cutoff],
        |row| row.get(0),
    )?;

    Ok(AttemptStats {
        window_hours,
        total,
        success,
        failed,
        error,
        distinct_domains,
        distinct_ips,
    })
}

/// Abuse-detection signal: caller IPs with at least `min_attempts`
/// unsuccessful attempts in the window, worst offenders first.
pub fn suspicious_ips(
    conn: &Connection,
    window_hours: i64,
    min_attempts: i64,
) -> Result<Vec<SuspiciousIp>> {
    let cutoff = now() - window_hours * 3600;

    let mut stmt = conn.prepare(
        "SELECT ip_address, COUNT(*), MIN(timestamp), MAX(timestamp)
         FROM verification_attempts
         WHERE timestamp >= ?1 AND status != 'success' AND ip_address IS NOT NULL
         GROUP BY ip_address
         HAVING COUNT(*) >= ?2
         ORDER BY COUNT(*) DESC",
    )?;

    let ips = stmt
        .query_map(params![cutoff, min_attempts], |row| {
            Ok(SuspiciousIp {
                ip_address: row.get(0)?,
                failed_attempts: row.get(1)?,
                first_seen: row.get(2)?,
                last_seen: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(ips)
}

/// Unsuccessful attempts for one code hash inside a trailing window. This is
/// a heuristic count, not a strict counter; see DESIGN.md.
pub fn failed_count_for_code(conn: &Connection, code_hash: &str, window_secs: i64) -> Result<i64> {
    let cutoff = now() - window_secs;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM verification_attempts
         WHERE code_hash = ?1 AND timestamp >= ?2 AND status != 'success'",
        params![code_hash, cutoff],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Retention cleanup: delete attempts older than `retention_days`.
/// 0 means never purge.
pub fn purge_attempts(conn: &Connection, retention_days: i64) -> Result<usize> {
    if retention_days <= 0 {
        return Ok(0);
    }
    let cutoff = now() - retention_days * 86400;
    let deleted = conn.execute(
        "DELETE FROM verification_attempts WHERE timestamp < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Validation helpers ============

/// Expiry sanity check used at issuance time: a set expiry must not be in
/// the past relative to creation.
pub fn validate_expiry(license_expires_at: Option<i64>, created_at: i64) -> Result<()> {
    if let Some(expires_at) = license_expires_at
        && expires_at < created_at
    {
        return Err(AppError::BadRequest(
            "license_expires_at must not be before creation time".into(),
        ));
    }
    Ok(())
}
