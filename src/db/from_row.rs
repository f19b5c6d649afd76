//! Row-mapping helpers shared by the query layer.
//!
//! Each model declares its column list once; `query_one`/`query_all` run a
//! statement and map rows through [`FromRow`].

use rusqlite::{Connection, Params, Row};

use crate::error::Result;
use crate::models::*;

pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

pub const USER_COLS: &str = "id, email, name, created_at";

pub const PRODUCT_COLS: &str = "id, name, marketplace_item_id, license_days, support_days, \
     max_domains, stock, price_cents, created_at, updated_at";

pub const LICENSE_COLS: &str = "id, license_key, purchase_code, user_id, product_id, status, \
     license_expires_at, support_expires_at, max_domains, created_at, updated_at";

pub const DOMAIN_COLS: &str = "id, license_id, domain, activated_at";

pub const INVOICE_COLS: &str = "id, license_id, user_id, product_id, amount_cents, status, created_at";

pub const ATTEMPT_COLS: &str = "id, timestamp, code_hash, domain, outcome, status, message, \
     source, ip_address, user_agent, error_detail";

impl FromRow for User {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            marketplace_item_id: row.get(2)?,
            license_days: row.get(3)?,
            support_days: row.get(4)?,
            max_domains: row.get(5)?,
            stock: row.get(6)?,
            price_cents: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            license_key: row.get(1)?,
            purchase_code: row.get(2)?,
            user_id: row.get(3)?,
            product_id: row.get(4)?,
            status: row.get::<_, String>(5)?.parse().unwrap(),
            license_expires_at: row.get(6)?,
            support_expires_at: row.get(7)?,
            max_domains: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for ActivatedDomain {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ActivatedDomain {
            id: row.get(0)?,
            license_id: row.get(1)?,
            domain: row.get(2)?,
            activated_at: row.get(3)?,
        })
    }
}

impl FromRow for Invoice {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Invoice {
            id: row.get(0)?,
            license_id: row.get(1)?,
            user_id: row.get(2)?,
            product_id: row.get(3)?,
            amount_cents: row.get(4)?,
            status: row.get::<_, String>(5)?.parse().unwrap(),
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for VerificationAttempt {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(VerificationAttempt {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            code_hash: row.get(2)?,
            domain: row.get(3)?,
            outcome: row.get(4)?,
            status: row.get::<_, String>(5)?.parse().unwrap(),
            message: row.get(6)?,
            source: row.get::<_, String>(7)?.parse().unwrap(),
            ip_address: row.get(8)?,
            user_agent: row.get(9)?,
            error_detail: row.get(10)?,
        })
    }
}

pub fn query_one<T: FromRow, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query_map(params, |row| T::from_row(row))?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn query_all<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| T::from_row(row))?;
    Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
}
