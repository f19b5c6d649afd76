pub mod from_row;
pub mod queries;

use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::activation::ActivationManager;
use crate::audit::AuditLogger;
use crate::error::Result;
use crate::notify::Notifier;
use crate::registration::Registrar;
use crate::verifier::Verifier;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

/// Shared application state: the license store pool plus the constructed
/// core components. Everything is cheaply cloneable (pools and channels).
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub audit: AuditLogger,
    pub verifier: Verifier,
    pub activation: ActivationManager,
    pub registrar: Registrar,
    pub notifier: Notifier,
    /// Bearer token required on /admin routes (None = admin surface disabled)
    pub admin_api_key: Option<String>,
}

/// Open a pooled connection to a SQLite database file.
///
/// WAL + busy_timeout so concurrent activation transactions queue instead of
/// failing, foreign keys enforced on every connection.
pub fn open_pool(path: &str, max_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    });
    let pool = r2d2::Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(crate::error::AppError::from)?;
    Ok(pool)
}

/// Create the license store schema.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            marketplace_item_id TEXT,
            license_days INTEGER,
            support_days INTEGER,
            max_domains INTEGER NOT NULL DEFAULT 1,
            stock INTEGER,
            price_cents INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            license_key TEXT NOT NULL UNIQUE,
            purchase_code TEXT NOT NULL,
            user_id TEXT NOT NULL REFERENCES users(id),
            product_id TEXT NOT NULL REFERENCES products(id),
            status TEXT NOT NULL DEFAULT 'active',
            license_expires_at INTEGER,
            support_expires_at INTEGER,
            max_domains INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (purchase_code, user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_purchase_code ON licenses(purchase_code);
        CREATE INDEX IF NOT EXISTS idx_licenses_user ON licenses(user_id);

        CREATE TABLE IF NOT EXISTS license_domains (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            domain TEXT NOT NULL,
            activated_at INTEGER NOT NULL,
            UNIQUE (license_id, domain)
        );
        CREATE INDEX IF NOT EXISTS idx_domains_license ON license_domains(license_id);

        CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            user_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_invoices_license ON invoices(license_id);",
    )?;
    Ok(())
}

/// Create the audit schema. Lives in its own database file so attempt volume
/// never contends with the license store.
pub fn init_audit_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS verification_attempts (
            id TEXT PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            code_hash TEXT NOT NULL,
            domain TEXT,
            outcome INTEGER NOT NULL,
            status TEXT NOT NULL,
            message TEXT NOT NULL,
            source TEXT NOT NULL,
            ip_address TEXT,
            user_agent TEXT,
            error_detail TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_attempts_timestamp ON verification_attempts(timestamp);
        CREATE INDEX IF NOT EXISTS idx_attempts_code_hash ON verification_attempts(code_hash);
        CREATE INDEX IF NOT EXISTS idx_attempts_ip ON verification_attempts(ip_address);",
    )?;
    Ok(())
}
