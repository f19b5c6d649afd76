//! Shared helpers for integration tests: file-backed throwaway databases,
//! fixture builders, and stub marketplace servers.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use chrono::Utc;
use rusqlite::params;
use tempfile::TempDir;

use keygate::activation::ActivationManager;
use keygate::audit::AuditLogger;
use keygate::db::{self, AppState, queries};
use keygate::marketplace::MarketplaceClient;
use keygate::models::{CreateLicense, CreateProduct, CreateUser, License, Product, User};
use keygate::notify::Notifier;
use keygate::registration::Registrar;
use keygate::verifier::{AttemptBudget, Verifier, VerifyCache};

pub const TEST_ADMIN_KEY: &str = "test-admin-key";

pub struct TestEnv {
    pub state: AppState,
    audit_path: std::path::PathBuf,
    // Databases live here; dropped with the env
    _dir: TempDir,
}

impl TestEnv {
    /// Path of the audit database, for tests that sabotage or age it.
    pub fn audit_db_path(&self) -> &std::path::Path {
        &self.audit_path
    }
}

pub struct EnvOptions {
    pub marketplace_base: String,
    pub marketplace_timeout: Duration,
    pub budget: AttemptBudget,
    pub cache_ttl_secs: i64,
    pub audit_enabled: bool,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            // Nothing listens here: local-only tests fail fast on the
            // remote path instead of hanging
            marketplace_base: "http://127.0.0.1:9".to_string(),
            marketplace_timeout: Duration::from_millis(500),
            budget: AttemptBudget {
                max_failed: 0,
                window_secs: 3600,
            },
            cache_ttl_secs: 0,
            audit_enabled: true,
        }
    }
}

pub fn build_env(options: EnvOptions) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("keygate.db");
    let audit_path = dir.path().join("keygate_audit.db");

    let db = db::open_pool(db_path.to_str().unwrap(), 8).unwrap();
    let audit_pool = db::open_pool(audit_path.to_str().unwrap(), 4).unwrap();
    {
        let conn = db.get().unwrap();
        db::init_db(&conn).unwrap();
    }
    {
        let conn = audit_pool.get().unwrap();
        db::init_audit_db(&conn).unwrap();
    }

    let audit = AuditLogger::new(audit_pool, options.audit_enabled);
    let marketplace = MarketplaceClient::new(
        &options.marketplace_base,
        "test-token",
        options.marketplace_timeout,
    );
    let cache = VerifyCache::new(options.cache_ttl_secs);
    let notifier = Notifier::disabled();

    let verifier = Verifier::new(
        db.clone(),
        marketplace,
        audit.clone(),
        cache,
        notifier.clone(),
        options.budget,
    );
    let activation = ActivationManager::new(db.clone(), audit.clone());
    let registrar = Registrar::new(db.clone(), verifier.clone(), notifier.clone());

    TestEnv {
        state: AppState {
            db,
            audit,
            verifier,
            activation,
            registrar,
            notifier,
            admin_api_key: Some(TEST_ADMIN_KEY.to_string()),
        },
        audit_path,
        _dir: dir,
    }
}

pub fn test_env() -> TestEnv {
    build_env(EnvOptions::default())
}

// ============ Fixtures ============

pub fn create_test_user(conn: &rusqlite::Connection, email: &str) -> User {
    queries::create_user(
        conn,
        &CreateUser {
            email: email.to_string(),
            name: "Test User".to_string(),
        },
    )
    .unwrap()
}

pub fn create_test_product(
    conn: &rusqlite::Connection,
    name: &str,
    item_id: Option<&str>,
    max_domains: i64,
) -> Product {
    queries::create_product(
        conn,
        &CreateProduct {
            name: name.to_string(),
            marketplace_item_id: item_id.map(String::from),
            license_days: Some(365),
            support_days: Some(180),
            max_domains,
            stock: None,
            price_cents: 4900,
        },
    )
    .unwrap()
}

pub fn create_test_license(
    conn: &rusqlite::Connection,
    user: &User,
    product: &Product,
    purchase_code: &str,
    license_expires_at: Option<i64>,
) -> License {
    queries::create_license(
        conn,
        &CreateLicense {
            purchase_code: purchase_code.to_string(),
            user_id: user.id.clone(),
            product_id: product.id.clone(),
            license_expires_at,
            support_expires_at: None,
            max_domains: product.max_domains,
        },
    )
    .unwrap()
}

/// Pin a license to a known key for raw-path scenarios.
pub fn set_license_key(conn: &rusqlite::Connection, license_id: &str, key: &str) {
    conn.execute(
        "UPDATE licenses SET license_key = ?1 WHERE id = ?2",
        params![key, license_id],
    )
    .unwrap();
}

pub fn set_license_status(conn: &rusqlite::Connection, license_id: &str, status: &str) {
    conn.execute(
        "UPDATE licenses SET status = ?1 WHERE id = ?2",
        params![status, license_id],
    )
    .unwrap();
}

pub fn future_timestamp(days: i64) -> i64 {
    Utc::now().timestamp() + days * 86400
}

pub fn past_timestamp(days: i64) -> i64 {
    Utc::now().timestamp() - days * 86400
}

// ============ Stub marketplace servers ============

#[derive(Clone)]
struct StubState {
    status: StatusCode,
    body: serde_json::Value,
    hits: Arc<AtomicUsize>,
}

async fn stub_verify(State(state): State<StubState>) -> (StatusCode, axum::Json<serde_json::Value>) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    (state.status, axum::Json(state.body.clone()))
}

/// Spawn a marketplace stub answering every /sales/verify call with a fixed
/// response. Returns the base URL and a hit counter.
pub async fn spawn_marketplace(
    status: StatusCode,
    body: serde_json::Value,
) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/sales/verify", get(stub_verify))
        .with_state(StubState {
            status,
            body,
            hits: hits.clone(),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), hits)
}

/// Standard confirmed-sale body for item `item_id`.
pub fn sale_body(item_id: &str) -> serde_json::Value {
    serde_json::json!({
        "item": { "id": item_id, "name": "Stub Item" },
        "amount_cents": 4900,
        "supported_until": "2031-06-01T00:00:00+00:00",
        "buyer": "stub-buyer"
    })
}

/// Spawn a server that accepts connections and never answers, to exercise
/// the client timeout path.
pub async fn spawn_black_hole() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let _socket = socket;
                tokio::time::sleep(Duration::from_secs(120)).await;
            });
        }
    });
    format!("http://{}", addr)
}
