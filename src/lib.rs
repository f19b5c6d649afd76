pub mod activation;
pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod marketplace;
pub mod middleware;
pub mod models;
pub mod normalize;
pub mod notify;
pub mod registration;
pub mod util;
pub mod verifier;

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::activation::ActivationManager;
use crate::audit::AuditLogger;
use crate::config::Config;
use crate::db::AppState;
use crate::error::Result;
use crate::marketplace::MarketplaceClient;
use crate::notify::{LicenseEvent, Notifier};
use crate::registration::Registrar;
use crate::verifier::{AttemptBudget, Verifier, VerifyCache};

/// Open both databases, create schemas, and wire the core components.
///
/// Returns the shared state plus the receiving end of the notification
/// channel for the caller to drain.
pub fn build_state(config: &Config) -> Result<(AppState, UnboundedReceiver<LicenseEvent>)> {
    let db = db::open_pool(&config.database_path, 8)?;
    let audit_pool = db::open_pool(&config.audit_database_path, 4)?;
    {
        let conn = db.get()?;
        db::init_db(&conn)?;
    }
    {
        let conn = audit_pool.get()?;
        db::init_audit_db(&conn)?;
    }

    let audit = AuditLogger::new(audit_pool, config.audit_log_enabled);
    let marketplace = MarketplaceClient::new(
        &config.marketplace_base_url,
        &config.marketplace_token,
        Duration::from_secs(config.marketplace_timeout_secs),
    );
    let cache = VerifyCache::new(config.verify_cache_ttl_secs);
    let (notifier, events) = Notifier::new();

    let verifier = Verifier::new(
        db.clone(),
        marketplace,
        audit.clone(),
        cache,
        notifier.clone(),
        AttemptBudget {
            max_failed: config.attempt_budget,
            window_secs: config.attempt_window_secs,
        },
    );
    let activation = ActivationManager::new(db.clone(), audit.clone());
    let registrar = Registrar::new(db.clone(), verifier.clone(), notifier.clone());

    let state = AppState {
        db,
        audit,
        verifier,
        activation,
        registrar,
        notifier,
        admin_api_key: config.admin_api_key.clone(),
    };

    Ok((state, events))
}
