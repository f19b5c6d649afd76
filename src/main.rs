use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use keygate::audit::AuditLogger;
use keygate::config::Config;
use keygate::db;
use keygate::handlers;
use keygate::models::CreateLicense;
use keygate::normalize::normalize_purchase_code;
use keygate::notify;
use keygate::util::LicenseTerms;

#[derive(Parser)]
#[command(name = "keygate", about = "License verification and domain activation service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Delete verification attempts older than the retention window
    PurgeAttempts {
        /// Override AUDIT_RETENTION_DAYS
        #[arg(long)]
        days: Option<i64>,
    },
    /// Issue a license directly from the command line
    Issue {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        product_id: String,
        /// Marketplace code to bind (synthetic if omitted)
        #[arg(long)]
        purchase_code: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("keygate=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::PurgeAttempts { days } => purge_attempts(&config, days),
        Command::Issue {
            user_id,
            product_id,
            purchase_code,
        } => issue(&config, &user_id, &product_id, purchase_code.as_deref()),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let (state, events) = keygate::build_state(&config)?;
    tokio::spawn(notify::drain_events(events));

    if config.admin_api_key.is_none() {
        tracing::warn!("ADMIN_API_KEY not set; /admin routes are disabled");
    }

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_second)
            .burst_size(config.rate_limit_burst)
            .finish()
            .context("invalid rate limit configuration")?,
    );

    let app = handlers::app(state)
        .layer(GovernorLayer::new(governor_conf))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("keygate listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn purge_attempts(config: &Config, days: Option<i64>) -> anyhow::Result<()> {
    let pool = db::open_pool(&config.audit_database_path, 1)?;
    {
        let conn = pool.get()?;
        db::init_audit_db(&conn)?;
    }
    let retention_days = days.unwrap_or(config.audit_retention_days);
    let purged = AuditLogger::new(pool, true).purge(retention_days)?;
    println!("purged {} attempts older than {} days", purged, retention_days);
    Ok(())
}

fn issue(
    config: &Config,
    user_id: &str,
    product_id: &str,
    purchase_code: Option<&str>,
) -> anyhow::Result<()> {
    let pool = db::open_pool(&config.database_path, 1)?;
    let conn = pool.get()?;
    db::init_db(&conn)?;

    let product = db::queries::get_product_by_id(&conn, product_id)?
        .context("product not found")?;
    db::queries::get_user_by_id(&conn, user_id)?
        .context("user not found")?;

    let purchase_code = match purchase_code {
        Some(raw) => normalize_purchase_code(raw)
            .map_err(|denial| anyhow::anyhow!(denial.message()))?
            .canonical()
            .to_string(),
        None => uuid::Uuid::new_v4().simple().to_string(),
    };

    let now = chrono::Utc::now().timestamp();
    let terms = LicenseTerms::from_product(&product, now);
    let license = db::queries::create_license(
        &conn,
        &CreateLicense {
            purchase_code,
            user_id: user_id.to_string(),
            product_id: product.id.clone(),
            license_expires_at: terms.license_expires_at,
            support_expires_at: terms.support_expires_at,
            max_domains: product.max_domains,
        },
    )?;

    println!("{}", license.license_key);
    Ok(())
}
