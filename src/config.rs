use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub audit_database_path: String,
    /// Base URL of the remote marketplace API
    pub marketplace_base_url: String,
    pub marketplace_token: String,
    /// Bound on the marketplace verification call
    pub marketplace_timeout_secs: u64,
    /// TTL for cached positive marketplace lookups (0 = no caching)
    pub verify_cache_ttl_secs: i64,
    /// Failed attempts per code before verification is refused (0 = no limit)
    pub attempt_budget: i64,
    pub attempt_window_secs: i64,
    /// Enable/disable audit logging entirely
    pub audit_log_enabled: bool,
    /// Days to retain verification attempts before purging (0 = never purge)
    pub audit_retention_days: i64,
    /// Bearer token for /admin routes (None = admin surface disabled)
    pub admin_api_key: Option<String>,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("KEYGATE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let audit_log_enabled = env::var("AUDIT_LOG_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "keygate.db".to_string()),
            audit_database_path: env::var("AUDIT_DATABASE_PATH")
                .unwrap_or_else(|_| "keygate_audit.db".to_string()),
            marketplace_base_url: env::var("MARKETPLACE_BASE_URL")
                .unwrap_or_else(|_| "https://api.marketplace.example".to_string()),
            marketplace_token: env::var("MARKETPLACE_TOKEN").unwrap_or_default(),
            marketplace_timeout_secs: env::var("MARKETPLACE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            verify_cache_ttl_secs: env::var("VERIFY_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            attempt_budget: env::var("ATTEMPT_BUDGET")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            attempt_window_secs: env::var("ATTEMPT_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            audit_log_enabled,
            audit_retention_days: env::var("AUDIT_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),
            admin_api_key: env::var("ADMIN_API_KEY").ok().filter(|k| !k.is_empty()),
            rate_limit_per_second: env::var("RATE_LIMIT_PER_SECOND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            rate_limit_burst: env::var("RATE_LIMIT_BURST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
