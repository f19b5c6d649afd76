use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Which path confirmed (or refused) a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerificationSource {
    /// Authoritative local store, normalized purchase-code path
    Database,
    /// Local store, raw license-key path
    DatabaseRaw,
    /// Remote marketplace fallback
    Remote,
}

/// Three-way attempt classification: `Failed` means the code was simply
/// wrong, `Error` means something broke while checking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failed,
    Error,
}

/// One verification or activation call, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationAttempt {
    pub id: String,
    pub timestamp: i64,
    /// SHA-256 of the canonical code; the raw code is never stored
    pub code_hash: String,
    pub domain: Option<String>,
    pub outcome: bool,
    pub status: AttemptStatus,
    pub message: String,
    pub source: VerificationSource,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub error_detail: Option<String>,
}

/// Input for one audit record. `status` is derived at write time.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub code_hash: String,
    pub domain: Option<String>,
    pub outcome: bool,
    pub message: String,
    pub source: VerificationSource,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub error_detail: Option<String>,
}

/// Attempt statistics over a trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptStats {
    pub window_hours: i64,
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub error: i64,
    pub distinct_domains: i64,
    pub distinct_ips: i64,
}

/// A caller IP flagged by the abuse-detection query.
#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousIp {
    pub ip_address: String,
    pub failed_attempts: i64,
    pub first_seen: i64,
    pub last_seen: i64,
}

#[derive(Debug, Deserialize)]
pub struct AttemptQuery {
    #[serde(default)]
    pub code_hash: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub status: Option<AttemptStatus>,
    #[serde(default)]
    pub from_timestamp: Option<i64>,
    #[serde(default)]
    pub to_timestamp: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl AttemptQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
