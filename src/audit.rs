//! Verification audit log.
//!
//! Every verification and activation call produces one append-only attempt
//! record in a dedicated database. The logger is an injected dependency of
//! the components that write to it, never a process-wide static, so tests
//! can hand components a throwaway instance.
//!
//! Writes are best-effort: a broken audit store degrades to a process log
//! line and never changes the caller-visible result.

use sha2::{Digest, Sha256};

use crate::db::{DbPool, queries};
use crate::error::Result;
use crate::models::{
    AttemptQuery, AttemptStats, AttemptStatus, NewAttempt, SuspiciousIp, VerificationAttempt,
};

/// Hash a code for audit storage. The raw code never reaches the log.
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"keygate-code-v1:");
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct AuditLogger {
    pool: DbPool,
    enabled: bool,
}

impl AuditLogger {
    pub fn new(pool: DbPool, enabled: bool) -> Self {
        Self { pool, enabled }
    }

    /// Classify and append one attempt. Never fails the caller: storage
    /// errors are reported via `tracing` and swallowed.
    pub fn record(&self, attempt: NewAttempt) {
        if !self.enabled {
            return;
        }
        let status = classify(&attempt);
        if let Err(err) = self.try_record(&attempt, status) {
            tracing::warn!(
                code_hash = %attempt.code_hash,
                "failed to write verification attempt: {}",
                err
            );
        }
    }

    fn try_record(
        &self,
        attempt: &NewAttempt,
        status: AttemptStatus,
    ) -> Result<VerificationAttempt> {
        let conn = self.pool.get()?;
        queries::create_attempt(&conn, attempt, status)
    }

    /// Attempt statistics over a trailing window.
    pub fn stats(&self, window_hours: i64) -> Result<AttemptStats> {
        let conn = self.pool.get()?;
        queries::attempt_stats(&conn, window_hours)
    }

    /// IPs with `min_attempts`+ unsuccessful attempts in the window.
    pub fn suspicious_ips(&self, window_hours: i64, min_attempts: i64) -> Result<Vec<SuspiciousIp>> {
        let conn = self.pool.get()?;
        queries::suspicious_ips(&conn, window_hours, min_attempts)
    }

    pub fn query(&self, query: &AttemptQuery) -> Result<(Vec<VerificationAttempt>, i64)> {
        let conn = self.pool.get()?;
        queries::query_attempts(&conn, query)
    }

    /// Trailing-window failed-attempt count for one code hash. Fails open:
    /// an unreadable audit store reports zero rather than blocking
    /// verification.
    pub fn failed_count_for_code(&self, code_hash: &str, window_secs: i64) -> i64 {
        let result = self
            .pool
            .get()
            .map_err(crate::error::AppError::from)
            .and_then(|conn| queries::failed_count_for_code(&conn, code_hash, window_secs));
        match result {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!("failed to read attempt count: {}", err);
                0
            }
        }
    }

    /// Delete attempts older than the retention window. 0 = keep forever.
    pub fn purge(&self, retention_days: i64) -> Result<usize> {
        let conn = self.pool.get()?;
        queries::purge_attempts(&conn, retention_days)
    }
}

/// Three-way classification: success, failed (code simply wrong), or error
/// (something broke while checking).
fn classify(attempt: &NewAttempt) -> AttemptStatus {
    if attempt.outcome {
        AttemptStatus::Success
    } else if attempt.error_detail.is_some() {
        AttemptStatus::Error
    } else {
        AttemptStatus::Failed
    }
}
