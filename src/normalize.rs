//! Code cleaning for the two lookup paths.
//!
//! Purchase codes come from the marketplace in whatever shape the buyer pasted
//! them (mixed case, stray hyphens, copied whitespace) and are normalized
//! aggressively before lookup. License keys are issued by this system and are
//! compared verbatim, so that path only trims. The two paths are deliberately
//! separate entry points.

use crate::error::Denial;

/// Normalized purchase codes must land inside these bounds. Marketplace codes
/// and system-issued keys differ in shape, so the bounds are loose.
const MIN_CANONICAL_LEN: usize = 8;
const MAX_CANONICAL_LEN: usize = 50;

/// A purchase code accepted by [`normalize_purchase_code`].
///
/// `raw` is the trimmed input exactly as presented — the marketplace expects
/// the code in its original shape. `canonical` is the stripped, lowercased
/// form used for local lookups and attempt hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseCode {
    raw: String,
    canonical: String,
}

impl PurchaseCode {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

/// Normalize a raw purchase-code string.
///
/// Rejects anything outside alphanumerics, `-`, `_` and internal whitespace
/// before touching it (these strings end up in queries and HTTP calls), then
/// strips delimiters, lowercases, and enforces length bounds. Pure function,
/// idempotent: normalizing an already-canonical code is a no-op.
pub fn normalize_purchase_code(input: &str) -> Result<PurchaseCode, Denial> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Denial::InvalidFormat("code is empty".into()));
    }

    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_' || *c == ' ' || *c == '\t'))
    {
        return Err(Denial::InvalidFormat(format!(
            "unexpected character {:?}",
            bad
        )));
    }

    let canonical: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if canonical.len() < MIN_CANONICAL_LEN {
        return Err(Denial::InvalidFormat(format!(
            "code too short ({} characters after normalization)",
            canonical.len()
        )));
    }
    if canonical.len() > MAX_CANONICAL_LEN {
        return Err(Denial::InvalidFormat(format!(
            "code too long ({} characters after normalization)",
            canonical.len()
        )));
    }

    Ok(PurchaseCode {
        raw: trimmed.to_string(),
        canonical,
    })
}

/// Clean a raw license key for exact lookup.
///
/// Trims surrounding whitespace only. Case and internal format are preserved:
/// system-issued keys are compared verbatim.
pub fn clean_license_key(input: &str) -> Result<String, Denial> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Denial::InvalidFormat("license key is empty".into()));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(Denial::InvalidFormat(
            "license key contains control characters".into(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Normalize a hostname for domain activation: trim, drop one trailing dot,
/// lowercase. Validation happens separately in the activation manager.
pub fn normalize_domain(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('.');
    trimmed.to_ascii_lowercase()
}

/// Syntactic hostname check for activation domains.
///
/// Accepts dotted labels of letters, digits and hyphens (no leading/trailing
/// hyphen, label ≤ 63 chars, total ≤ 253). Schemes, ports, paths and empty
/// labels are rejected.
pub fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_delimiters_and_lowercases() {
        let code = normalize_purchase_code("  86AB-1234-CDEF-9876  ").unwrap();
        assert_eq!(code.canonical(), "86ab1234cdef9876");
        assert_eq!(code.raw(), "86AB-1234-CDEF-9876");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_purchase_code("AB-12_cd 34EF99").unwrap();
        let twice = normalize_purchase_code(once.canonical()).unwrap();
        assert_eq!(once.canonical(), twice.canonical());
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(matches!(
            normalize_purchase_code("   "),
            Err(Denial::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_normalize_rejects_injection_characters() {
        assert!(normalize_purchase_code("abc'; DROP TABLE licenses;--").is_err());
        assert!(normalize_purchase_code("abcd1234?x=1").is_err());
    }

    #[test]
    fn test_normalize_enforces_length_bounds() {
        assert!(normalize_purchase_code("ab12").is_err());
        let long = "a1".repeat(30);
        assert!(normalize_purchase_code(&long).is_err());
    }

    #[test]
    fn test_clean_license_key_preserves_case_and_format() {
        let key = clean_license_key("  KG-Abc123-XYZ  ").unwrap();
        assert_eq!(key, "KG-Abc123-XYZ");
    }

    #[test]
    fn test_clean_license_key_rejects_control_chars() {
        assert!(clean_license_key("KG-abc\n123").is_err());
        assert!(clean_license_key("").is_err());
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("  Example.COM.  "), "example.com");
    }

    #[test]
    fn test_hostname_validation() {
        assert!(is_valid_hostname("example.com"));
        assert!(is_valid_hostname("sub.domain.example.co.uk"));
        assert!(is_valid_hostname("localhost"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("http://example.com"));
        assert!(!is_valid_hostname("example.com/path"));
        assert!(!is_valid_hostname("exa mple.com"));
        assert!(!is_valid_hostname("-bad.example.com"));
        assert!(!is_valid_hostname("example..com"));
    }
}
