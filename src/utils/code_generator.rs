//! Short code derivation and validation utilities.
//!
//! Codes are derived deterministically from the original URL and a retry
//! counter, so the same input always yields the same code.

use crate::error::AppError;
use hmac::{Hmac, Mac};
use regex::Regex;
use serde_json::json;
use sha2::Sha256;
use std::sync::LazyLock;

type HmacSha256 = Hmac<Sha256>;

/// Length of a derived short code.
pub const CODE_LENGTH: usize = 7;

/// Characters allowed in short codes supplied by operators (renames, manual adds).
static SHORT_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,32}$").expect("static regex"));

/// Codes that would shadow service routes.
const RESERVED_CODES: &[&str] = &["api", "monitor", "health"];

/// Derives the short code for `original_url` at `retry_count`.
///
/// Computes `HMAC-SHA256(secret, original_url ++ retry_count)`, hex encodes it
/// and keeps the first [`CODE_LENGTH`] characters.
///
/// # Examples
///
/// ```ignore
/// let a = derive_code(b"secret", "https://example.com", 0)?;
/// let b = derive_code(b"secret", "https://example.com", 0)?;
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 7);
/// ```
pub fn derive_code(secret: &[u8], original_url: &str, retry_count: u32) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::internal("Invalid secret key", json!({ "reason": e.to_string() })))?;
    mac.update(original_url.as_bytes());
    mac.update(retry_count.to_string().as_bytes());

    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(digest[..CODE_LENGTH].to_string())
}

/// Validates a short code chosen by an operator.
///
/// # Rules
///
/// - 1-32 characters of `[A-Za-z0-9_-]`
/// - Not a reserved route segment
///
/// # Errors
///
/// Returns [`AppError::Validation`] if a rule is violated.
pub fn validate_short_code(code: &str) -> Result<(), AppError> {
    if !SHORT_CODE_REGEX.is_match(code) {
        return Err(AppError::bad_request(
            "Short code must be 1-32 characters of letters, digits, '-' or '_'",
            json!({ "code": code }),
        ));
    }

    if RESERVED_CODES.contains(&code) {
        return Err(AppError::bad_request(
            "This code is reserved",
            json!({ "code": code }),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_derive_code_is_deterministic() {
        let a = derive_code(b"secret", "https://example.com", 0).unwrap();
        let b = derive_code(b"secret", "https://example.com", 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_code_has_fixed_length() {
        let code = derive_code(b"secret", "https://example.com", 0).unwrap();
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_retry_count_changes_code() {
        let codes: HashSet<String> = (0..4)
            .map(|retry| derive_code(b"secret", "https://example.com", retry).unwrap())
            .collect();
        assert_eq!(codes.len(), 4);
    }

    #[test]
    fn test_secret_changes_code() {
        let a = derive_code(b"one", "https://example.com", 0).unwrap();
        let b = derive_code(b"two", "https://example.com", 0).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_secret_is_accepted() {
        let code = derive_code(b"", "https://example.com", 0).unwrap();
        assert_eq!(code.len(), CODE_LENGTH);
    }

    #[test]
    fn test_validate_accepts_derived_codes() {
        let code = derive_code(b"secret", "https://example.com", 0).unwrap();
        assert!(validate_short_code(&code).is_ok());
    }

    #[test]
    fn test_validate_accepts_custom_codes() {
        assert!(validate_short_code("promo_2025").is_ok());
        assert!(validate_short_code("My-Link").is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_characters() {
        assert!(validate_short_code("has space").is_err());
        assert!(validate_short_code("dot.ted").is_err());
        assert!(validate_short_code("slash/ed").is_err());
        assert!(validate_short_code("").is_err());
    }

    #[test]
    fn test_validate_rejects_too_long() {
        assert!(validate_short_code(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_all_reserved_codes() {
        for &reserved in RESERVED_CODES {
            assert!(
                validate_short_code(reserved).is_err(),
                "Reserved code '{}' should be invalid",
                reserved
            );
        }
    }
}
