//! URL canonicalization.
//!
//! Every original URL is stored in one canonical, protocol-qualified form so
//! that the uniqueness constraint and both cache keys agree on identity.

use serde_json::json;
use url::Url;

use crate::error::AppError;

/// Errors that can occur during URL canonicalization.
#[derive(Debug, thiserror::Error)]
pub enum UrlNormalizationError {
    #[error("URL must not be empty")]
    Empty,

    #[error("Invalid URL format: {0}")]
    InvalidFormat(String),

    #[error("Only HTTP and HTTPS protocols are allowed")]
    UnsupportedProtocol,

    #[error("URL must have a host")]
    MissingHost,

    #[error("Failed to normalize URL: {0}")]
    NormalizationFailed(String),
}

impl From<UrlNormalizationError> for AppError {
    fn from(e: UrlNormalizationError) -> Self {
        AppError::bad_request("Invalid URL format", json!({ "reason": e.to_string() }))
    }
}

/// Canonicalizes a user-supplied URL.
///
/// # Rules
///
/// 1. **Protocol**: `https://` is prepended when no scheme is present; only
///    HTTP and HTTPS are accepted
/// 2. **Hostname**: lowercased
/// 3. **Default ports**: removed (80 for HTTP, 443 for HTTPS)
/// 4. **Fragments**: removed
/// 5. **Bare root**: `https://example.com/` is written `https://example.com`
/// 6. **Path and query**: preserved as-is
///
/// # Examples
///
/// ```ignore
/// assert_eq!(canonicalize_url("example.com").unwrap(), "https://example.com");
/// assert_eq!(
///     canonicalize_url("HTTP://Example.COM:80/a#top").unwrap(),
///     "http://example.com/a"
/// );
/// ```
pub fn canonicalize_url(input: &str) -> Result<String, UrlNormalizationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlNormalizationError::Empty);
    }

    let qualified = if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let mut url =
        Url::parse(&qualified).map_err(|e| UrlNormalizationError::InvalidFormat(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        _ => return Err(UrlNormalizationError::UnsupportedProtocol),
    }

    let host = url
        .host_str()
        .ok_or(UrlNormalizationError::MissingHost)?
        .to_ascii_lowercase();
    url.set_host(Some(&host)).map_err(|_| {
        UrlNormalizationError::NormalizationFailed("Failed to set normalized host".to_string())
    })?;

    url.set_fragment(None);

    let is_default_port = matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        url.set_port(None).map_err(|_| {
            UrlNormalizationError::NormalizationFailed("Failed to remove default port".to_string())
        })?;
    }

    let mut out = url.to_string();
    if url.path() == "/" && url.query().is_none() && out.ends_with('/') {
        out.pop();
    }

    Ok(out)
}

/// Adds `https://` to a stored URL that lacks a protocol, for redirects.
pub fn ensure_protocol(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

fn has_scheme(input: &str) -> bool {
    match input.find("://") {
        Some(pos) => input[..pos]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'),
        None => {
            let lower = input.to_ascii_lowercase();
            ["javascript:", "data:", "mailto:", "file:"]
                .iter()
                .any(|scheme| lower.starts_with(scheme))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_domain_gets_https() {
        assert_eq!(canonicalize_url("example.com").unwrap(), "https://example.com");
    }

    #[test]
    fn test_http_is_preserved() {
        assert_eq!(
            canonicalize_url("http://example.com").unwrap(),
            "http://example.com"
        );
    }

    #[test]
    fn test_uppercase_host() {
        assert_eq!(
            canonicalize_url("https://EXAMPLE.COM/Path").unwrap(),
            "https://example.com/Path"
        );
    }

    #[test]
    fn test_default_ports_removed() {
        assert_eq!(
            canonicalize_url("https://example.com:443/path").unwrap(),
            "https://example.com/path"
        );
        assert_eq!(
            canonicalize_url("http://example.com:80").unwrap(),
            "http://example.com"
        );
    }

    #[test]
    fn test_custom_port_kept() {
        assert_eq!(
            canonicalize_url("https://example.com:8443/x").unwrap(),
            "https://example.com:8443/x"
        );
    }

    #[test]
    fn test_fragment_removed() {
        assert_eq!(
            canonicalize_url("https://example.com/page#section").unwrap(),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_query_kept_on_root() {
        assert_eq!(
            canonicalize_url("https://example.com/?q=1").unwrap(),
            "https://example.com/?q=1"
        );
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(
            canonicalize_url("  example.com/a  ").unwrap(),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            canonicalize_url("   "),
            Err(UrlNormalizationError::Empty)
        ));
    }

    #[test]
    fn test_rejects_dangerous_schemes() {
        assert!(canonicalize_url("javascript:alert(1)").is_err());
        assert!(canonicalize_url("ftp://example.com").is_err());
        assert!(canonicalize_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_ensure_protocol() {
        assert_eq!(ensure_protocol("example.com"), "https://example.com");
        assert_eq!(ensure_protocol("http://example.com"), "http://example.com");
        assert_eq!(ensure_protocol("https://example.com"), "https://example.com");
    }
}
