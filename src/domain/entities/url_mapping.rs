//! Url mapping entity: the single durable record of the service.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// A persisted original URL ↔ short code pair.
///
/// Both columns are unique across all mappings. A mapping only changes through
/// an explicit rename of one of its two fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlMapping {
    pub original_url: String,
    pub short_code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UrlMapping {
    /// Creates a mapping stamped with the current time.
    pub fn new(original_url: impl Into<String>, short_code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            original_url: original_url.into(),
            short_code: short_code.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the value paired with the key that was looked up in `direction`.
    pub fn counterpart(&self, direction: Direction) -> &str {
        match direction {
            Direction::Original => &self.short_code,
            Direction::Short => &self.original_url,
        }
    }
}

/// Which side of a mapping a lookup starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Keyed by the original URL, yields the short code.
    Original,
    /// Keyed by the short code, yields the original URL.
    Short,
}

impl Direction {
    /// Prefix of the shared-cache key for this direction.
    pub fn key_prefix(self) -> &'static str {
        match self {
            Direction::Original => "original:",
            Direction::Short => "short:",
        }
    }

    pub fn cache_key(self, key: &str) -> String {
        format!("{}{}", self.key_prefix(), key)
    }
}

/// One of the two unique columns of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingField {
    OriginalUrl,
    ShortCode,
}

impl MappingField {
    pub fn as_str(self) -> &'static str {
        match self {
            MappingField::OriginalUrl => "original_url",
            MappingField::ShortCode => "short_code",
        }
    }
}

impl fmt::Display for MappingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the mapping a rename or delete applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingSelector {
    Original(String),
    Short(String),
    /// Matches a mapping whose original URL or short code equals the value.
    Either(String),
}

/// Result of a successful rename: the mapping before and after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedMapping {
    pub previous: UrlMapping,
    pub current: UrlMapping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterpart() {
        let mapping = UrlMapping::new("https://example.com", "abc1234");

        assert_eq!(mapping.counterpart(Direction::Original), "abc1234");
        assert_eq!(mapping.counterpart(Direction::Short), "https://example.com");
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(
            Direction::Original.cache_key("https://example.com"),
            "original:https://example.com"
        );
        assert_eq!(Direction::Short.cache_key("abc1234"), "short:abc1234");
    }

    #[test]
    fn test_new_mapping_timestamps_match() {
        let mapping = UrlMapping::new("https://rust-lang.org", "xyz7890");
        assert_eq!(mapping.created_at, mapping.updated_at);
    }
}
