//! Cache mutation events published on every shared-cache write.

use serde::{Deserialize, Serialize};

/// A mutation of the shared cache, as published on the `cache-updates` channel
/// and pushed verbatim to every connected client.
///
/// # Wire format
///
/// ```json
/// {"type":"url_updated","originalUrl":"https://example.com","shortCode":"abc1234"}
/// {"type":"url_updated","originalUrl":"https://example.com","oldShortCode":"abc1234","newShortCode":"promo01"}
/// {"type":"url_deleted","originalUrl":"https://example.com","shortCode":"abc1234"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    UrlUpdated(UrlUpdate),
    #[serde(rename_all = "camelCase")]
    UrlDeleted {
        original_url: String,
        short_code: String,
    },
}

/// Payload of a `url_updated` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlUpdate {
    #[serde(rename_all = "camelCase")]
    Renamed {
        original_url: String,
        old_short_code: String,
        new_short_code: String,
    },
    #[serde(rename_all = "camelCase")]
    Set {
        original_url: String,
        short_code: String,
    },
}

impl CacheEvent {
    pub fn set(original_url: impl Into<String>, short_code: impl Into<String>) -> Self {
        CacheEvent::UrlUpdated(UrlUpdate::Set {
            original_url: original_url.into(),
            short_code: short_code.into(),
        })
    }

    pub fn renamed(
        original_url: impl Into<String>,
        old_short_code: impl Into<String>,
        new_short_code: impl Into<String>,
    ) -> Self {
        CacheEvent::UrlUpdated(UrlUpdate::Renamed {
            original_url: original_url.into(),
            old_short_code: old_short_code.into(),
            new_short_code: new_short_code.into(),
        })
    }

    pub fn deleted(original_url: impl Into<String>, short_code: impl Into<String>) -> Self {
        CacheEvent::UrlDeleted {
            original_url: original_url.into(),
            short_code: short_code.into(),
        }
    }

    /// Event type name as it appears in the `type` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::UrlUpdated(_) => "url_updated",
            CacheEvent::UrlDeleted { .. } => "url_deleted",
        }
    }

    pub fn original_url(&self) -> &str {
        match self {
            CacheEvent::UrlUpdated(UrlUpdate::Set { original_url, .. })
            | CacheEvent::UrlUpdated(UrlUpdate::Renamed { original_url, .. })
            | CacheEvent::UrlDeleted { original_url, .. } => original_url,
        }
    }
}
