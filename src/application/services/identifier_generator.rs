//! Deterministic short code minting with bounded collision retry.

use metrics::counter;
use tracing::{debug, warn};

use crate::domain::entities::{MappingField, UrlMapping};
use crate::domain::repositories::UrlRepository;
use crate::error::AppError;
use crate::utils::code_generator::derive_code;

/// Highest retry counter tried before giving up.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Mints and persists short codes for canonical URLs.
///
/// The code for a URL at a given retry count is always the same, so two
/// processes minting the same URL race on the same insert and the store's
/// uniqueness constraint decides the winner.
#[derive(Clone)]
pub struct IdentifierGenerator {
    secret: Vec<u8>,
}

impl IdentifierGenerator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Code for `original_url` at `retry_count`.
    pub fn derive(&self, original_url: &str, retry_count: u32) -> Result<String, AppError> {
        derive_code(&self.secret, original_url, retry_count)
    }

    /// Inserts a new mapping for `original_url`.
    ///
    /// Tries retry counts `0..=MAX_RETRY_COUNT` in order, moving on only when
    /// the derived code is already taken by another URL.
    ///
    /// # Errors
    ///
    /// - [`AppError::DuplicateKey`] with [`MappingField::OriginalUrl`] when a
    ///   concurrent mint of the same URL already inserted it
    /// - [`AppError::GenerationExhausted`] when every derived code is taken
    /// - Any other store error unchanged
    pub async fn persist_new(
        &self,
        repo: &dyn UrlRepository,
        original_url: &str,
    ) -> Result<UrlMapping, AppError> {
        for retry_count in 0..=MAX_RETRY_COUNT {
            let code = self.derive(original_url, retry_count)?;

            match repo.create(original_url, &code).await {
                Ok(mapping) => {
                    debug!(retry_count, short_code = %code, "Minted short code");
                    return Ok(mapping);
                }
                Err(AppError::DuplicateKey {
                    field: MappingField::ShortCode,
                }) => {
                    counter!("code_collisions_total").increment(1);
                    warn!(retry_count, short_code = %code, "Short code collision");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::GenerationExhausted {
            attempts: MAX_RETRY_COUNT + 1,
        })
    }
}
