//! Resolution and minting of url mappings across the shared cache and the store.

use metrics::counter;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::services::identifier_generator::IdentifierGenerator;
use crate::domain::entities::{
    Direction, MappingField, MappingSelector, RenamedMapping, UrlMapping,
};
use crate::domain::repositories::UrlRepository;
use crate::error::AppError;
use crate::infrastructure::cache::{CacheEntrySnapshot, CacheError, SharedCache, is_managed_key};
use crate::utils::code_generator::validate_short_code;
use crate::utils::url_normalizer::canonicalize_url;

/// Counts reported by [`UrlService::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub total_mappings: i64,
    /// `None` when the shared cache could not be scanned.
    pub cached_keys: Option<usize>,
}

/// Orchestrates cache → store → generator for both lookup directions.
///
/// The store is the source of truth. Shared cache writes happen only after
/// the store succeeded and are best effort: a cache failure is logged and
/// counted, never surfaced.
pub struct UrlService {
    repo: Arc<dyn UrlRepository>,
    cache: Arc<dyn SharedCache>,
    generator: IdentifierGenerator,
}

impl UrlService {
    pub fn new(
        repo: Arc<dyn UrlRepository>,
        cache: Arc<dyn SharedCache>,
        generator: IdentifierGenerator,
    ) -> Self {
        Self {
            repo,
            cache,
            generator,
        }
    }

    pub fn repository(&self) -> &Arc<dyn UrlRepository> {
        &self.repo
    }

    pub fn cache(&self) -> &Arc<dyn SharedCache> {
        &self.cache
    }

    /// Resolves a short code to its original URL.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if no mapping has this code.
    pub async fn resolve(&self, short_code: &str) -> Result<String, AppError> {
        self.read_through(Direction::Short, short_code)
            .await?
            .ok_or_else(|| {
                AppError::not_found("Short URL not found", json!({ "shortCode": short_code }))
            })
    }

    /// Returns the short code for `original_url`, minting one if needed.
    ///
    /// Losing a concurrent mint of the same URL is not an error: the winner's
    /// mapping is read back and returned.
    ///
    /// # Errors
    ///
    /// - [`AppError::Validation`] if the URL cannot be canonicalized
    /// - [`AppError::GenerationExhausted`] if every candidate code is taken
    pub async fn mint(&self, original_url: &str) -> Result<String, AppError> {
        let canonical = canonical(original_url)?;

        if let Some(code) = self.read_through(Direction::Original, &canonical).await? {
            return Ok(code);
        }

        match self.generator.persist_new(self.repo.as_ref(), &canonical).await {
            Ok(mapping) => {
                self.write_through(&mapping.original_url, &mapping.short_code)
                    .await;
                Ok(mapping.short_code)
            }
            Err(AppError::DuplicateKey {
                field: MappingField::OriginalUrl,
            }) => {
                debug!(url = %canonical, "Lost concurrent mint, reading winner");
                self.read_through(Direction::Original, &canonical)
                    .await?
                    .ok_or_else(|| {
                        AppError::internal(
                            "Mapping vanished after concurrent insert",
                            json!({ "url": canonical }),
                        )
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// Stores an explicit pair.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::DuplicateKey`] if either value is taken.
    pub async fn add(&self, original_url: &str, short_code: &str) -> Result<UrlMapping, AppError> {
        let canonical = canonical(original_url)?;
        validate_short_code(short_code)?;

        let mapping = self.repo.create(&canonical, short_code).await?;
        self.write_through(&mapping.original_url, &mapping.short_code)
            .await;

        info!(short_code, url = %mapping.original_url, "Mapping added");
        Ok(mapping)
    }

    /// Replaces the short code of a mapping, keeping its original URL.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if `old_code` does not exist or
    /// `new_code` is already taken.
    pub async fn rename_short(
        &self,
        old_code: &str,
        new_code: &str,
    ) -> Result<RenamedMapping, AppError> {
        validate_short_code(new_code)?;

        let renamed = self
            .repo
            .rename(MappingSelector::Short(old_code.to_string()), new_code)
            .await?
            .ok_or_else(|| {
                AppError::not_found(
                    "Short code not found or new code already in use",
                    json!({ "oldCode": old_code, "newCode": new_code }),
                )
            })?;

        let result = self
            .cache
            .rename_short(&renamed.current.original_url, old_code, new_code)
            .await;
        swallow("rename_short", result);

        info!(old_code, new_code, "Short code renamed");
        Ok(renamed)
    }

    /// Replaces the original URL of a mapping, keeping its short code.
    pub async fn rename_original(
        &self,
        old_url: &str,
        new_url: &str,
    ) -> Result<RenamedMapping, AppError> {
        let old_canonical = canonical(old_url)?;
        let new_canonical = canonical(new_url)?;

        let renamed = self
            .repo
            .rename(MappingSelector::Original(old_canonical.clone()), &new_canonical)
            .await?
            .ok_or_else(|| {
                AppError::not_found(
                    "Original URL not found or new URL already shortened",
                    json!({ "oldUrl": old_canonical, "newUrl": new_canonical }),
                )
            })?;

        let result = self
            .cache
            .rename_original(
                &renamed.previous.original_url,
                &renamed.current.original_url,
                &renamed.current.short_code,
            )
            .await;
        swallow("rename_original", result);

        info!(short_code = %renamed.current.short_code, "Original URL renamed");
        Ok(renamed)
    }

    /// Deletes the mapping whose original URL or short code equals `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if nothing matches.
    pub async fn delete(&self, identifier: &str) -> Result<UrlMapping, AppError> {
        let mut removed = self
            .repo
            .delete(MappingSelector::Either(identifier.to_string()))
            .await?;

        if removed.is_none()
            && let Ok(canonical) = canonicalize_url(identifier)
            && canonical != identifier
        {
            removed = self.repo.delete(MappingSelector::Original(canonical)).await?;
        }

        let mapping = removed.ok_or_else(|| {
            AppError::not_found("Mapping not found", json!({ "identifier": identifier }))
        })?;

        let result = self
            .cache
            .invalidate(&mapping.original_url, &mapping.short_code)
            .await;
        swallow("invalidate", result);

        info!(short_code = %mapping.short_code, "Mapping deleted");
        Ok(mapping)
    }

    /// Deletes every mapping from the store and the shared cache.
    pub async fn delete_all(&self) -> Result<u64, AppError> {
        let removed = self.repo.delete_all().await?;
        swallow("clear", self.cache.clear().await.map(|_| ()));

        warn!(removed, "All mappings deleted");
        Ok(removed)
    }

    pub async fn list(&self) -> Result<Vec<UrlMapping>, AppError> {
        self.repo.list().await
    }

    pub async fn stats(&self) -> Result<ServiceStats, AppError> {
        let total_mappings = self.repo.count().await?;
        let cached_keys = match self.cache.scan_all().await {
            Ok(entries) => Some(entries.len()),
            Err(e) => {
                warn!(error = %e, "Cache scan failed");
                None
            }
        };

        Ok(ServiceStats {
            total_mappings,
            cached_keys,
        })
    }

    /// Lists every shared cache entry.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] when the cache cannot be scanned.
    pub async fn inspect_cache(&self) -> Result<Vec<CacheEntrySnapshot>, AppError> {
        self.cache.scan_all().await.map_err(cache_unavailable)
    }

    /// Removes every shared cache entry, leaving the store untouched.
    pub async fn clear_cache(&self) -> Result<u64, AppError> {
        let removed = self.cache.clear().await.map_err(cache_unavailable)?;
        info!(removed, "Shared cache cleared");
        Ok(removed)
    }

    /// Removes one shared cache key.
    ///
    /// # Errors
    ///
    /// - [`AppError::Validation`] if `key` is outside the managed prefixes
    /// - [`AppError::NotFound`] if the key does not exist
    pub async fn evict_cache_key(&self, key: &str) -> Result<(), AppError> {
        if !is_managed_key(key) {
            return Err(AppError::bad_request(
                "Only original: and short: keys can be deleted",
                json!({ "key": key }),
            ));
        }

        if self.cache.delete_key(key).await.map_err(cache_unavailable)? {
            Ok(())
        } else {
            Err(AppError::not_found("Cache key not found", json!({ "key": key })))
        }
    }

    /// Looks `key` up in `direction`: shared cache first, then the store.
    ///
    /// A store hit is written back to both cache directions.
    async fn read_through(&self, direction: Direction, key: &str) -> Result<Option<String>, AppError> {
        match self.cache.get(direction, key).await {
            Ok(Some(value)) => {
                counter!("cache_hits_total").increment(1);
                return Ok(Some(value));
            }
            Ok(None) => counter!("cache_misses_total").increment(1),
            Err(e) => {
                counter!("cache_misses_total").increment(1);
                warn!(error = %e, "Cache read failed, falling back to store");
            }
        }

        let found = match direction {
            Direction::Original => self.repo.find_by_original(key).await?,
            Direction::Short => self.repo.find_by_short(key).await?,
        };

        match found {
            Some(mapping) => {
                self.write_through(&mapping.original_url, &mapping.short_code)
                    .await;
                Ok(Some(mapping.counterpart(direction).to_string()))
            }
            None => Ok(None),
        }
    }

    async fn write_through(&self, original_url: &str, short_code: &str) {
        swallow("set", self.cache.set(original_url, short_code).await);
    }
}

fn canonical(url: &str) -> Result<String, AppError> {
    Ok(canonicalize_url(url)?)
}

fn cache_unavailable(e: CacheError) -> AppError {
    warn!(error = %e, "Shared cache unavailable");
    AppError::internal("Shared cache unavailable", json!({ "reason": e.to_string() }))
}

fn swallow(operation: &'static str, result: Result<(), CacheError>) {
    if let Err(e) = result {
        counter!("cache_errors_total", "operation" => operation).increment(1);
        warn!(operation, error = %e, "Shared cache unavailable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache_event::CacheEvent;
    use crate::domain::repositories::MockUrlRepository;
    use crate::infrastructure::cache::{MemoryCache, MockSharedCache};
    use crate::infrastructure::persistence::MemoryUrlRepository;
    use futures_util::StreamExt;

    fn service_with(
        repo: Arc<dyn UrlRepository>,
        cache: Arc<dyn SharedCache>,
    ) -> UrlService {
        UrlService::new(repo, cache, IdentifierGenerator::new("test-secret"))
    }

    fn memory_service() -> (Arc<UrlService>, Arc<MemoryUrlRepository>, Arc<MemoryCache>) {
        let repo = Arc::new(MemoryUrlRepository::new());
        let cache = Arc::new(MemoryCache::new(3600));
        let service = Arc::new(service_with(repo.clone(), cache.clone()));
        (service, repo, cache)
    }

    #[tokio::test]
    async fn test_mint_then_resolve() {
        let (service, _, _) = memory_service();

        let code = service.mint("example.com/page").await.unwrap();
        let url = service.resolve(&code).await.unwrap();

        assert_eq!(code.len(), 7);
        assert_eq!(url, "https://example.com/page");
    }

    #[tokio::test]
    async fn test_mint_is_idempotent() {
        let (service, repo, _) = memory_service();

        let a = service.mint("https://example.com").await.unwrap();
        let b = service.mint("example.com").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mint_creates_one_mapping() {
        let (service, repo, _) = memory_service();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.mint("https://example.com/race").await })
            })
            .collect();

        let mut codes = Vec::new();
        for task in tasks {
            codes.push(task.await.unwrap().unwrap());
        }

        assert!(codes.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolve_after_cache_clear_repopulates() {
        let (service, _, cache) = memory_service();
        let code = service.mint("https://example.com").await.unwrap();

        cache.clear().await.unwrap();
        assert!(cache.is_empty());

        assert_eq!(service.resolve(&code).await.unwrap(), "https://example.com");
        assert_eq!(
            cache.get(Direction::Short, &code).await.unwrap().as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            cache
                .get(Direction::Original, "https://example.com")
                .await
                .unwrap(),
            Some(code)
        );
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let (service, _, _) = memory_service();
        let err = service.resolve("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_cache_hit_skips_store() {
        let mut cache = MockSharedCache::new();
        cache
            .expect_get()
            .returning(|_, _| Ok(Some("https://cached.com".to_string())));

        let mut repo = MockUrlRepository::new();
        repo.expect_find_by_short().never();

        let service = service_with(Arc::new(repo), Arc::new(cache));
        assert_eq!(service.resolve("abc").await.unwrap(), "https://cached.com");
    }

    #[tokio::test]
    async fn test_cache_failure_falls_back_to_store() {
        let mut cache = MockSharedCache::new();
        cache
            .expect_get()
            .returning(|_, _| Err(CacheError::ConnectionError("down".into())));
        cache
            .expect_set()
            .returning(|_, _| Err(CacheError::ConnectionError("down".into())));

        let mut repo = MockUrlRepository::new();
        repo.expect_find_by_short()
            .returning(|code| Ok(Some(UrlMapping::new("https://stored.com", code))));

        let service = service_with(Arc::new(repo), Arc::new(cache));
        assert_eq!(service.resolve("abc").await.unwrap(), "https://stored.com");
    }

    #[tokio::test]
    async fn test_mint_recovers_from_lost_race() {
        let mut cache = MockSharedCache::new();
        cache.expect_get().returning(|_, _| Ok(None));
        cache.expect_set().returning(|_, _| Ok(()));

        let mut repo = MockUrlRepository::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_find_by_original()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        repo.expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Err(AppError::DuplicateKey {
                    field: MappingField::OriginalUrl,
                })
            });
        repo.expect_find_by_original()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|url| Ok(Some(UrlMapping::new(url, "winner1"))));

        let service = service_with(Arc::new(repo), Arc::new(cache));
        assert_eq!(
            service.mint("https://example.com").await.unwrap(),
            "winner1"
        );
    }

    #[tokio::test]
    async fn test_mint_rejects_invalid_url() {
        let (service, _, _) = memory_service();
        let err = service.mint("javascript:alert(1)").await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_rename_short_propagates_to_cache_and_events() {
        let (service, _, cache) = memory_service();
        let old = service.mint("https://example.com").await.unwrap();
        let mut events = cache.subscribe().await.unwrap();

        service.rename_short(&old, "promo").await.unwrap();

        assert_eq!(cache.get(Direction::Short, &old).await.unwrap(), None);
        assert_eq!(service.resolve("promo").await.unwrap(), "https://example.com");
        assert!(service.resolve(&old).await.is_err());
        assert_eq!(
            events.next().await.unwrap(),
            CacheEvent::renamed("https://example.com", old, "promo")
        );
    }

    #[tokio::test]
    async fn test_rename_short_to_taken_code_fails() {
        let (service, _, _) = memory_service();
        let a = service.mint("https://a.com").await.unwrap();
        let b = service.mint("https://b.com").await.unwrap();

        let err = service.rename_short(&a, &b).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
        assert_eq!(service.resolve(&a).await.unwrap(), "https://a.com");
    }

    #[tokio::test]
    async fn test_rename_original_keeps_code() {
        let (service, _, cache) = memory_service();
        let code = service.mint("https://old.com").await.unwrap();

        service
            .rename_original("https://old.com", "new.com")
            .await
            .unwrap();

        assert_eq!(service.resolve(&code).await.unwrap(), "https://new.com");
        assert_eq!(
            cache
                .get(Direction::Original, "https://old.com")
                .await
                .unwrap(),
            None
        );
        assert_eq!(service.mint("https://new.com").await.unwrap(), code);
    }

    #[tokio::test]
    async fn test_delete_by_either_field() {
        let (service, _, cache) = memory_service();
        let code = service.mint("https://a.com").await.unwrap();
        service.mint("https://b.com").await.unwrap();

        service.delete(&code).await.unwrap();
        service.delete("b.com").await.unwrap();

        assert!(cache.is_empty());
        assert!(service.list().await.unwrap().is_empty());
        assert!(matches!(
            service.delete("https://a.com").await.unwrap_err(),
            AppError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_delete_all_clears_store_and_cache() {
        let (service, _, cache) = memory_service();
        service.mint("https://a.com").await.unwrap();
        service.mint("https://b.com").await.unwrap();

        assert_eq!(service.delete_all().await.unwrap(), 2);
        assert!(cache.is_empty());

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.total_mappings, 0);
        assert_eq!(stats.cached_keys, Some(0));
    }

    #[tokio::test]
    async fn test_evict_cache_key() {
        let (service, _, _) = memory_service();
        let code = service.mint("https://example.com").await.unwrap();

        service.evict_cache_key(&format!("short:{}", code)).await.unwrap();
        assert_eq!(service.inspect_cache().await.unwrap().len(), 1);

        assert!(matches!(
            service.evict_cache_key("short:missing").await.unwrap_err(),
            AppError::NotFound { .. }
        ));
        assert!(matches!(
            service.evict_cache_key("session:1").await.unwrap_err(),
            AppError::Validation { .. }
        ));
    }

    #[tokio::test]
    async fn test_add_explicit_pair() {
        let (service, _, _) = memory_service();
        service.add("example.com", "custom").await.unwrap();

        assert_eq!(service.resolve("custom").await.unwrap(), "https://example.com");
        assert!(matches!(
            service.add("https://other.com", "custom").await.unwrap_err(),
            AppError::DuplicateKey {
                field: MappingField::ShortCode
            }
        ));
    }
}
