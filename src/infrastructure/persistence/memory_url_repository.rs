//! In-process implementation of the url mapping repository.
//!
//! Used when no database is configured and throughout the test suite.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::domain::entities::{MappingField, MappingSelector, RenamedMapping, UrlMapping};
use crate::domain::repositories::UrlRepository;
use crate::error::AppError;

#[derive(Default)]
struct Tables {
    by_short: HashMap<String, UrlMapping>,
    /// original_url -> short_code
    by_original: HashMap<String, String>,
}

impl Tables {
    fn short_code_for(&self, selector: &MappingSelector) -> Option<String> {
        match selector {
            MappingSelector::Original(v) => self.by_original.get(v).cloned(),
            MappingSelector::Short(v) => self.by_short.contains_key(v).then(|| v.clone()),
            MappingSelector::Either(v) => self
                .by_original
                .get(v)
                .cloned()
                .or_else(|| self.by_short.contains_key(v).then(|| v.clone())),
        }
    }

    fn remove(&mut self, short_code: &str) -> Option<UrlMapping> {
        let mapping = self.by_short.remove(short_code)?;
        self.by_original.remove(&mapping.original_url);
        Some(mapping)
    }

    fn insert(&mut self, mapping: UrlMapping) {
        self.by_original
            .insert(mapping.original_url.clone(), mapping.short_code.clone());
        self.by_short.insert(mapping.short_code.clone(), mapping);
    }
}

/// Mapping store held in memory behind a single lock.
///
/// Each operation runs under one write or read guard, so operations on a
/// single mapping are atomic with respect to each other.
#[derive(Default)]
pub struct MemoryUrlRepository {
    tables: RwLock<Tables>,
    offline: AtomicBool,
}

impl MemoryUrlRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail as if the store were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), AppError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::internal("Database error", json!({})));
        }
        Ok(())
    }
}

#[async_trait]
impl UrlRepository for MemoryUrlRepository {
    async fn find_by_original(&self, original_url: &str) -> Result<Option<UrlMapping>, AppError> {
        self.check_online()?;
        let tables = self.tables.read().await;
        Ok(tables
            .by_original
            .get(original_url)
            .and_then(|code| tables.by_short.get(code))
            .cloned())
    }

    async fn find_by_short(&self, short_code: &str) -> Result<Option<UrlMapping>, AppError> {
        self.check_online()?;
        Ok(self.tables.read().await.by_short.get(short_code).cloned())
    }

    async fn create(&self, original_url: &str, short_code: &str) -> Result<UrlMapping, AppError> {
        self.check_online()?;
        let mut tables = self.tables.write().await;

        if tables.by_original.contains_key(original_url) {
            return Err(AppError::DuplicateKey {
                field: MappingField::OriginalUrl,
            });
        }
        if tables.by_short.contains_key(short_code) {
            return Err(AppError::DuplicateKey {
                field: MappingField::ShortCode,
            });
        }

        let mapping = UrlMapping::new(original_url, short_code);
        tables.insert(mapping.clone());
        Ok(mapping)
    }

    async fn rename(
        &self,
        selector: MappingSelector,
        new_value: &str,
    ) -> Result<Option<RenamedMapping>, AppError> {
        self.check_online()?;
        if matches!(selector, MappingSelector::Either(_)) {
            return Ok(None);
        }

        let mut tables = self.tables.write().await;
        let Some(code) = tables.short_code_for(&selector) else {
            return Ok(None);
        };

        let taken = match selector {
            MappingSelector::Original(_) => tables.by_original.contains_key(new_value),
            _ => tables.by_short.contains_key(new_value),
        };
        if taken {
            return Ok(None);
        }

        let Some(previous) = tables.remove(&code) else {
            return Ok(None);
        };
        let mut current = previous.clone();
        match selector {
            MappingSelector::Original(_) => current.original_url = new_value.to_string(),
            _ => current.short_code = new_value.to_string(),
        }
        current.updated_at = Utc::now();
        tables.insert(current.clone());

        Ok(Some(RenamedMapping { previous, current }))
    }

    async fn delete(&self, selector: MappingSelector) -> Result<Option<UrlMapping>, AppError> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        Ok(tables
            .short_code_for(&selector)
            .and_then(|code| tables.remove(&code)))
    }

    async fn delete_all(&self) -> Result<u64, AppError> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        let removed = tables.by_short.len() as u64;
        *tables = Tables::default();
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<UrlMapping>, AppError> {
        self.check_online()?;
        let mut all: Vec<UrlMapping> = self.tables.read().await.by_short.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn count(&self) -> Result<i64, AppError> {
        self.check_online()?;
        Ok(self.tables.read().await.by_short.len() as i64)
    }

    async fn health_check(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}
