//! Redis-backed shared cache.

use super::service::{
    CACHE_EVENTS_CHANNEL, CacheEntrySnapshot, CacheError, CacheResult, SCAN_PAGE_SIZE,
    SharedCache, is_managed_key,
};
use crate::domain::cache_event::CacheEvent;
use crate::domain::entities::Direction;
use async_trait::async_trait;
use futures_util::{StreamExt, stream::BoxStream};
use redis::{AsyncCommands, Client, Pipeline, aio::ConnectionManager};
use tracing::{debug, info, warn};

/// Redis cache holding both directions of every mapping.
///
/// Writes go through `MULTI`/`EXEC` pipelines that also carry the `PUBLISH`
/// of the matching [`CacheEvent`], so subscribers never observe an event
/// before the keys it describes.
pub struct RedisCache {
    client: Client,
    conn: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisCache {
    /// Connects to Redis and validates the connection with a PING.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ConnectionError`] if the URL is invalid, the connection cannot
    /// be established, or the PING health check fails.
    pub async fn connect(redis_url: &str, ttl_seconds: u64) -> CacheResult<Self> {
        info!("Connecting to Redis at {}", redis_url);

        let client = Client::open(redis_url).map_err(|e| {
            CacheError::ConnectionError(format!("Failed to create Redis client: {}", e))
        })?;

        let conn = ConnectionManager::new(client.clone()).await.map_err(|e| {
            CacheError::ConnectionError(format!("Failed to connect to Redis: {}", e))
        })?;

        let mut test_conn = conn.clone();
        test_conn
            .ping::<()>()
            .await
            .map_err(|e| CacheError::ConnectionError(format!("Redis PING failed: {}", e)))?;

        info!("✓ Connected to Redis");

        Ok(Self {
            client,
            conn,
            ttl_seconds,
        })
    }

    fn set_pair(&self, pipe: &mut Pipeline, original_url: &str, short_code: &str) {
        pipe.set_ex(
            Direction::Original.cache_key(original_url),
            short_code,
            self.ttl_seconds,
        )
        .ignore()
        .set_ex(
            Direction::Short.cache_key(short_code),
            original_url,
            self.ttl_seconds,
        )
        .ignore();
    }

    fn publish(pipe: &mut Pipeline, event: &CacheEvent) -> CacheResult<()> {
        let payload = serde_json::to_string(event)?;
        pipe.publish(CACHE_EVENTS_CHANNEL, payload).ignore();
        Ok(())
    }

    async fn exec(&self, pipe: Pipeline) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))
    }

    /// Collects every key matching `pattern`, one cursor page at a time.
    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_PAGE_SIZE)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::OperationError(format!("SCAN failed: {}", e)))?;

            keys.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    async fn managed_keys(&self) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        for direction in [Direction::Original, Direction::Short] {
            keys.extend(self.scan_keys(&format!("{}*", direction.key_prefix())).await?);
        }
        Ok(keys)
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get(&self, direction: Direction, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(direction.cache_key(key))
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))
    }

    async fn set(&self, original_url: &str, short_code: &str) -> CacheResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.set_pair(&mut pipe, original_url, short_code);
        Self::publish(&mut pipe, &CacheEvent::set(original_url, short_code))?;

        self.exec(pipe).await?;
        debug!(short_code, "Cache SET both directions");
        Ok(())
    }

    async fn invalidate(&self, original_url: &str, short_code: &str) -> CacheResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(Direction::Original.cache_key(original_url))
            .ignore()
            .del(Direction::Short.cache_key(short_code))
            .ignore();
        Self::publish(&mut pipe, &CacheEvent::deleted(original_url, short_code))?;

        self.exec(pipe).await?;
        debug!(short_code, "Cache INVALIDATE both directions");
        Ok(())
    }

    async fn rename_short(
        &self,
        original_url: &str,
        old_short: &str,
        new_short: &str,
    ) -> CacheResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(Direction::Short.cache_key(old_short))
            .ignore();
        self.set_pair(&mut pipe, original_url, new_short);
        Self::publish(
            &mut pipe,
            &CacheEvent::renamed(original_url, old_short, new_short),
        )?;

        self.exec(pipe).await?;
        debug!(old_short, new_short, "Cache RENAME short code");
        Ok(())
    }

    async fn rename_original(
        &self,
        old_original: &str,
        new_original: &str,
        short_code: &str,
    ) -> CacheResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(Direction::Original.cache_key(old_original))
            .ignore();
        self.set_pair(&mut pipe, new_original, short_code);
        Self::publish(&mut pipe, &CacheEvent::deleted(old_original, short_code))?;
        Self::publish(&mut pipe, &CacheEvent::set(new_original, short_code))?;

        self.exec(pipe).await?;
        debug!(short_code, "Cache RENAME original url");
        Ok(())
    }

    async fn scan_all(&self) -> CacheResult<Vec<CacheEntrySnapshot>> {
        let keys = self.managed_keys().await?;
        let mut conn = self.conn.clone();
        let mut entries = Vec::with_capacity(keys.len());

        for key in keys {
            // A key may expire or be deleted between SCAN and GET.
            let result: redis::RedisResult<(Option<String>, i64)> = redis::pipe()
                .get(&key)
                .ttl(&key)
                .query_async(&mut conn)
                .await;

            match result {
                Ok((value, ttl)) => entries.push(CacheEntrySnapshot {
                    key,
                    value,
                    ttl: (ttl >= 0).then_some(ttl),
                }),
                Err(e) => warn!(%key, error = %e, "Skipping key during scan"),
            }
        }

        Ok(entries)
    }

    async fn delete_key(&self, key: &str) -> CacheResult<bool> {
        if !is_managed_key(key) {
            return Ok(false);
        }

        let mut conn = self.conn.clone();
        let deleted: i64 = conn
            .del(key)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;

        Ok(deleted > 0)
    }

    async fn clear(&self) -> CacheResult<u64> {
        let keys = self.managed_keys().await?;
        let mut conn = self.conn.clone();
        let mut removed: u64 = 0;

        for page in keys.chunks(SCAN_PAGE_SIZE) {
            let deleted: u64 = conn
                .del(page)
                .await
                .map_err(|e| CacheError::OperationError(e.to_string()))?;
            removed += deleted;
        }

        info!(removed, "Shared cache cleared");
        Ok(removed)
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        conn.ping::<()>().await.is_ok()
    }

    async fn subscribe(&self) -> CacheResult<BoxStream<'static, CacheEvent>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        pubsub
            .subscribe(CACHE_EVENTS_CHANNEL)
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        info!(channel = CACHE_EVENTS_CHANNEL, "Subscribed to cache events");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Unreadable cache event payload");
                    return None;
                }
            };
            match serde_json::from_str::<CacheEvent>(&payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, %payload, "Malformed cache event");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}
