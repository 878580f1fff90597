//! Redis-backed job journal.

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tracing::info;

use crate::application::queue::JobKind;
use crate::application::queue::journal::{JobJournal, JournalError, JournalResult, pending_key};

/// Keeps each queue's pending payloads in a Redis set
/// (`queue:{kind}:pending`).
///
/// The keys have no TTL and sit outside the `original:`/`short:` prefixes,
/// so cache clears never touch them.
pub struct RedisJobJournal {
    conn: ConnectionManager,
}

impl RedisJobJournal {
    /// # Errors
    ///
    /// Returns [`JournalError::Connection`] if the URL is invalid or Redis is
    /// unreachable.
    pub async fn connect(redis_url: &str) -> JournalResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| JournalError::Connection(format!("Failed to create Redis client: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| JournalError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        info!("Job journal enabled (Redis)");
        Ok(Self { conn })
    }
}

fn op_error(e: redis::RedisError) -> JournalError {
    JournalError::Operation(e.to_string())
}

#[async_trait]
impl JobJournal for RedisJobJournal {
    async fn record(&self, kind: JobKind, payload: &str) -> JournalResult<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(pending_key(kind), payload)
            .await
            .map_err(op_error)
    }

    async fn complete(&self, kind: JobKind, payload: &str) -> JournalResult<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(pending_key(kind), payload)
            .await
            .map_err(op_error)
    }

    async fn pending(&self, kind: JobKind) -> JournalResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(pending_key(kind)).await.map_err(op_error)
    }
}
