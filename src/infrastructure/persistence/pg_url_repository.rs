//! PostgreSQL implementation of the url mapping repository.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::entities::{MappingSelector, RenamedMapping, UrlMapping};
use crate::domain::repositories::UrlRepository;
use crate::error::AppError;

/// Connection pool sizing for the mapping store, built by
/// [`Config::pool_settings`](crate::config::Config::pool_settings).
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

/// Opens a connection pool and applies pending migrations.
pub async fn connect_pool(database_url: &str, settings: &PoolSettings) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(settings.idle_timeout)
        .max_lifetime(settings.max_lifetime)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("✓ Database migrations applied");

    Ok(pool)
}

#[derive(FromRow)]
struct UrlRow {
    original_url: String,
    short_code: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<UrlRow> for UrlMapping {
    fn from(r: UrlRow) -> Self {
        UrlMapping {
            original_url: r.original_url,
            short_code: r.short_code,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(FromRow)]
struct RenameRow {
    prev_original_url: String,
    prev_short_code: String,
    prev_updated_at: chrono::DateTime<chrono::Utc>,
    #[sqlx(flatten)]
    current: UrlRow,
}

/// PostgreSQL repository for url mappings.
///
/// Uniqueness of both columns is enforced by the table constraints; a
/// violation surfaces as [`AppError::DuplicateKey`].
pub struct PgUrlRepository {
    pool: Arc<PgPool>,
}

impl PgUrlRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UrlRepository for PgUrlRepository {
    async fn find_by_original(&self, original_url: &str) -> Result<Option<UrlMapping>, AppError> {
        let row = sqlx::query_as::<_, UrlRow>(
            r#"
            SELECT original_url, short_code, created_at, updated_at
            FROM urls
            WHERE original_url = $1
            "#,
        )
        .bind(original_url)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(UrlMapping::from))
    }

    async fn find_by_short(&self, short_code: &str) -> Result<Option<UrlMapping>, AppError> {
        let row = sqlx::query_as::<_, UrlRow>(
            r#"
            SELECT original_url, short_code, created_at, updated_at
            FROM urls
            WHERE short_code = $1
            "#,
        )
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(UrlMapping::from))
    }

    async fn create(&self, original_url: &str, short_code: &str) -> Result<UrlMapping, AppError> {
        let row = sqlx::query_as::<_, UrlRow>(
            r#"
            INSERT INTO urls (original_url, short_code)
            VALUES ($1, $2)
            RETURNING original_url, short_code, created_at, updated_at
            "#,
        )
        .bind(original_url)
        .bind(short_code)
        .fetch_one(self.pool.as_ref())
        .await?;

        debug!(short_code, "Mapping inserted");
        Ok(row.into())
    }

    async fn rename(
        &self,
        selector: MappingSelector,
        new_value: &str,
    ) -> Result<Option<RenamedMapping>, AppError> {
        // The CTE reads the pre-update row in the same statement snapshot.
        let sql = match &selector {
            MappingSelector::Original(_) => {
                r#"
                WITH prev AS (
                    SELECT id, original_url, short_code, created_at, updated_at
                    FROM urls WHERE original_url = $1
                )
                UPDATE urls u
                SET original_url = $2, updated_at = NOW()
                FROM prev
                WHERE u.id = prev.id
                RETURNING prev.original_url AS prev_original_url,
                          prev.short_code AS prev_short_code,
                          prev.updated_at AS prev_updated_at,
                          u.original_url, u.short_code, u.created_at, u.updated_at
                "#
            }
            MappingSelector::Short(_) => {
                r#"
                WITH prev AS (
                    SELECT id, original_url, short_code, created_at, updated_at
                    FROM urls WHERE short_code = $1
                )
                UPDATE urls u
                SET short_code = $2, updated_at = NOW()
                FROM prev
                WHERE u.id = prev.id
                RETURNING prev.original_url AS prev_original_url,
                          prev.short_code AS prev_short_code,
                          prev.updated_at AS prev_updated_at,
                          u.original_url, u.short_code, u.created_at, u.updated_at
                "#
            }
            MappingSelector::Either(_) => return Ok(None),
        };
        let current_value = match &selector {
            MappingSelector::Original(v) | MappingSelector::Short(v) | MappingSelector::Either(v) => v,
        };

        let result = sqlx::query_as::<_, RenameRow>(sql)
            .bind(current_value)
            .bind(new_value)
            .fetch_optional(self.pool.as_ref())
            .await;

        let row = match result {
            Ok(row) => row,
            Err(e) => match AppError::from(e) {
                AppError::DuplicateKey { field } => {
                    debug!(%field, new_value, "Rename target already taken");
                    return Ok(None);
                }
                other => return Err(other),
            },
        };

        Ok(row.map(|r| {
            let current: UrlMapping = r.current.into();
            RenamedMapping {
                previous: UrlMapping {
                    original_url: r.prev_original_url,
                    short_code: r.prev_short_code,
                    created_at: current.created_at,
                    updated_at: r.prev_updated_at,
                },
                current,
            }
        }))
    }

    async fn delete(&self, selector: MappingSelector) -> Result<Option<UrlMapping>, AppError> {
        let (sql, value) = match &selector {
            MappingSelector::Original(v) => (
                "DELETE FROM urls WHERE original_url = $1 \
                 RETURNING original_url, short_code, created_at, updated_at",
                v,
            ),
            MappingSelector::Short(v) => (
                "DELETE FROM urls WHERE short_code = $1 \
                 RETURNING original_url, short_code, created_at, updated_at",
                v,
            ),
            MappingSelector::Either(v) => (
                "DELETE FROM urls WHERE id = (\
                    SELECT id FROM urls WHERE original_url = $1 OR short_code = $1 LIMIT 1\
                 ) RETURNING original_url, short_code, created_at, updated_at",
                v,
            ),
        };

        let row = sqlx::query_as::<_, UrlRow>(sql)
            .bind(value)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(row.map(UrlMapping::from))
    }

    async fn delete_all(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM urls")
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }

    async fn list(&self) -> Result<Vec<UrlMapping>, AppError> {
        let rows = sqlx::query_as::<_, UrlRow>(
            r#"
            SELECT original_url, short_code, created_at, updated_at
            FROM urls
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(UrlMapping::from).collect())
    }

    async fn count(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM urls")
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(count)
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .is_ok()
    }
}
