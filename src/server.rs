//! HTTP server initialization and runtime setup.
//!
//! Handles store and cache connections, background task spawning, the Axum
//! server lifecycle and graceful shutdown.

use crate::application::broadcaster::{KEEP_ALIVE_INTERVAL, RELAY_BACKOFF};
use crate::application::queue::JobJournal;
use crate::config::Config;
use crate::domain::repositories::UrlRepository;
use crate::infrastructure::cache::{MemoryCache, RedisCache, SharedCache};
use crate::infrastructure::persistence::{MemoryUrlRepository, PgUrlRepository, connect_pool};
use crate::infrastructure::queue::RedisJobJournal;
use crate::routes::app_router;
use crate::state::AppState;

use anyhow::{Context, Result};
use axum::ServiceExt;
use axum::extract::Request;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;

/// Delay between database connection attempts at startup.
const DB_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Connection attempts before startup is aborted.
const DB_CONNECT_ATTEMPTS: usize = 5;

/// How long queued jobs may run after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Interval between sweeps of idle rate limiter buckets.
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Runs the HTTP server with the given configuration.
///
/// Initializes:
/// - PostgreSQL pool with migrations (or the in-memory store)
/// - Redis shared cache (or the in-memory fallback)
/// - Shorten and redirect queues, journaled in Redis when configured
/// - Cache event relay and keep-alive tasks
/// - Axum HTTP server
///
/// On Ctrl+C or SIGTERM the server stops accepting connections, both queues
/// drain for up to [`SHUTDOWN_GRACE`], background tasks are aborted and the
/// pool is closed.
///
/// # Errors
///
/// Returns an error if:
/// - The database is unreachable after every attempt
/// - Server bind fails
/// - Server runtime error occurs
pub async fn run(config: Config) -> Result<()> {
    let (repo, pool): (Arc<dyn UrlRepository>, Option<PgPool>) = match &config.database_url {
        Some(url) => {
            let pool = connect_with_retry(url, &config).await?;
            tracing::info!("Connected to database");
            (
                Arc::new(PgUrlRepository::new(Arc::new(pool.clone()))),
                Some(pool),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set, mappings are kept in memory");
            (Arc::new(MemoryUrlRepository::new()), None)
        }
    };

    let cache = connect_cache(&config).await;

    let journal = connect_journal(&config).await;
    let state = AppState::with_journal(repo, cache.clone(), &config, journal);

    let replayed = state.shorten_queue.recover().await + state.redirect_queue.recover().await;
    if replayed > 0 {
        tracing::info!(jobs = replayed, "Resumed jobs from previous run");
    }

    let mut tasks: Vec<JoinHandle<()>> = vec![
        state.broadcaster.spawn_relay(cache, RELAY_BACKOFF),
        state.broadcaster.spawn_keep_alive(KEEP_ALIVE_INTERVAL),
    ];
    tasks.push(spawn_limiter_sweep(&state));
    tracing::info!("Background tasks started");

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid LISTEN address: {}", config.listen_addr))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{addr}");

    serve(listener, state, shutdown_signal()).await?;

    for task in tasks {
        task.abort();
    }

    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database pool closed");
    }

    Ok(())
}

/// Serves `state` on `listener` until `shutdown` resolves.
///
/// On shutdown, push streams are closed so open SSE connections finish,
/// in-flight requests complete and both queues drain for up to
/// [`SHUTDOWN_GRACE`].
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = app_router(state.clone());
    let broadcaster = state.broadcaster.clone();

    axum::serve(
        listener,
        ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        broadcaster.close_all();
    })
    .await?;

    tracing::info!("Server stopped, draining queues");
    let (shorten_drained, redirect_drained) = tokio::join!(
        state.shorten_queue.shutdown(SHUTDOWN_GRACE),
        state.redirect_queue.shutdown(SHUTDOWN_GRACE),
    );
    if !(shorten_drained && redirect_drained) {
        tracing::warn!("Some jobs were still running at shutdown");
    }

    Ok(())
}

async fn connect_with_retry(url: &str, config: &Config) -> Result<PgPool> {
    let settings = config.pool_settings();
    let strategy = FixedInterval::new(DB_RETRY_INTERVAL).take(DB_CONNECT_ATTEMPTS - 1);

    Retry::spawn(strategy, || async {
        connect_pool(url, &settings).await.inspect_err(|e| {
            tracing::warn!(error = %e, "Database connection attempt failed");
        })
    })
    .await
    .with_context(|| format!("Database unreachable after {} attempts", DB_CONNECT_ATTEMPTS))
}

/// Redis when configured and reachable, otherwise a process-local cache.
async fn connect_cache(config: &Config) -> Arc<dyn SharedCache> {
    if let Some(redis_url) = &config.redis_url {
        match RedisCache::connect(redis_url, config.cache_ttl_seconds).await {
            Ok(redis) => {
                tracing::info!("Cache enabled (Redis)");
                return Arc::new(redis);
            }
            Err(e) => {
                tracing::warn!("Failed to connect to Redis: {}. Using in-memory cache.", e);
            }
        }
    } else {
        tracing::info!("Redis not configured, using in-memory cache");
    }

    Arc::new(MemoryCache::new(config.cache_ttl_seconds))
}

/// Redis job journal when configured and reachable.
///
/// Without it, jobs still queued when the process dies are lost.
async fn connect_journal(config: &Config) -> Option<Arc<dyn JobJournal>> {
    let redis_url = config.redis_url.as_ref()?;

    match RedisJobJournal::connect(redis_url).await {
        Ok(journal) => Some(Arc::new(journal)),
        Err(e) => {
            tracing::warn!("Failed to connect job journal: {}. Queues are in-process only.", e);
            None
        }
    }
}

fn spawn_limiter_sweep(state: &AppState) -> JoinHandle<()> {
    let limits = state.rate_limits.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            limits.retain_recent();
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
