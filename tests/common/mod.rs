#![allow(dead_code)]

use axum::Router;
use axum::extract::ConnectInfo;
use axum_test::TestServer;
use cached_shortener::config::Config;
use cached_shortener::infrastructure::cache::MemoryCache;
use cached_shortener::infrastructure::persistence::MemoryUrlRepository;
use cached_shortener::routes;
use cached_shortener::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::Layer;

pub const BASE_URL: &str = "http://s.test";

pub fn test_config() -> Config {
    Config {
        database_url: None,
        redis_url: None,
        listen_addr: "127.0.0.1:0".to_string(),
        base_url: BASE_URL.to_string(),
        log_level: "info".to_string(),
        log_format: "text".to_string(),
        url_secret_key: "test-secret".to_string(),
        cache_ttl_seconds: 3600,
        job_timeout_seconds: 5,
        behind_proxy: false,
        shorten_concurrency: 4,
        redirect_concurrency: 4,
        shorten_attempts: 3,
        redirect_attempts: 2,
        shorten_queue_limit: 8000,
        shorten_queue_window_ms: 3500,
        redirect_queue_limit: 8000,
        redirect_queue_window_ms: 5000,
        shorten_rate_limit: 100,
        redirect_rate_limit: 1000,
        db_max_connections: 30,
        db_connect_timeout: 30,
        db_idle_timeout: 10,
        db_max_lifetime: 1800,
    }
}

/// State over in-memory backends plus handles to those backends.
pub struct TestApp {
    pub state: AppState,
    pub repo: Arc<MemoryUrlRepository>,
    pub cache: Arc<MemoryCache>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let repo = Arc::new(MemoryUrlRepository::new());
        let cache = Arc::new(MemoryCache::new(config.cache_ttl_seconds));
        let state = AppState::new(repo.clone(), cache.clone(), &config);

        Self { state, repo, cache }
    }

    /// Full router behind a fake peer address of 127.0.0.1.
    pub fn server(&self) -> TestServer {
        let app: Router = routes::router(self.state.clone()).layer(MockConnectInfoLayer);
        TestServer::new(app).unwrap()
    }
}

#[derive(Clone)]
pub struct MockConnectInfoLayer;

impl<S> Layer<S> for MockConnectInfoLayer {
    type Service = MockConnectInfoService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MockConnectInfoService { inner }
    }
}

#[derive(Clone)]
pub struct MockConnectInfoService<S> {
    inner: S,
}

impl<S, B> tower::Service<axum::http::Request<B>> for MockConnectInfoService<S>
where
    S: tower::Service<axum::http::Request<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: axum::http::Request<B>) -> Self::Future {
        let addr: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        self.inner.call(req)
    }
}

/// Polls `condition` every 10 ms until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Short code at the end of a short URL.
pub fn code_of(short_url: &str) -> String {
    short_url.rsplit('/').next().unwrap().to_string()
}
