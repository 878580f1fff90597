//! Shared application state injected into every handler.

use std::sync::Arc;
use std::time::Duration;

use crate::api::middleware::rate_limit::RateLimits;
use crate::application::broadcaster::Broadcaster;
use crate::application::queue::{JobJournal, WorkQueue};
use crate::application::services::{IdentifierGenerator, UrlService};
use crate::application::workers::{RedirectProcessor, ShortenProcessor};
use crate::config::Config;
use crate::domain::repositories::UrlRepository;
use crate::infrastructure::cache::SharedCache;

/// Buffered frames per push client before it is considered stuck.
const CLIENT_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub url_service: Arc<UrlService>,
    pub shorten_queue: WorkQueue<ShortenProcessor>,
    pub redirect_queue: WorkQueue<RedirectProcessor>,
    pub broadcaster: Arc<Broadcaster>,
    pub rate_limits: Arc<RateLimits>,
    pub base_url: Arc<str>,
    pub job_timeout: Duration,
}

impl AppState {
    /// Wires the service, both queues, the broadcaster and the rate limiters
    /// over the given store and cache.
    pub fn new(
        repo: Arc<dyn UrlRepository>,
        cache: Arc<dyn SharedCache>,
        config: &Config,
    ) -> Self {
        Self::with_journal(repo, cache, config, None)
    }

    /// Like [`AppState::new`], with both queues journaling pending jobs.
    pub fn with_journal(
        repo: Arc<dyn UrlRepository>,
        cache: Arc<dyn SharedCache>,
        config: &Config,
        journal: Option<Arc<dyn JobJournal>>,
    ) -> Self {
        let url_service = Arc::new(UrlService::new(
            repo,
            cache,
            IdentifierGenerator::new(config.url_secret_key.as_bytes()),
        ));

        Self {
            shorten_queue: WorkQueue::with_journal(
                ShortenProcessor::new(url_service.clone()),
                config.shorten_queue(),
                journal.clone(),
            ),
            redirect_queue: WorkQueue::with_journal(
                RedirectProcessor::new(url_service.clone()),
                config.redirect_queue(),
                journal,
            ),
            url_service,
            broadcaster: Broadcaster::new(CLIENT_BUFFER),
            rate_limits: Arc::new(RateLimits::from_config(config)),
            base_url: config.base_url.trim_end_matches('/').into(),
            job_timeout: config.job_timeout(),
        }
    }

    /// Public URL for a short code.
    pub fn short_url(&self, code: &str) -> String {
        format!("{}/{}", self.base_url, code)
    }
}
