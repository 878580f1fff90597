//! Queue processors backed by the url service.

use async_trait::async_trait;
use std::sync::Arc;

use crate::application::queue::{JobKind, JobProcessor};
use crate::application::services::UrlService;
use crate::error::AppError;

/// Mints a short code for a submitted URL.
pub struct ShortenProcessor {
    service: Arc<UrlService>,
}

impl ShortenProcessor {
    pub fn new(service: Arc<UrlService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobProcessor for ShortenProcessor {
    type Payload = String;
    type Output = String;

    fn kind(&self) -> JobKind {
        JobKind::Shorten
    }

    async fn process(&self, original_url: String) -> Result<String, AppError> {
        self.service.mint(&original_url).await
    }
}

/// Resolves a short code to its original URL.
pub struct RedirectProcessor {
    service: Arc<UrlService>,
}

impl RedirectProcessor {
    pub fn new(service: Arc<UrlService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobProcessor for RedirectProcessor {
    type Payload = String;
    type Output = String;

    fn kind(&self) -> JobKind {
        JobKind::Redirect
    }

    async fn process(&self, short_code: String) -> Result<String, AppError> {
        self.service.resolve(&short_code).await
    }
}
