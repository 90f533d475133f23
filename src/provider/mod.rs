//! Upstream catalog provider seam.
//!
//! Everything that knows about a concrete provider's endpoints and payload
//! quirks lives behind [`CatalogProvider`]; the rest of the core only sees
//! normalized [`CatalogVideo`] / [`VideoDetail`] values.

pub mod vcdn;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{backoff_delay, UpstreamError};
use crate::model::{CatalogVideo, SearchFilters, VideoDetail};

pub use vcdn::VcdnClient;

/// Which listing feed to page through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFeed {
    /// Recently-changed records ("updates" feed).
    Updates,
    /// The complete catalog listing.
    Full,
}

/// Identifier accepted by the single-item detail endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DetailKey {
    Kinopoisk(i64),
    Imdb(String),
}

/// One fetched listing page, already normalized.
#[derive(Debug, Clone, Default)]
pub struct ProviderPage {
    pub items: Vec<CatalogVideo>,
    /// Upstream's reported last page, when it reports one.
    pub last_page: Option<i64>,
}

#[async_trait]
pub trait CatalogProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch one listing page (1-based). A malformed body is an empty page,
    /// not an error.
    async fn list_page(
        &self,
        feed: ListFeed,
        page: i64,
        page_size: i64,
    ) -> Result<ProviderPage, UpstreamError>;

    /// Single-item detail lookup. `Ok(None)` is a clean not-found.
    async fn detail(&self, key: &DetailKey) -> Result<Option<VideoDetail>, UpstreamError>;

    /// Free-text search.
    async fn search(&self, query: &str) -> Result<Vec<CatalogVideo>, UpstreamError>;

    /// Faceted listing page (genre/country/year/kind filters), 1-based.
    async fn faceted(
        &self,
        filters: &SearchFilters,
        page: i64,
        page_size: i64,
    ) -> Result<ProviderPage, UpstreamError>;
}

/// Run `op` up to `attempts` times, sleeping a linearly growing delay between
/// tries. Only retryable failures ([`UpstreamError::Unavailable`]) consume
/// the budget; a rejection surfaces immediately.
pub(crate) async fn with_retry<T, F, Fut>(
    what: &str,
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, UpstreamError>>,
{
    let attempts = attempts.max(1);
    let mut last: Option<UpstreamError> = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => {
                warn!(what, attempt, error = %e, "upstream call failed; will retry");
                last = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(backoff_delay(base_delay, attempt)).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or_else(|| UpstreamError::Unavailable(format!("{what}: retry budget spent"))))
}
