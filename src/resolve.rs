//! Playable-link resolution as a prioritized fallback chain.
//!
//! Strategies run most-specific-first: detail lookup by kinopoisk id, then by
//! imdb id, then a title+year search, then free-text title. Attempts race in
//! small concurrent groups, first success wins, and every finished attempt's
//! outcome is collected in a structured result rather than being thrown away
//! by exception-style racing. Successes and clean not-founds are cached
//! separately with very different lifetimes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::cache::TtlCache;
use crate::model::CatalogVideo;
use crate::provider::{CatalogProvider, DetailKey};
use crate::search::{is_match, tokenize};
use crate::util::env::env_parse;

/// Resolution input. The identifier fields form the cache key; `start_time`
/// and `translation` are per-request decoration and never influence caching.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub kinopoisk_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub start_time: Option<u32>,
    pub translation: Option<String>,
}

impl ResolveRequest {
    fn stable_key(&self) -> Option<String> {
        if self.kinopoisk_id.is_none() && self.imdb_id.is_none() && self.title.is_none() {
            return None;
        }
        Some(format!(
            "kp={};imdb={};t={};y={}",
            self.kinopoisk_id.map(|v| v.to_string()).unwrap_or_default(),
            self.imdb_id.as_deref().unwrap_or_default(),
            self.title
                .as_deref()
                .map(crate::search::normalize)
                .unwrap_or_default(),
            self.year.map(|v| v.to_string()).unwrap_or_default(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    pub url: String,
    pub strategy: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(ResolvedLink),
    NotFound,
}

/// Per-attempt structured outcome, kept for all finished attempts.
#[derive(Debug, Clone)]
enum AttemptResult {
    Found(String),
    NotFound,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    ByKinopoisk,
    ByImdb,
    TitleYear,
    TitleFree,
}

impl Strategy {
    fn name(&self) -> &'static str {
        match self {
            Strategy::ByKinopoisk => "kinopoisk_id",
            Strategy::ByImdb => "imdb_id",
            Strategy::TitleYear => "title_year",
            Strategy::TitleFree => "title",
        }
    }
}

pub struct LinkResolver {
    provider: Arc<dyn CatalogProvider>,
    positive: TtlCache<String, ResolvedLink>,
    negative: TtlCache<String, ()>,
    race_width: usize,
}

impl LinkResolver {
    pub fn new(
        provider: Arc<dyn CatalogProvider>,
        positive_ttl: Duration,
        negative_ttl: Duration,
        race_width: usize,
    ) -> Self {
        LinkResolver {
            provider,
            positive: TtlCache::new(positive_ttl),
            negative: TtlCache::new(negative_ttl),
            race_width: race_width.max(1),
        }
    }

    /// Defaults (15 min positive, 60 s negative, 2-wide race), overridable
    /// via RESOLVE_POS_TTL_SECS / RESOLVE_NEG_TTL_SECS / RESOLVE_RACE_WIDTH.
    pub fn from_env(provider: Arc<dyn CatalogProvider>) -> Self {
        Self::new(
            provider,
            Duration::from_secs(env_parse("RESOLVE_POS_TTL_SECS", 900u64)),
            Duration::from_secs(env_parse("RESOLVE_NEG_TTL_SECS", 60u64)),
            env_parse("RESOLVE_RACE_WIDTH", 2usize),
        )
    }

    #[instrument(skip(self, req), fields(kp = ?req.kinopoisk_id, imdb = ?req.imdb_id))]
    pub async fn resolve(&self, req: &ResolveRequest) -> Result<Resolution> {
        let Some(key) = req.stable_key() else {
            bail!("resolve requires at least one of kinopoisk_id / imdb_id / title");
        };
        if let Some(hit) = self.positive.get(&key) {
            debug!(strategy = hit.strategy, "resolve served from positive cache");
            return Ok(Resolution::Found(ResolvedLink {
                url: decorate(&hit.url, req),
                strategy: hit.strategy,
            }));
        }
        if self.negative.get(&key).is_some() {
            debug!("resolve served from negative cache");
            return Ok(Resolution::NotFound);
        }

        let mut strategies: Vec<Strategy> = Vec::new();
        if req.kinopoisk_id.is_some() {
            strategies.push(Strategy::ByKinopoisk);
        }
        if req.imdb_id.is_some() {
            strategies.push(Strategy::ByImdb);
        }
        if req.title.is_some() && req.year.is_some() {
            strategies.push(Strategy::TitleYear);
        }
        if req.title.is_some() {
            strategies.push(Strategy::TitleFree);
        }

        let mut first_failure: Option<String> = None;
        for group in strategies.chunks(self.race_width) {
            let mut in_flight: FuturesUnordered<_> = group
                .iter()
                .map(|s| {
                    let strategy = *s;
                    async move { (strategy, self.run_attempt(strategy, req).await) }
                })
                .collect();
            while let Some((strategy, outcome)) = in_flight.next().await {
                match outcome {
                    AttemptResult::Found(url) => {
                        info!(strategy = strategy.name(), "link resolved");
                        self.positive.put(
                            key,
                            ResolvedLink {
                                url: url.clone(),
                                strategy: strategy.name(),
                            },
                        );
                        // Remaining in-flight attempts are dropped here.
                        return Ok(Resolution::Found(ResolvedLink {
                            url: decorate(&url, req),
                            strategy: strategy.name(),
                        }));
                    }
                    AttemptResult::NotFound => {
                        debug!(strategy = strategy.name(), "attempt found nothing");
                    }
                    AttemptResult::Failed(cause) => {
                        warn!(strategy = strategy.name(), cause, "attempt failed hard");
                        first_failure.get_or_insert(cause);
                    }
                }
            }
        }

        // A hard upstream error outranks a clean not-found as the cause.
        if let Some(cause) = first_failure {
            bail!("link resolution failed: {cause}");
        }
        self.negative.put(key, ());
        Ok(Resolution::NotFound)
    }

    async fn run_attempt(&self, strategy: Strategy, req: &ResolveRequest) -> AttemptResult {
        match strategy {
            Strategy::ByKinopoisk => {
                let key = DetailKey::Kinopoisk(req.kinopoisk_id.unwrap_or_default());
                self.detail_attempt(&key).await
            }
            Strategy::ByImdb => {
                let key = DetailKey::Imdb(req.imdb_id.clone().unwrap_or_default());
                self.detail_attempt(&key).await
            }
            Strategy::TitleYear => self.search_attempt(req, true).await,
            Strategy::TitleFree => self.search_attempt(req, false).await,
        }
    }

    async fn detail_attempt(&self, key: &DetailKey) -> AttemptResult {
        match self.provider.detail(key).await {
            Ok(Some(detail)) => match detail.iframe_url {
                Some(url) => AttemptResult::Found(url),
                None => AttemptResult::NotFound,
            },
            Ok(None) => AttemptResult::NotFound,
            Err(err) => AttemptResult::Failed(err.to_string()),
        }
    }

    async fn search_attempt(&self, req: &ResolveRequest, require_year: bool) -> AttemptResult {
        let Some(title) = req.title.as_deref() else {
            return AttemptResult::NotFound;
        };
        let query = tokenize(title);
        let candidates: Vec<CatalogVideo> = match self.provider.search(title).await {
            Ok(c) => c,
            Err(err) => return AttemptResult::Failed(err.to_string()),
        };
        let hit = candidates.into_iter().find(|c| {
            if require_year && c.year != req.year {
                return false;
            }
            is_match(&c.title, &query).matched
                || c.orig_title
                    .as_deref()
                    .is_some_and(|t| is_match(t, &query).matched)
        });
        match hit.and_then(|c| c.iframe_url) {
            Some(url) => AttemptResult::Found(url),
            None => AttemptResult::NotFound,
        }
    }
}

/// Append per-request decoration (start time, translation) to a resolved
/// base URL. Decoration never feeds the cache key.
fn decorate(base: &str, req: &ResolveRequest) -> String {
    let Ok(mut url) = url::Url::parse(base) else {
        return base.to_string();
    };
    {
        let mut q = url.query_pairs_mut();
        if let Some(start) = req.start_time {
            q.append_pair("start_time", &start.to_string());
        }
        if let Some(translation) = req.translation.as_deref() {
            q.append_pair("translation", translation);
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VideoDetail;
    use crate::testutil::{video, ScriptedProvider};
    use std::sync::atomic::Ordering;

    fn resolver_with_width(
        provider: ScriptedProvider,
        race_width: usize,
    ) -> (Arc<ScriptedProvider>, LinkResolver) {
        let provider = Arc::new(provider);
        let r = LinkResolver::new(
            provider.clone(),
            Duration::from_secs(300),
            Duration::from_secs(300),
            race_width,
        );
        (provider, r)
    }

    fn resolver(provider: ScriptedProvider) -> (Arc<ScriptedProvider>, LinkResolver) {
        resolver_with_width(provider, 2)
    }

    fn full_request() -> ResolveRequest {
        ResolveRequest {
            kinopoisk_id: Some(301),
            imdb_id: Some("tt0133093".into()),
            title: Some("Матрица".into()),
            year: Some(1999),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn third_strategy_wins_and_is_cached_under_stable_key() {
        let mut hit = video(1, "Матрица", Some(1999));
        hit.iframe_url = Some("https://player.example/e/301".into());
        let scripted = ScriptedProvider {
            search_results: vec![hit],
            ..Default::default()
        };
        // No details scripted: kinopoisk and imdb attempts return NotFound,
        // so the title+year attempt (3rd of 4) resolves. Width 1 keeps the
        // attempt order strict for the assertion.
        let (provider, r) = resolver_with_width(scripted, 1);

        let mut req = full_request();
        req.start_time = Some(120);
        let out = r.resolve(&req).await.unwrap();
        let Resolution::Found(link) = out else { panic!("expected Found") };
        assert_eq!(link.strategy, "title_year");
        assert!(link.url.contains("start_time=120"));

        let searches_after_first = provider.search_calls.load(Ordering::SeqCst);

        // Different decoration, same identifiers: served from positive cache
        // with the new decoration applied.
        let mut req2 = full_request();
        req2.start_time = Some(777);
        let out2 = r.resolve(&req2).await.unwrap();
        let Resolution::Found(link2) = out2 else { panic!("expected Found") };
        assert!(link2.url.contains("start_time=777"));
        assert_eq!(provider.search_calls.load(Ordering::SeqCst), searches_after_first);
        assert_eq!(provider.detail_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clean_not_found_is_negative_cached() {
        let (provider, r) = resolver(ScriptedProvider::default());
        let req = full_request();

        assert_eq!(r.resolve(&req).await.unwrap(), Resolution::NotFound);
        let detail_calls = provider.detail_calls.load(Ordering::SeqCst);
        let search_calls = provider.search_calls.load(Ordering::SeqCst);

        assert_eq!(r.resolve(&req).await.unwrap(), Resolution::NotFound);
        assert_eq!(provider.detail_calls.load(Ordering::SeqCst), detail_calls);
        assert_eq!(provider.search_calls.load(Ordering::SeqCst), search_calls);
    }

    #[tokio::test]
    async fn hard_error_outranks_not_found() {
        let scripted = ScriptedProvider {
            fail_search: true,
            ..Default::default()
        };
        let (_provider, r) = resolver(scripted);
        let err = r.resolve(&full_request()).await;
        assert!(err.is_err());
        assert!(err.unwrap_err().to_string().contains("outage"));
    }

    #[tokio::test]
    async fn missing_identifiers_is_a_hard_caller_error() {
        let (_provider, r) = resolver(ScriptedProvider::default());
        let req = ResolveRequest {
            start_time: Some(10),
            ..Default::default()
        };
        assert!(r.resolve(&req).await.is_err());
    }

    #[tokio::test]
    async fn most_specific_identifier_wins_when_available() {
        let mut scripted = ScriptedProvider::default();
        scripted.details.insert(
            DetailKey::Kinopoisk(301),
            VideoDetail {
                iframe_url: Some("https://player.example/e/kp".into()),
                ..Default::default()
            },
        );
        let (_provider, r) = resolver(scripted);

        let out = r.resolve(&full_request()).await.unwrap();
        let Resolution::Found(link) = out else { panic!("expected Found") };
        assert_eq!(link.strategy, "kinopoisk_id");
        assert_eq!(link.url, "https://player.example/e/kp");
    }
}
