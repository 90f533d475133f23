//! In-memory doubles for the provider and store seams, shared by the sync,
//! search and resolution tests. Compiled only for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::UpstreamError;
use crate::model::{CatalogVideo, SearchFilters, SyncMode, VideoDetail};
use crate::provider::{CatalogProvider, DetailKey, ListFeed, ProviderPage};
use crate::reconcile::merge;
use crate::store::{CatalogStore, INITIAL_CURSOR};

/// Scripted upstream: fixed page sequences, detail map and search results,
/// with call counters so tests can assert lookup budgets.
#[derive(Default)]
pub struct ScriptedProvider {
    pub full_pages: Vec<Vec<CatalogVideo>>,
    pub update_pages: Vec<Vec<CatalogVideo>>,
    pub faceted_pages: Vec<Vec<CatalogVideo>>,
    pub search_results: Vec<CatalogVideo>,
    pub details: HashMap<DetailKey, VideoDetail>,
    /// 1-based page number whose full-feed fetch fails with `Unavailable`.
    pub fail_full_page: Option<i64>,
    pub fail_detail: bool,
    pub fail_search: bool,
    pub reported_last_page: Option<i64>,
    pub detail_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub requested_pages: Mutex<Vec<i64>>,
}

impl ScriptedProvider {
    fn page_of(pages: &[Vec<CatalogVideo>], page: i64) -> Vec<CatalogVideo> {
        if page < 1 {
            return Vec::new();
        }
        pages.get((page - 1) as usize).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CatalogProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn list_page(
        &self,
        feed: ListFeed,
        page: i64,
        _page_size: i64,
    ) -> Result<ProviderPage, UpstreamError> {
        self.requested_pages.lock().unwrap().push(page);
        if feed == ListFeed::Full && self.fail_full_page == Some(page) {
            return Err(UpstreamError::Unavailable("scripted outage".into()));
        }
        let items = match feed {
            ListFeed::Full => Self::page_of(&self.full_pages, page),
            ListFeed::Updates => Self::page_of(&self.update_pages, page),
        };
        Ok(ProviderPage {
            items,
            last_page: self.reported_last_page,
        })
    }

    async fn detail(&self, key: &DetailKey) -> Result<Option<VideoDetail>, UpstreamError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_detail {
            return Err(UpstreamError::Unavailable("scripted detail outage".into()));
        }
        Ok(self.details.get(key).cloned())
    }

    async fn search(&self, _query: &str) -> Result<Vec<CatalogVideo>, UpstreamError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_search {
            return Err(UpstreamError::Unavailable("scripted search outage".into()));
        }
        Ok(self.search_results.clone())
    }

    async fn faceted(
        &self,
        _filters: &SearchFilters,
        page: i64,
        _page_size: i64,
    ) -> Result<ProviderPage, UpstreamError> {
        self.requested_pages.lock().unwrap().push(page);
        Ok(ProviderPage {
            items: Self::page_of(&self.faceted_pages, page),
            last_page: self.reported_last_page,
        })
    }
}

/// Store double applying the same reconciliation semantics as the Postgres
/// upsert's conflict clause.
#[derive(Default)]
pub struct MemoryStore {
    pub rows: Mutex<HashMap<i64, CatalogVideo>>,
    pub cursors: Mutex<HashMap<(String, String), i64>>,
    pub upsert_batches: Mutex<Vec<Vec<i64>>>,
}

impl MemoryStore {
    pub fn snapshot(&self) -> HashMap<i64, CatalogVideo> {
        self.rows.lock().unwrap().clone()
    }

    pub fn cursor(&self, provider: &str, mode: SyncMode) -> Option<i64> {
        self.cursors
            .lock()
            .unwrap()
            .get(&(provider.to_string(), mode.as_str().to_string()))
            .copied()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_videos(
        &self,
        _provider: &str,
        videos: &[CatalogVideo],
        overwrite: bool,
    ) -> Result<u64> {
        self.upsert_batches
            .lock()
            .unwrap()
            .push(videos.iter().map(|v| v.id).collect());
        let mut rows = self.rows.lock().unwrap();
        for v in videos {
            match rows.get_mut(&v.id) {
                Some(existing) if !overwrite => *existing = merge(existing, v),
                _ => {
                    rows.insert(v.id, v.clone());
                }
            }
        }
        Ok(videos.len() as u64)
    }

    async fn load_cursor(&self, provider: &str, mode: SyncMode) -> Result<i64> {
        Ok(self.cursor(provider, mode).unwrap_or(INITIAL_CURSOR))
    }

    async fn save_cursor(&self, provider: &str, mode: SyncMode, position: i64) -> Result<()> {
        self.cursors
            .lock()
            .unwrap()
            .insert((provider.to_string(), mode.as_str().to_string()), position);
        Ok(())
    }

    async fn title_candidates(
        &self,
        _provider: &str,
        pattern: &str,
        limit: i64,
    ) -> Result<Vec<CatalogVideo>> {
        let needle = pattern.trim_matches('%').to_lowercase();
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<CatalogVideo> = rows
            .values()
            .filter(|v| {
                v.title.to_lowercase().contains(&needle)
                    || v.orig_title
                        .as_deref()
                        .is_some_and(|t| t.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        out.sort_by_key(|v| std::cmp::Reverse((v.year.unwrap_or(0), v.id)));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn keyword_candidates(
        &self,
        provider: &str,
        tokens: &[String],
        limit: i64,
    ) -> Result<Vec<CatalogVideo>> {
        let mut out: Vec<CatalogVideo> = Vec::new();
        for token in tokens {
            for v in self
                .title_candidates(provider, &format!("%{token}%"), limit)
                .await?
            {
                if !out.iter().any(|x| x.id == v.id) {
                    out.push(v);
                }
            }
        }
        out.truncate(limit as usize);
        Ok(out)
    }
}

/// Quick fixture builder.
pub fn video(id: i64, title: &str, year: Option<i32>) -> CatalogVideo {
    let mut v = CatalogVideo::bare(id, crate::model::VideoKind::Movie, title);
    v.year = year;
    v
}
