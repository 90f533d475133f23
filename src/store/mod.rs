//! Persistent store collaborator.
//!
//! The storage engine itself is external; the core only needs upsert-on-
//! conflict writes, cursor persistence and candidate reads. Those live behind
//! [`CatalogStore`] so the sync/search paths can be exercised against an
//! in-memory double in tests.

pub mod pg;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{CatalogVideo, SyncMode};

pub use pg::PgCatalogStore;

/// First page of any paginated upstream listing.
pub const INITIAL_CURSOR: i64 = 1;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Create tables lazily if missing. Idempotent.
    async fn ensure_schema(&self) -> Result<()>;

    /// Upsert a pre-deduplicated batch. With `overwrite` false the conflict
    /// clause applies coalesce/union reconciliation (fields fill
    /// monotonically); with `overwrite` true (explicit full-resync reset)
    /// incoming values replace stored ones.
    async fn upsert_videos(
        &self,
        provider: &str,
        videos: &[CatalogVideo],
        overwrite: bool,
    ) -> Result<u64>;

    /// Persisted resumable position for (provider, mode); `INITIAL_CURSOR`
    /// when none exists yet.
    async fn load_cursor(&self, provider: &str, mode: SyncMode) -> Result<i64>;

    async fn save_cursor(&self, provider: &str, mode: SyncMode, position: i64) -> Result<()>;

    /// Records whose localized or original title matches the LIKE pattern.
    async fn title_candidates(
        &self,
        provider: &str,
        pattern: &str,
        limit: i64,
    ) -> Result<Vec<CatalogVideo>>;

    /// Records matching any of the given tokens in either title column.
    async fn keyword_candidates(
        &self,
        provider: &str,
        tokens: &[String],
        limit: i64,
    ) -> Result<Vec<CatalogVideo>>;
}
