use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool, QueryBuilder, Row,
};
use tracing::{info, instrument};

use super::{CatalogStore, INITIAL_CURSOR};
use crate::model::{CatalogVideo, SyncMode, VideoKind};
use crate::util::env::{db_url, env_parse};

/// Postgres-backed catalog store.
///
/// Assumes an external schema owner; `ensure_schema` only creates the two
/// tables this core writes when they are missing (no migrations run here).
/// Concurrent sync invocations from multiple processes would race on
/// `sync_cursors`; the design assumes a single writer per sync job.
#[derive(Clone)]
pub struct PgCatalogStore {
    pub pool: PgPool,
}

impl PgCatalogStore {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let connect_options = PgConnectOptions::from_str(database_url)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!("connected to catalog db");
        Ok(Self { pool })
    }

    /// Connect using DATABASE_URL / DB_URL, with the pool size from
    /// DB_MAX_CONNECTIONS (default 10).
    pub async fn connect_from_env() -> Result<Self> {
        let url = db_url()?;
        Self::connect(&url, env_parse("DB_MAX_CONNECTIONS", 10u32)).await
    }
}

fn row_to_video(row: &sqlx::postgres::PgRow) -> CatalogVideo {
    let kind: String = row.get("kind");
    CatalogVideo {
        id: row.get("id"),
        kinopoisk_id: row.get("kinopoisk_id"),
        imdb_id: row.get("imdb_id"),
        kind: VideoKind::from_str_loose(&kind).unwrap_or(VideoKind::Movie),
        title: row.get("title"),
        orig_title: row.get("orig_title"),
        year: row.get("year"),
        poster_url: row.get("poster_url"),
        iframe_url: row.get("iframe_url"),
        genres: row.get("genres"),
        countries: row.get("countries"),
        episodes_count: row.get("episodes_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLUMNS: &str = "id, kinopoisk_id, imdb_id, kind, title, orig_title, year, \
     poster_url, iframe_url, genres, countries, episodes_count, created_at, updated_at";

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS videos (
                provider TEXT NOT NULL,
                id BIGINT NOT NULL,
                kinopoisk_id BIGINT,
                imdb_id TEXT,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                orig_title TEXT,
                year INT,
                poster_url TEXT,
                iframe_url TEXT,
                genres TEXT[] NOT NULL DEFAULT '{}',
                countries TEXT[] NOT NULL DEFAULT '{}',
                episodes_count INT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (provider, id)
             );
             CREATE INDEX IF NOT EXISTS videos_kinopoisk_idx ON videos (kinopoisk_id);
             CREATE TABLE IF NOT EXISTS sync_cursors (
                provider TEXT NOT NULL,
                mode TEXT NOT NULL,
                position BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (provider, mode)
             );",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, videos), fields(batch = videos.len()))]
    async fn upsert_videos(
        &self,
        provider: &str,
        videos: &[CatalogVideo],
        overwrite: bool,
    ) -> Result<u64> {
        if videos.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO videos (provider, id, kinopoisk_id, imdb_id, kind, title, orig_title, \
             year, poster_url, iframe_url, genres, countries, episodes_count, created_at, updated_at) ",
        );
        qb.push_values(videos, |mut b, v| {
            b.push_bind(provider)
                .push_bind(v.id)
                .push_bind(v.kinopoisk_id)
                .push_bind(v.imdb_id.as_ref())
                .push_bind(v.kind.as_str())
                .push_bind(&v.title)
                .push_bind(v.orig_title.as_ref())
                .push_bind(v.year)
                .push_bind(v.poster_url.as_ref())
                .push_bind(v.iframe_url.as_ref())
                .push_bind(&v.genres)
                .push_bind(&v.countries)
                .push_bind(v.episodes_count)
                .push_bind(v.created_at)
                .push_bind(v.updated_at);
        });
        if overwrite {
            // Explicit full-resync reset: incoming values win, including nulls.
            qb.push(
                " ON CONFLICT (provider, id) DO UPDATE SET
                    kinopoisk_id = EXCLUDED.kinopoisk_id,
                    imdb_id = EXCLUDED.imdb_id,
                    title = EXCLUDED.title,
                    orig_title = EXCLUDED.orig_title,
                    year = EXCLUDED.year,
                    poster_url = EXCLUDED.poster_url,
                    iframe_url = EXCLUDED.iframe_url,
                    genres = EXCLUDED.genres,
                    countries = EXCLUDED.countries,
                    episodes_count = EXCLUDED.episodes_count,
                    updated_at = EXCLUDED.updated_at",
            );
        } else {
            // Mirrors reconcile::merge: scalars coalesce with the stored value
            // preferred, sets union, identity/kind stay as created.
            qb.push(
                " ON CONFLICT (provider, id) DO UPDATE SET
                    kinopoisk_id = COALESCE(videos.kinopoisk_id, EXCLUDED.kinopoisk_id),
                    imdb_id = COALESCE(videos.imdb_id, EXCLUDED.imdb_id),
                    orig_title = COALESCE(videos.orig_title, EXCLUDED.orig_title),
                    year = COALESCE(videos.year, EXCLUDED.year),
                    poster_url = COALESCE(videos.poster_url, EXCLUDED.poster_url),
                    iframe_url = COALESCE(videos.iframe_url, EXCLUDED.iframe_url),
                    genres = ARRAY(SELECT DISTINCT g FROM unnest(videos.genres || EXCLUDED.genres) AS g),
                    countries = ARRAY(SELECT DISTINCT c FROM unnest(videos.countries || EXCLUDED.countries) AS c),
                    episodes_count = COALESCE(videos.episodes_count, EXCLUDED.episodes_count),
                    updated_at = GREATEST(videos.updated_at, EXCLUDED.updated_at)",
            );
        }
        let result = qb.build().persistent(false).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn load_cursor(&self, provider: &str, mode: SyncMode) -> Result<i64> {
        let position: Option<i64> = sqlx::query_scalar(
            "SELECT position FROM sync_cursors WHERE provider = $1 AND mode = $2",
        )
        .persistent(false)
        .bind(provider)
        .bind(mode.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(position.unwrap_or(INITIAL_CURSOR))
    }

    async fn save_cursor(&self, provider: &str, mode: SyncMode, position: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_cursors (provider, mode, position, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (provider, mode)
             DO UPDATE SET position = EXCLUDED.position, updated_at = now()",
        )
        .persistent(false)
        .bind(provider)
        .bind(mode.as_str())
        .bind(position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn title_candidates(
        &self,
        provider: &str,
        pattern: &str,
        limit: i64,
    ) -> Result<Vec<CatalogVideo>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM videos
             WHERE provider = $1 AND (title ILIKE $2 OR orig_title ILIKE $2)
             ORDER BY year DESC NULLS LAST, id DESC
             LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .persistent(false)
            .bind(provider)
            .bind(pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_video).collect())
    }

    async fn keyword_candidates(
        &self,
        provider: &str,
        tokens: &[String],
        limit: i64,
    ) -> Result<Vec<CatalogVideo>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new(format!("SELECT {SELECT_COLUMNS} FROM videos WHERE provider = "));
        qb.push_bind(provider);
        qb.push(" AND (");
        for (i, token) in tokens.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            let pattern = format!("%{token}%");
            qb.push("title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR orig_title ILIKE ")
                .push_bind(pattern);
        }
        qb.push(") ORDER BY year DESC NULLS LAST, id DESC LIMIT ");
        qb.push_bind(limit);
        let rows = qb.build().persistent(false).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_video).collect())
    }
}
