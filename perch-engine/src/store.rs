//! SQLite-backed ingest store.
//!
//! Three tables: `watch_accounts` (the long-term watchlist, keyed by handle),
//! `posts` (keyed by the service-assigned post id), and the priority pair
//! `priority_accounts` / `priority_posts` fed by the discovery pipeline.
//!
//! Upsert contract: a row's identity and authored content never change once
//! written; re-ingesting an existing post updates engagement counters only.
//! Every write is idempotent so the sweeps can re-run without bookkeeping.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use perch_social::{ContentItem, ProfileData};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS watch_accounts (
    handle            TEXT PRIMARY KEY,
    remote_id         TEXT,
    display_name      TEXT NOT NULL DEFAULT '',
    bio               TEXT NOT NULL DEFAULT '',
    avatar_url        TEXT NOT NULL DEFAULT '',
    location          TEXT NOT NULL DEFAULT '',
    website           TEXT NOT NULL DEFAULT '',
    joined            TEXT,
    followers         INTEGER NOT NULL DEFAULT 0,
    following         INTEGER NOT NULL DEFAULT 0,
    posts_count       INTEGER NOT NULL DEFAULT 0,
    verified          INTEGER NOT NULL DEFAULT 0,
    private           INTEGER NOT NULL DEFAULT 0,
    last_profile_sync TEXT,
    last_content_sync TEXT
);

CREATE TABLE IF NOT EXISTS posts (
    id            TEXT PRIMARY KEY,
    author_id     TEXT NOT NULL,
    author_handle TEXT NOT NULL,
    author_name   TEXT NOT NULL DEFAULT '',
    text          TEXT NOT NULL DEFAULT '',
    posted_at     TEXT,
    permalink     TEXT NOT NULL DEFAULT '',
    likes         INTEGER NOT NULL DEFAULT 0,
    replies       INTEGER NOT NULL DEFAULT 0,
    reposts       INTEGER NOT NULL DEFAULT 0,
    views         INTEGER NOT NULL DEFAULT 0,
    is_reply      INTEGER NOT NULL DEFAULT 0,
    is_repost     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS priority_accounts (
    handle    TEXT PRIMARY KEY,
    remote_id TEXT,
    followers INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS priority_posts (
    id            TEXT PRIMARY KEY,
    owner_handle  TEXT NOT NULL,
    author_id     TEXT NOT NULL,
    author_handle TEXT NOT NULL,
    author_name   TEXT NOT NULL DEFAULT '',
    text          TEXT NOT NULL DEFAULT '',
    posted_at     TEXT,
    permalink     TEXT NOT NULL DEFAULT '',
    likes         INTEGER NOT NULL DEFAULT 0,
    replies       INTEGER NOT NULL DEFAULT 0,
    reposts       INTEGER NOT NULL DEFAULT 0,
    views         INTEGER NOT NULL DEFAULT 0,
    is_reply      INTEGER NOT NULL DEFAULT 0,
    is_repost     INTEGER NOT NULL DEFAULT 0
);
"#;

#[derive(Clone)]
pub struct IngestStore {
    pool: SqlitePool,
}

impl IngestStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new().connect(url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the schema if it does not exist yet. Safe to run on every start.
    pub async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("store.migrated");
        Ok(())
    }

    /// Add a handle to the watchlist; an existing row is left untouched.
    pub async fn add_watch_account(&self, handle: &str) -> Result<()> {
        let res = sqlx::query(
            r#"INSERT INTO watch_accounts (handle) VALUES (?1)
               ON CONFLICT(handle) DO NOTHING"#,
        )
        .bind(handle)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() > 0 {
            info!(handle, "store.watch_account_added");
        }
        Ok(())
    }

    pub async fn watch_handles(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(r#"SELECT handle FROM watch_accounts ORDER BY handle"#)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| r.try_get("handle").map_err(Into::into))
            .collect()
    }

    /// Watchlist rows that have never had a profile ingested.
    pub async fn accounts_missing_profile(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"SELECT handle FROM watch_accounts WHERE remote_id IS NULL ORDER BY handle"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| r.try_get("handle").map_err(Into::into))
            .collect()
    }

    /// Write a full profile snapshot and stamp the sync time. Every field is
    /// refreshed: profiles have no immutable portion besides the handle key.
    pub async fn upsert_profile(&self, profile: &ProfileData) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let res = sqlx::query(
            r#"INSERT INTO watch_accounts
               (handle, remote_id, display_name, bio, avatar_url, location, website,
                joined, followers, following, posts_count, verified, private,
                last_profile_sync)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
               ON CONFLICT(handle) DO UPDATE SET
                 remote_id=excluded.remote_id,
                 display_name=excluded.display_name,
                 bio=excluded.bio,
                 avatar_url=excluded.avatar_url,
                 location=excluded.location,
                 website=excluded.website,
                 joined=excluded.joined,
                 followers=excluded.followers,
                 following=excluded.following,
                 posts_count=excluded.posts_count,
                 verified=excluded.verified,
                 private=excluded.private,
                 last_profile_sync=excluded.last_profile_sync"#,
        )
        .bind(&profile.handle)
        .bind(&profile.remote_id)
        .bind(&profile.display_name)
        .bind(&profile.bio)
        .bind(&profile.avatar_url)
        .bind(&profile.location)
        .bind(&profile.website)
        .bind(profile.joined.map(|t| t.to_rfc3339()))
        .bind(profile.followers)
        .bind(profile.following)
        .bind(profile.posts_count)
        .bind(profile.verified)
        .bind(profile.private)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        debug!(
            handle = profile.handle,
            rows = res.rows_affected(),
            "store.upsert_profile"
        );
        Ok(())
    }

    /// Ingest one post. First write stores everything; later writes refresh
    /// engagement counters only.
    pub async fn upsert_post(&self, item: &ContentItem) -> Result<()> {
        let res = sqlx::query(
            r#"INSERT INTO posts
               (id, author_id, author_handle, author_name, text, posted_at, permalink,
                likes, replies, reposts, views, is_reply, is_repost)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
               ON CONFLICT(id) DO UPDATE SET
                 likes=excluded.likes,
                 replies=excluded.replies,
                 reposts=excluded.reposts,
                 views=excluded.views"#,
        )
        .bind(&item.id)
        .bind(&item.author_id)
        .bind(&item.author_handle)
        .bind(&item.author_name)
        .bind(&item.text)
        .bind(item.posted_at.map(|t| t.to_rfc3339()))
        .bind(&item.permalink)
        .bind(item.likes)
        .bind(item.replies)
        .bind(item.reposts)
        .bind(item.views)
        .bind(item.is_reply)
        .bind(item.is_repost)
        .execute(&self.pool)
        .await?;
        debug!(id = item.id, rows = res.rows_affected(), "store.upsert_post");
        Ok(())
    }

    pub async fn mark_content_synced(&self, handle: &str) -> Result<()> {
        sqlx::query(r#"UPDATE watch_accounts SET last_content_sync = ?1 WHERE handle = ?2"#)
            .bind(Utc::now().to_rfc3339())
            .bind(handle)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Register (or refresh) a discovered priority account.
    pub async fn add_priority_account(
        &self,
        handle: &str,
        remote_id: Option<&str>,
        followers: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO priority_accounts (handle, remote_id, followers)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(handle) DO UPDATE SET
                 remote_id=COALESCE(excluded.remote_id, priority_accounts.remote_id),
                 followers=excluded.followers"#,
        )
        .bind(handle)
        .bind(remote_id)
        .bind(followers)
        .execute(&self.pool)
        .await?;
        debug!(handle, "store.priority_account_upserted");
        Ok(())
    }

    pub async fn priority_handles(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(r#"SELECT handle FROM priority_accounts ORDER BY handle"#)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| r.try_get("handle").map_err(Into::into))
            .collect()
    }

    pub async fn priority_remote_id(&self, handle: &str) -> Result<Option<String>> {
        let row = sqlx::query(r#"SELECT remote_id FROM priority_accounts WHERE handle = ?1"#)
            .bind(handle)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(r.try_get("remote_id")?),
            None => Ok(None),
        }
    }

    /// Same contract as [`upsert_post`], kept in its own table so priority
    /// traffic never mixes with the watchlist corpus.
    ///
    /// [`upsert_post`]: IngestStore::upsert_post
    pub async fn upsert_priority_post(&self, owner_handle: &str, item: &ContentItem) -> Result<()> {
        let res = sqlx::query(
            r#"INSERT INTO priority_posts
               (id, owner_handle, author_id, author_handle, author_name, text, posted_at,
                permalink, likes, replies, reposts, views, is_reply, is_repost)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
               ON CONFLICT(id) DO UPDATE SET
                 likes=excluded.likes,
                 replies=excluded.replies,
                 reposts=excluded.reposts,
                 views=excluded.views"#,
        )
        .bind(&item.id)
        .bind(owner_handle)
        .bind(&item.author_id)
        .bind(&item.author_handle)
        .bind(&item.author_name)
        .bind(&item.text)
        .bind(item.posted_at.map(|t| t.to_rfc3339()))
        .bind(&item.permalink)
        .bind(item.likes)
        .bind(item.replies)
        .bind(item.reposts)
        .bind(item.views)
        .bind(item.is_reply)
        .bind(item.is_repost)
        .execute(&self.pool)
        .await?;
        debug!(
            id = item.id,
            owner_handle,
            rows = res.rows_affected(),
            "store.upsert_priority_post"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{memory_store, ScriptedCapability};

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = memory_store().await;
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn watchlist_seeding_ignores_duplicates() {
        let store = memory_store().await;
        store.add_watch_account("alpha").await.unwrap();
        store.add_watch_account("beta").await.unwrap();
        store.add_watch_account("alpha").await.unwrap();

        assert_eq!(store.watch_handles().await.unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn profile_ingest_clears_the_missing_set() {
        let store = memory_store().await;
        store.add_watch_account("alpha").await.unwrap();
        store.add_watch_account("beta").await.unwrap();

        assert_eq!(
            store.accounts_missing_profile().await.unwrap(),
            vec!["alpha", "beta"]
        );

        store
            .upsert_profile(&ScriptedCapability::profile("alpha", "id-1"))
            .await
            .unwrap();

        assert_eq!(store.accounts_missing_profile().await.unwrap(), vec!["beta"]);
    }

    #[tokio::test]
    async fn post_reingest_updates_engagement_but_not_content() {
        let store = memory_store().await;

        let mut item = ScriptedCapability::post("p1", "alpha", 5);
        store.upsert_post(&item).await.unwrap();

        item.likes = 50;
        item.views = 900;
        item.text = "edited after the fact".into();
        store.upsert_post(&item).await.unwrap();

        let row = sqlx::query(r#"SELECT text, likes, views FROM posts WHERE id = 'p1'"#)
            .fetch_one(store.pool())
            .await
            .unwrap();
        // Content stays at first write; counters follow the latest fetch.
        assert_eq!(row.try_get::<String, _>("text").unwrap(), "post p1");
        assert_eq!(row.try_get::<i64, _>("likes").unwrap(), 50);
        assert_eq!(row.try_get::<i64, _>("views").unwrap(), 900);

        let count = sqlx::query(r#"SELECT COUNT(*) AS n FROM posts"#)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.try_get::<i64, _>("n").unwrap(), 1);
    }

    #[tokio::test]
    async fn priority_accounts_keep_remote_id_across_refreshes() {
        let store = memory_store().await;
        store
            .add_priority_account("gamma", Some("id-9"), 100)
            .await
            .unwrap();
        // A later refresh without an id must not erase the stored one.
        store.add_priority_account("gamma", None, 250).await.unwrap();

        assert_eq!(
            store.priority_remote_id("gamma").await.unwrap(),
            Some("id-9".to_string())
        );
        assert_eq!(store.priority_handles().await.unwrap(), vec!["gamma"]);
    }

    #[tokio::test]
    async fn priority_posts_share_the_upsert_contract() {
        let store = memory_store().await;

        let mut item = ScriptedCapability::post("pp1", "gamma", 1);
        store.upsert_priority_post("gamma", &item).await.unwrap();
        item.likes = 7;
        store.upsert_priority_post("gamma", &item).await.unwrap();

        let row = sqlx::query(r#"SELECT owner_handle, likes FROM priority_posts WHERE id = 'pp1'"#)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.try_get::<String, _>("owner_handle").unwrap(), "gamma");
        assert_eq!(row.try_get::<i64, _>("likes").unwrap(), 7);
    }
}
