//! Work Store (C6), §4.6: durable queue state backing the Claim Engine and
//! the three processors. SQLite in WAL mode with foreign keys enforced and
//! cascading deletes, per the original worker's `db.py::get_connection`.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use migrate_core::{ArticleStatus, MediaType, MigrationStatus, PostStatus, PostType, ProfilePublished};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("row not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Thin wrapper around a single `rusqlite::Connection`, serialized behind a
/// mutex: one connection, CRUD methods, no pooling. The worker is
/// single-process (§5).
pub struct Store {
    conn: Mutex<Connection>,
    db_dir: std::path::PathBuf,
}

#[derive(Debug, Clone)]
pub struct MigrationRow {
    pub id: String,
    pub ig_handle: String,
    pub claim_token: String,
    pub email: Option<String>,
    pub status: MigrationStatus,
    pub pubkey: String,
    pub retry_count: u32,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: String,
    pub migration_id: String,
    pub post_type: PostType,
    pub source_url: String,
    pub caption: Option<String>,
    pub original_date: Option<String>,
    pub status: PostStatus,
    pub retry_count: u32,
}

#[derive(Debug, Clone)]
pub struct MediaItemRow {
    pub id: String,
    pub post_id: String,
    pub source_url: String,
    pub media_type: MediaType,
    pub order_index: i64,
    pub uploaded_url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ArticleRow {
    pub id: String,
    pub migration_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub markdown: String,
    pub header_image_url: Option<String>,
    pub blossom_image_url: Option<String>,
    pub inline_image_urls: std::collections::BTreeMap<String, String>,
    pub hashtags: Vec<String>,
    pub published_at: Option<i64>,
    pub link: String,
    pub status: ArticleStatus,
    pub upload_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub id: String,
    pub migration_id: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub published: ProfilePublished,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let db_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| Path::new(".").to_path_buf());
        if !db_dir.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(&db_dir);
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self { conn: Mutex::new(conn), db_dir };
        store.migrate()?;
        Ok(store)
    }

    pub fn database_dir(&self) -> std::path::PathBuf {
        self.db_dir.clone()
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS migrations (
                id           TEXT PRIMARY KEY,
                ig_handle    TEXT NOT NULL,
                claim_token  TEXT NOT NULL UNIQUE,
                email        TEXT,
                status       TEXT NOT NULL DEFAULT 'pending',
                pubkey       TEXT NOT NULL,
                secret_key   BLOB,
                retry_count  INTEGER NOT NULL DEFAULT 0,
                claimed_at   TEXT,
                created_at   TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS posts (
                id            TEXT PRIMARY KEY,
                migration_id  TEXT NOT NULL REFERENCES migrations(id) ON DELETE CASCADE,
                post_type     TEXT NOT NULL,
                source_url    TEXT NOT NULL,
                caption       TEXT,
                original_date TEXT,
                status        TEXT NOT NULL DEFAULT 'pending',
                retry_count   INTEGER NOT NULL DEFAULT 0,
                claimed_at    TEXT,
                published_event_id TEXT,
                created_at    TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at    TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS media_items (
                id            TEXT PRIMARY KEY,
                post_id       TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                source_url    TEXT NOT NULL,
                media_type    TEXT NOT NULL,
                order_index   INTEGER NOT NULL DEFAULT 0,
                uploaded_url  TEXT,
                width         INTEGER,
                height        INTEGER,
                sha256        TEXT
            );

            CREATE TABLE IF NOT EXISTS articles (
                id                TEXT PRIMARY KEY,
                migration_id      TEXT NOT NULL REFERENCES migrations(id) ON DELETE CASCADE,
                title             TEXT NOT NULL,
                summary           TEXT,
                markdown          TEXT NOT NULL,
                header_image_url  TEXT,
                blossom_image_url TEXT,
                inline_image_urls TEXT NOT NULL DEFAULT '{}',
                hashtags          TEXT NOT NULL DEFAULT '[]',
                published_at      INTEGER,
                link              TEXT NOT NULL,
                status            TEXT NOT NULL DEFAULT 'pending',
                upload_attempts   INTEGER NOT NULL DEFAULT 0,
                claimed_at        TEXT,
                published_event_id TEXT,
                created_at        TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS profiles (
                id            TEXT PRIMARY KEY,
                migration_id  TEXT NOT NULL UNIQUE REFERENCES migrations(id) ON DELETE CASCADE,
                display_name  TEXT,
                bio           TEXT,
                avatar_url    TEXT,
                published     INTEGER NOT NULL DEFAULT 0,
                claimed_at    TEXT,
                created_at    TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at    TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_posts_migration ON posts(migration_id);
            CREATE INDEX IF NOT EXISTS idx_posts_status ON posts(status);
            CREATE INDEX IF NOT EXISTS idx_media_post ON media_items(post_id);
            CREATE INDEX IF NOT EXISTS idx_articles_status ON articles(status);
            CREATE INDEX IF NOT EXISTS idx_migrations_status ON migrations(status);
            "#,
        )?;
        Ok(())
    }

    // -- Migrations ------------------------------------------------------

    pub fn insert_migration(&self, row: &MigrationRow, secret_key: Option<&[u8; 32]>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO migrations (id, ig_handle, claim_token, email, status, pubkey, secret_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.id,
                row.ig_handle,
                row.claim_token,
                row.email,
                status_str(row.status),
                row.pubkey,
                secret_key.map(|b| b.to_vec()),
            ],
        )?;
        Ok(())
    }

    pub fn get_migration(&self, id: &str) -> Result<MigrationRow> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, ig_handle, claim_token, email, status, pubkey, retry_count
             FROM migrations WHERE id = ?1",
            params![id],
            row_to_migration,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
            other => StoreError::Sqlite(other),
        })
    }

    pub fn get_migration_secret_key(&self, id: &str) -> Result<Option<[u8; 32]>> {
        let conn = self.conn.lock().unwrap();
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT secret_key FROM migrations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(bytes.and_then(|b| b.try_into().ok()))
    }

    /// Atomically claims one pending migration, returning it if one existed.
    /// Mirrors the original worker's `UPDATE ... WHERE status = 'pending'`
    /// compare-and-set pattern (§4.7).
    pub fn claim_migration(&self) -> Result<Option<MigrationRow>> {
        let conn = self.conn.lock().unwrap();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM migrations WHERE status = 'pending' ORDER BY created_at LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = id else { return Ok(None) };
        let updated = conn.execute(
            "UPDATE migrations SET status = 'processing', claimed_at = datetime('now'), updated_at = datetime('now')
             WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        drop(conn);
        self.get_migration(&id).map(Some)
    }

    pub fn set_migration_status(&self, id: &str, status: MigrationStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE migrations SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![id, status_str(status)],
        )?;
        Ok(())
    }

    pub fn increment_migration_retry(&self, id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE migrations SET retry_count = retry_count + 1, updated_at = datetime('now') WHERE id = ?1",
            params![id],
        )?;
        conn.query_row("SELECT retry_count FROM migrations WHERE id = ?1", params![id], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u32)
        .map_err(StoreError::from)
    }

    /// Resets migrations stuck `processing` past `timeout_minutes` back to
    /// `pending` (§4.7 stale recovery). Returns the number reset.
    pub fn recover_stale_migrations(&self, timeout_minutes: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::minutes(timeout_minutes);
        let mut stmt = conn.prepare(
            "SELECT id FROM migrations WHERE status = 'processing' AND claimed_at < ?1",
        )?;
        let stale_ids: Vec<String> = stmt
            .query_map(params![cutoff.to_rfc3339()], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        conn.execute(
            "UPDATE migrations SET status = 'pending', claimed_at = NULL, updated_at = datetime('now')
             WHERE status = 'processing' AND claimed_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(stale_ids)
    }

    pub fn migrations_by_status(&self, status: MigrationStatus) -> Result<Vec<MigrationRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, ig_handle, claim_token, email, status, pubkey, retry_count
             FROM migrations WHERE status = ?1",
        )?;
        let rows = stmt
            .query_map(params![status_str(status)], row_to_migration)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// §3: "A Migration becomes complete when every owned Post and Article
    /// is terminal." A Migration with no children at all is vacuously
    /// terminal (e.g. profile-only migrations).
    pub fn migration_children_are_terminal(&self, migration_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let non_terminal_posts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE migration_id = ?1 AND status NOT IN ('complete', 'error')",
            params![migration_id],
            |row| row.get(0),
        )?;
        if non_terminal_posts > 0 {
            return Ok(false);
        }
        let non_terminal_articles: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE migration_id = ?1 AND status NOT IN ('complete', 'ready', 'error')",
            params![migration_id],
            |row| row.get(0),
        )?;
        Ok(non_terminal_articles == 0)
    }

    /// Marks a Migration `complete` and scrubs its secret key (§3 invariant:
    /// "`secret_key` is cleared ... when status transitions to a terminal
    /// state"). The sentinel is shorter than a real 32-byte secret, so
    /// [`Store::get_migration_secret_key`] fails to convert it and callers
    /// correctly see no usable stored key.
    pub fn complete_migration(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE migrations SET status = 'complete', secret_key = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![id, migrate_core::types::SCRUBBED_SECRET_SENTINEL.as_bytes()],
        )?;
        Ok(())
    }

    // -- Posts -------------------------------------------------------------

    pub fn insert_post(&self, row: &PostRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO posts (id, migration_id, post_type, source_url, caption, original_date, status, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.id,
                row.migration_id,
                post_type_str(row.post_type),
                row.source_url,
                row.caption,
                row.original_date,
                post_status_str(row.status),
                row.retry_count,
            ],
        )?;
        Ok(())
    }

    pub fn claim_posts(&self, limit: usize) -> Result<Vec<PostRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM posts WHERE status = 'pending' ORDER BY created_at LIMIT ?1",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let updated = conn.execute(
                "UPDATE posts SET status = 'processing', claimed_at = datetime('now'), updated_at = datetime('now')
                 WHERE id = ?1 AND status = 'pending'",
                params![id],
            )?;
            if updated == 1 {
                let row = conn.query_row(
                    "SELECT id, migration_id, post_type, source_url, caption, original_date, status, retry_count
                     FROM posts WHERE id = ?1",
                    params![id],
                    row_to_post,
                )?;
                claimed.push(row);
            }
        }
        Ok(claimed)
    }

    pub fn set_post_status(&self, id: &str, status: PostStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE posts SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![id, post_status_str(status)],
        )?;
        Ok(())
    }

    pub fn set_post_published(&self, id: &str, event_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE posts SET status = 'complete', published_event_id = ?2, updated_at = datetime('now')
             WHERE id = ?1",
            params![id, event_id],
        )?;
        Ok(())
    }

    pub fn increment_post_retry(&self, id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE posts SET retry_count = retry_count + 1, updated_at = datetime('now') WHERE id = ?1",
            params![id],
        )?;
        conn.query_row("SELECT retry_count FROM posts WHERE id = ?1", params![id], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u32)
        .map_err(StoreError::from)
    }

    pub fn posts_for_migration(&self, migration_id: &str) -> Result<Vec<PostRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, migration_id, post_type, source_url, caption, original_date, status, retry_count
             FROM posts WHERE migration_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![migration_id], row_to_post)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Resets a Post's retry bookkeeping when its parent Migration resets
    /// (§4.8 edge case: "Post retries reset when the parent Migration resets").
    pub fn reset_posts_for_migration(&self, migration_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE posts SET status = 'pending', claimed_at = NULL, updated_at = datetime('now')
             WHERE migration_id = ?1 AND status IN ('processing', 'uploading', 'publishing')",
            params![migration_id],
        )?;
        Ok(())
    }

    // -- Media items ---------------------------------------------------------

    pub fn insert_media_item(&self, row: &MediaItemRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO media_items (id, post_id, source_url, media_type, order_index, uploaded_url, width, height)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.id,
                row.post_id,
                row.source_url,
                media_type_str(row.media_type),
                row.order_index,
                row.uploaded_url,
                row.width,
                row.height,
            ],
        )?;
        Ok(())
    }

    pub fn media_items_for_post(&self, post_id: &str) -> Result<Vec<MediaItemRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, post_id, source_url, media_type, order_index, uploaded_url, width, height
             FROM media_items WHERE post_id = ?1 ORDER BY order_index",
        )?;
        let rows = stmt
            .query_map(params![post_id], row_to_media_item)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    pub fn set_media_item_uploaded_url(&self, id: &str, url: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE media_items SET uploaded_url = ?2 WHERE id = ?1",
            params![id, url],
        )?;
        Ok(())
    }

    /// Clears every MediaItem's `uploaded_url` for a Post, so a terminal
    /// non-`complete` Post never carries `len(blossom_urls) ==
    /// len(media_items)` (§8: that equality holds iff `status == complete`).
    pub fn clear_media_item_uploaded_urls(&self, post_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE media_items SET uploaded_url = NULL WHERE post_id = ?1",
            params![post_id],
        )?;
        Ok(())
    }

    // -- Articles --------------------------------------------------------

    pub fn insert_article(&self, row: &ArticleRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let hashtags_json = serde_json::to_string(&row.hashtags).unwrap_or_else(|_| "[]".to_string());
        let inline_json = serde_json::to_string(&row.inline_image_urls).unwrap_or_else(|_| "{}".to_string());
        conn.execute(
            "INSERT INTO articles (id, migration_id, title, summary, markdown, header_image_url, blossom_image_url, inline_image_urls, hashtags, published_at, link, status, upload_attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                row.id,
                row.migration_id,
                row.title,
                row.summary,
                row.markdown,
                row.header_image_url,
                row.blossom_image_url,
                inline_json,
                hashtags_json,
                row.published_at,
                row.link,
                article_status_str(row.status),
                row.upload_attempts,
            ],
        )?;
        Ok(())
    }

    const ARTICLE_COLUMNS: &'static str =
        "id, migration_id, title, summary, markdown, header_image_url, blossom_image_url, inline_image_urls, hashtags, published_at, link, status, upload_attempts";

    pub fn claim_articles(&self, limit: usize) -> Result<Vec<ArticleRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM articles WHERE status = 'pending' ORDER BY created_at LIMIT ?1",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let updated = conn.execute(
                "UPDATE articles SET status = 'processing', claimed_at = datetime('now'), updated_at = datetime('now')
                 WHERE id = ?1 AND status = 'pending'",
                params![id],
            )?;
            if updated == 1 {
                let row = conn.query_row(
                    &format!("SELECT {} FROM articles WHERE id = ?1", Self::ARTICLE_COLUMNS),
                    params![id],
                    row_to_article,
                )?;
                claimed.push(row);
            }
        }
        Ok(claimed)
    }

    pub fn set_article_status(&self, id: &str, status: ArticleStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE articles SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![id, article_status_str(status)],
        )?;
        Ok(())
    }

    /// Persists in-flight upload progress (§4.9 step 5) so a subsequent
    /// attempt does not re-upload images that already succeeded: the
    /// rewritten Markdown already has their CDN URLs replaced, and
    /// `extract()` skips anything already pointing at a blob origin.
    pub fn persist_article_progress(
        &self,
        id: &str,
        markdown: &str,
        blossom_image_url: Option<&str>,
        inline_image_urls: &std::collections::BTreeMap<String, String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let inline_json =
            serde_json::to_string(inline_image_urls).unwrap_or_else(|_| "{}".to_string());
        conn.execute(
            "UPDATE articles SET markdown = ?2, blossom_image_url = ?3, inline_image_urls = ?4, updated_at = datetime('now')
             WHERE id = ?1",
            params![id, markdown, blossom_image_url, inline_json],
        )?;
        Ok(())
    }

    pub fn set_article_published(&self, id: &str, event_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE articles SET status = 'complete', published_event_id = ?2, updated_at = datetime('now')
             WHERE id = ?1",
            params![id, event_id],
        )?;
        Ok(())
    }

    pub fn increment_article_upload_attempts(&self, id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE articles SET upload_attempts = upload_attempts + 1, updated_at = datetime('now') WHERE id = ?1",
            params![id],
        )?;
        conn.query_row("SELECT upload_attempts FROM articles WHERE id = ?1", params![id], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u32)
        .map_err(StoreError::from)
    }

    /// Resets Articles stuck `processing` past `timeout_minutes` back to
    /// `pending` (§4.7 stale recovery, mirroring Migrations and Profiles).
    /// Without this an Article that crashes mid-upload stays `processing`
    /// forever, which also blocks its Migration from reaching `complete`
    /// (`migration_children_are_terminal` never sees it leave a non-terminal
    /// status).
    pub fn recover_stale_articles(&self, timeout_minutes: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::minutes(timeout_minutes);
        let n = conn.execute(
            "UPDATE articles SET status = 'pending', claimed_at = NULL, updated_at = datetime('now')
             WHERE status = 'processing' AND claimed_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }

    // -- Profiles ----------------------------------------------------------

    pub fn insert_profile(&self, row: &ProfileRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO profiles (id, migration_id, display_name, bio, avatar_url, published)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id,
                row.migration_id,
                row.display_name,
                row.bio,
                row.avatar_url,
                profile_published_value(row.published),
            ],
        )?;
        Ok(())
    }

    /// Claims one Profile whose `published` is `Unpublished` (0), matching
    /// `db.py::get_jobs_with_unpublished_profiles` (§4.10).
    pub fn claim_profile(&self) -> Result<Option<ProfileRow>> {
        let conn = self.conn.lock().unwrap();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM profiles WHERE published = 0 ORDER BY created_at LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = id else { return Ok(None) };
        let updated = conn.execute(
            "UPDATE profiles SET published = -1, claimed_at = datetime('now'), updated_at = datetime('now')
             WHERE id = ?1 AND published = 0",
            params![id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let row = conn.query_row(
            "SELECT id, migration_id, display_name, bio, avatar_url, published
             FROM profiles WHERE id = ?1",
            params![id],
            row_to_profile,
        )?;
        Ok(Some(row))
    }

    pub fn set_profile_avatar(&self, id: &str, avatar_url: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE profiles SET avatar_url = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![id, avatar_url],
        )?;
        Ok(())
    }

    pub fn set_profile_published(&self, id: &str, published: ProfilePublished) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE profiles SET published = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![id, profile_published_value(published)],
        )?;
        Ok(())
    }

    pub fn recover_stale_profiles(&self, timeout_minutes: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::minutes(timeout_minutes);
        let n = conn.execute(
            "UPDATE profiles SET published = 0, claimed_at = NULL, updated_at = datetime('now')
             WHERE published = -1 AND claimed_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }

    // -- Housekeeping --------------------------------------------------------

    /// Deletes migrations (and their cascaded posts/media/articles/profile)
    /// that reached a terminal status more than `retention_days` ago.
    pub fn gc_terminal_migrations(&self, retention_days: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let n = conn.execute(
            "DELETE FROM migrations WHERE status IN ('complete', 'error') AND updated_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }

    pub fn queue_depth(&self) -> Result<QueueDepth> {
        let conn = self.conn.lock().unwrap();
        let pending_migrations: i64 = conn.query_row(
            "SELECT COUNT(*) FROM migrations WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        let pending_posts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        let pending_articles: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        let pending_profiles: i64 = conn.query_row(
            "SELECT COUNT(*) FROM profiles WHERE published = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(QueueDepth {
            pending_migrations: pending_migrations as u64,
            pending_posts: pending_posts as u64,
            pending_articles: pending_articles as u64,
            pending_profiles: pending_profiles as u64,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDepth {
    pub pending_migrations: u64,
    pub pending_posts: u64,
    pub pending_articles: u64,
    pub pending_profiles: u64,
}

fn row_to_migration(row: &rusqlite::Row) -> rusqlite::Result<MigrationRow> {
    let status: String = row.get(4)?;
    let retry_count: i64 = row.get(6)?;
    Ok(MigrationRow {
        id: row.get(0)?,
        ig_handle: row.get(1)?,
        claim_token: row.get(2)?,
        email: row.get(3)?,
        status: migration_status_from_str(&status),
        pubkey: row.get(5)?,
        retry_count: retry_count as u32,
    })
}

fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<PostRow> {
    let post_type: String = row.get(2)?;
    let status: String = row.get(6)?;
    let retry_count: i64 = row.get(7)?;
    Ok(PostRow {
        id: row.get(0)?,
        migration_id: row.get(1)?,
        post_type: post_type_from_str(&post_type),
        source_url: row.get(3)?,
        caption: row.get(4)?,
        original_date: row.get(5)?,
        status: post_status_from_str(&status),
        retry_count: retry_count as u32,
    })
}

fn row_to_media_item(row: &rusqlite::Row) -> rusqlite::Result<MediaItemRow> {
    let media_type: String = row.get(3)?;
    let width: Option<i64> = row.get(6)?;
    let height: Option<i64> = row.get(7)?;
    Ok(MediaItemRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        source_url: row.get(2)?,
        media_type: media_type_from_str(&media_type),
        order_index: row.get(4)?,
        uploaded_url: row.get(5)?,
        width: width.map(|w| w as u32),
        height: height.map(|h| h as u32),
    })
}

fn row_to_article(row: &rusqlite::Row) -> rusqlite::Result<ArticleRow> {
    let summary: Option<String> = row.get(3)?;
    let hashtags_json: String = row.get(8)?;
    let inline_json: String = row.get(7)?;
    let status: String = row.get(11)?;
    let upload_attempts: i64 = row.get(12)?;
    Ok(ArticleRow {
        id: row.get(0)?,
        migration_id: row.get(1)?,
        title: row.get(2)?,
        summary,
        markdown: row.get(4)?,
        header_image_url: row.get(5)?,
        blossom_image_url: row.get(6)?,
        inline_image_urls: serde_json::from_str(&inline_json).unwrap_or_default(),
        hashtags: serde_json::from_str(&hashtags_json).unwrap_or_default(),
        published_at: row.get(9)?,
        link: row.get(10)?,
        status: article_status_from_str(&status),
        upload_attempts: upload_attempts as u32,
    })
}

fn row_to_profile(row: &rusqlite::Row) -> rusqlite::Result<ProfileRow> {
    let published: i64 = row.get(5)?;
    Ok(ProfileRow {
        id: row.get(0)?,
        migration_id: row.get(1)?,
        display_name: row.get(2)?,
        bio: row.get(3)?,
        avatar_url: row.get(4)?,
        published: profile_published_from_value(published),
    })
}

fn status_str(status: MigrationStatus) -> &'static str {
    match status {
        MigrationStatus::Pending => "pending",
        MigrationStatus::Processing => "processing",
        MigrationStatus::Ready => "ready",
        MigrationStatus::Complete => "complete",
        MigrationStatus::Error => "error",
    }
}

fn migration_status_from_str(s: &str) -> MigrationStatus {
    match s {
        "processing" => MigrationStatus::Processing,
        "ready" => MigrationStatus::Ready,
        "complete" => MigrationStatus::Complete,
        "error" => MigrationStatus::Error,
        _ => MigrationStatus::Pending,
    }
}

fn post_status_str(status: PostStatus) -> &'static str {
    match status {
        PostStatus::Pending => "pending",
        PostStatus::Uploading => "uploading",
        PostStatus::Ready => "ready",
        PostStatus::Publishing => "publishing",
        PostStatus::Complete => "complete",
        PostStatus::Error => "error",
    }
}

fn post_status_from_str(s: &str) -> PostStatus {
    match s {
        "uploading" => PostStatus::Uploading,
        "ready" => PostStatus::Ready,
        "publishing" => PostStatus::Publishing,
        "complete" => PostStatus::Complete,
        "error" => PostStatus::Error,
        _ => PostStatus::Pending,
    }
}

fn post_type_str(pt: PostType) -> &'static str {
    match pt {
        PostType::Reel => "reel",
        PostType::Carousel => "carousel",
        PostType::Image => "image",
        PostType::Text => "text",
    }
}

fn post_type_from_str(s: &str) -> PostType {
    match s {
        "carousel" => PostType::Carousel,
        "image" => PostType::Image,
        "text" => PostType::Text,
        _ => PostType::Reel,
    }
}

fn media_type_str(mt: MediaType) -> &'static str {
    match mt {
        MediaType::Image => "image",
        MediaType::Video => "video",
    }
}

fn media_type_from_str(s: &str) -> MediaType {
    match s {
        "video" => MediaType::Video,
        _ => MediaType::Image,
    }
}

fn article_status_str(status: ArticleStatus) -> &'static str {
    match status {
        ArticleStatus::Pending => "pending",
        ArticleStatus::Processing => "processing",
        ArticleStatus::Ready => "ready",
        ArticleStatus::Publishing => "publishing",
        ArticleStatus::Complete => "complete",
        ArticleStatus::Error => "error",
    }
}

fn article_status_from_str(s: &str) -> ArticleStatus {
    match s {
        "processing" => ArticleStatus::Processing,
        "ready" => ArticleStatus::Ready,
        "publishing" => ArticleStatus::Publishing,
        "complete" => ArticleStatus::Complete,
        "error" => ArticleStatus::Error,
        _ => ArticleStatus::Pending,
    }
}

fn profile_published_value(p: ProfilePublished) -> i64 {
    match p {
        ProfilePublished::Processing => -1,
        ProfilePublished::Unpublished => 0,
        ProfilePublished::Published => 1,
    }
}

fn profile_published_from_value(v: i64) -> ProfilePublished {
    match v {
        -1 => ProfilePublished::Processing,
        1 => ProfilePublished::Published,
        _ => ProfilePublished::Unpublished,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("migrate.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn claim_migration_is_exclusive() {
        let (_dir, store) = new_store();
        store
            .insert_migration(
                &MigrationRow {
                    id: "m1".into(),
                    ig_handle: "alice".into(),
                    claim_token: "tok1".into(),
                    email: None,
                    status: MigrationStatus::Pending,
                    pubkey: "ab".repeat(32),
                    retry_count: 0,
                },
                None,
            )
            .unwrap();

        let claimed = store.claim_migration().unwrap().expect("one migration claimed");
        assert_eq!(claimed.id, "m1");
        assert!(store.claim_migration().unwrap().is_none());
    }

    #[test]
    fn claim_posts_respects_limit_and_marks_processing() {
        let (_dir, store) = new_store();
        store
            .insert_migration(
                &MigrationRow {
                    id: "m1".into(),
                    ig_handle: "alice".into(),
                    claim_token: "tok1".into(),
                    email: None,
                    status: MigrationStatus::Pending,
                    pubkey: "ab".repeat(32),
                    retry_count: 0,
                },
                None,
            )
            .unwrap();
        for i in 0..5 {
            store
                .insert_post(&PostRow {
                    id: format!("p{i}"),
                    migration_id: "m1".into(),
                    post_type: PostType::Reel,
                    source_url: format!("https://ig/{i}"),
                    caption: None,
                    original_date: None,
                    status: PostStatus::Pending,
                    retry_count: 0,
                })
                .unwrap();
        }

        let claimed = store.claim_posts(3).unwrap();
        assert_eq!(claimed.len(), 3);
        assert!(claimed.iter().all(|p| p.status == PostStatus::Pending));

        let remaining = store.claim_posts(10).unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn stale_recovery_resets_long_processing_migrations() {
        let (_dir, store) = new_store();
        store
            .insert_migration(
                &MigrationRow {
                    id: "m1".into(),
                    ig_handle: "alice".into(),
                    claim_token: "tok1".into(),
                    email: None,
                    status: MigrationStatus::Pending,
                    pubkey: "ab".repeat(32),
                    retry_count: 0,
                },
                None,
            )
            .unwrap();
        store.claim_migration().unwrap();

        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE migrations SET claimed_at = datetime('now', '-40 minutes') WHERE id = 'm1'",
                [],
            )
            .unwrap();
        }

        let reset = store.recover_stale_migrations(30).unwrap();
        assert_eq!(reset, vec!["m1".to_string()]);
        assert_eq!(store.get_migration("m1").unwrap().status, MigrationStatus::Pending);
    }

    #[test]
    fn media_items_cascade_delete_with_post() {
        let (_dir, store) = new_store();
        store
            .insert_migration(
                &MigrationRow {
                    id: "m1".into(),
                    ig_handle: "alice".into(),
                    claim_token: "tok1".into(),
                    email: None,
                    status: MigrationStatus::Pending,
                    pubkey: "ab".repeat(32),
                    retry_count: 0,
                },
                None,
            )
            .unwrap();
        store
            .insert_post(&PostRow {
                id: "p1".into(),
                migration_id: "m1".into(),
                post_type: PostType::Carousel,
                source_url: "https://ig/p1".into(),
                caption: None,
                original_date: None,
                status: PostStatus::Pending,
                retry_count: 0,
            })
            .unwrap();
        store
            .insert_media_item(&MediaItemRow {
                id: "media1".into(),
                post_id: "p1".into(),
                source_url: "https://ig/p1/1.jpg".into(),
                media_type: MediaType::Image,
                order_index: 0,
                uploaded_url: None,
                width: None,
                height: None,
            })
            .unwrap();

        {
            let conn = store.conn.lock().unwrap();
            conn.execute("DELETE FROM migrations WHERE id = 'm1'", []).unwrap();
        }

        assert!(store.media_items_for_post("p1").unwrap().is_empty());
    }

    #[test]
    fn clearing_uploaded_urls_removes_all_media_items_for_post() {
        let (_dir, store) = new_store();
        store
            .insert_migration(
                &MigrationRow {
                    id: "m1".into(),
                    ig_handle: "alice".into(),
                    claim_token: "tok1".into(),
                    email: None,
                    status: MigrationStatus::Pending,
                    pubkey: "ab".repeat(32),
                    retry_count: 0,
                },
                None,
            )
            .unwrap();
        store
            .insert_post(&PostRow {
                id: "p1".into(),
                migration_id: "m1".into(),
                post_type: PostType::Carousel,
                source_url: "https://ig/p1".into(),
                caption: None,
                original_date: None,
                status: PostStatus::Pending,
                retry_count: 0,
            })
            .unwrap();
        for (i, id) in ["media1", "media2"].iter().enumerate() {
            store
                .insert_media_item(&MediaItemRow {
                    id: id.to_string(),
                    post_id: "p1".into(),
                    source_url: format!("https://ig/p1/{i}.jpg"),
                    media_type: MediaType::Image,
                    order_index: i as i64,
                    uploaded_url: None,
                    width: None,
                    height: None,
                })
                .unwrap();
            store.set_media_item_uploaded_url(id, &format!("https://blob/{i}")).unwrap();
        }

        store.clear_media_item_uploaded_urls("p1").unwrap();

        let items = store.media_items_for_post("p1").unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.uploaded_url.is_none()));
    }

    #[test]
    fn stale_recovery_resets_long_processing_articles() {
        let (_dir, store) = new_store();
        store
            .insert_migration(
                &MigrationRow {
                    id: "m1".into(),
                    ig_handle: "alice".into(),
                    claim_token: "tok1".into(),
                    email: None,
                    status: MigrationStatus::Pending,
                    pubkey: "ab".repeat(32),
                    retry_count: 0,
                },
                None,
            )
            .unwrap();
        store
            .insert_article(&ArticleRow {
                id: "a1".into(),
                migration_id: "m1".into(),
                title: "My Article".into(),
                summary: None,
                markdown: "# hi".into(),
                header_image_url: None,
                blossom_image_url: None,
                inline_image_urls: std::collections::BTreeMap::new(),
                hashtags: vec![],
                published_at: None,
                link: "https://blog.example/my-article".into(),
                status: ArticleStatus::Pending,
                upload_attempts: 0,
            })
            .unwrap();
        store.claim_articles(10).unwrap();

        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE articles SET claimed_at = datetime('now', '-20 minutes') WHERE id = 'a1'",
                [],
            )
            .unwrap();
        }

        let reset = store.recover_stale_articles(15).unwrap();
        assert_eq!(reset, 1);

        let claimed = store.claim_articles(10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, "a1");
    }

    #[test]
    fn article_round_trips_all_fields_through_claim() {
        let (_dir, store) = new_store();
        store
            .insert_migration(
                &MigrationRow {
                    id: "m1".into(),
                    ig_handle: "alice".into(),
                    claim_token: "tok1".into(),
                    email: None,
                    status: MigrationStatus::Pending,
                    pubkey: "ab".repeat(32),
                    retry_count: 0,
                },
                None,
            )
            .unwrap();

        let mut inline = std::collections::BTreeMap::new();
        inline.insert("https://cdn/in.png".to_string(), "https://blob/in".to_string());
        store
            .insert_article(&ArticleRow {
                id: "a1".into(),
                migration_id: "m1".into(),
                title: "My Article".into(),
                summary: Some("a summary".into()),
                markdown: "# hi ![x](https://cdn/in.png)".into(),
                header_image_url: Some("https://cdn/header.png".into()),
                blossom_image_url: None,
                inline_image_urls: inline.clone(),
                hashtags: vec!["rust".into(), "nostr".into()],
                published_at: Some(1704164645),
                link: "https://blog.example/my-article".into(),
                status: ArticleStatus::Pending,
                upload_attempts: 0,
            })
            .unwrap();

        let claimed = store.claim_articles(10).unwrap();
        assert_eq!(claimed.len(), 1);
        let a = &claimed[0];
        assert_eq!(a.title, "My Article");
        assert_eq!(a.summary.as_deref(), Some("a summary"));
        assert_eq!(a.header_image_url.as_deref(), Some("https://cdn/header.png"));
        assert_eq!(a.blossom_image_url, None);
        assert_eq!(a.inline_image_urls, inline);
        assert_eq!(a.hashtags, vec!["rust".to_string(), "nostr".to_string()]);
        assert_eq!(a.published_at, Some(1704164645));
        assert_eq!(a.link, "https://blog.example/my-article");
        assert_eq!(a.upload_attempts, 0);

        store
            .persist_article_progress("a1", "# hi ![x](https://blob/in)", Some("https://blob/header"), &inline)
            .unwrap();
        let refreshed = store.claim_articles(10).unwrap();
        assert!(refreshed.is_empty(), "already-processing article is not re-claimed");
    }

    #[test]
    fn migration_completes_and_scrubs_secret_once_children_terminal() {
        let (_dir, store) = new_store();
        store
            .insert_migration(
                &MigrationRow {
                    id: "m1".into(),
                    ig_handle: "alice".into(),
                    claim_token: "tok1".into(),
                    email: None,
                    status: MigrationStatus::Processing,
                    pubkey: "ab".repeat(32),
                    retry_count: 0,
                },
                Some(&[9u8; 32]),
            )
            .unwrap();
        store
            .insert_post(&PostRow {
                id: "p1".into(),
                migration_id: "m1".into(),
                post_type: PostType::Reel,
                source_url: "https://ig/p1".into(),
                caption: None,
                original_date: None,
                status: PostStatus::Error,
                retry_count: 3,
            })
            .unwrap();

        assert!(store.migration_children_are_terminal("m1").unwrap());
        store.complete_migration("m1").unwrap();

        let migration = store.get_migration("m1").unwrap();
        assert_eq!(migration.status, MigrationStatus::Complete);
        assert!(store.get_migration_secret_key("m1").unwrap().is_none());
    }
}
