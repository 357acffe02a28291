//! Database manager: embedded SQLite store behind the index.
//!
//! Bootstraps the schema on first open, applies pragmas (WAL, foreign keys,
//! page and cache size), and exposes the transaction, maintenance, and
//! statistics surface the rest of the index builds on. The database file is
//! derived state: it can be deleted and rebuilt from the vault at any time.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use mementa_core::{defaults, Error, Result};

/// Pragma-level tuning for the SQLite store.
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub page_size: u32,
    pub cache_size_kib: i64,
    pub max_connections: u32,
}

impl Default for DbOptions {
    fn default() -> Self {
        DbOptions {
            page_size: defaults::DB_PAGE_SIZE,
            cache_size_kib: defaults::DB_CACHE_SIZE_KIB,
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

/// Aggregate statistics of the index store.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub note_count: i64,
    pub link_count: i64,
    pub file_size_bytes: u64,
    pub last_vacuum: Option<DateTime<Utc>>,
    pub schema_version: i64,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS notes (
        uid TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        category TEXT NOT NULL,
        file_path TEXT NOT NULL UNIQUE,
        project TEXT,
        tags_json TEXT NOT NULL DEFAULT '[]',
        content_hash TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        indexed_at TEXT NOT NULL
    )",
    "CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(
        uid UNINDEXED,
        title,
        content,
        tags,
        category UNINDEXED,
        project UNINDEXED
    )",
    "CREATE TABLE IF NOT EXISTS links (
        source_uid TEXT NOT NULL,
        target_uid TEXT NOT NULL,
        kind TEXT NOT NULL,
        strength INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL,
        PRIMARY KEY (source_uid, target_uid, kind)
    )",
    "CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_uid)",
    "CREATE TABLE IF NOT EXISTS index_metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// Handle to the index database. Cheap to clone; all clones share one pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    /// Open (creating if necessary) the index database at `path`.
    pub async fn open(path: &Path, options: DbOptions) -> Result<Self> {
        let connect = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .page_size(options.page_size)
            // Negative cache_size means KiB rather than pages.
            .pragma("cache_size", format!("-{}", options.cache_size_kib));

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await?;

        let db = Database {
            pool,
            path: path.to_path_buf(),
        };
        db.bootstrap().await?;
        Ok(db)
    }

    async fn bootstrap(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        sqlx::query(
            "INSERT INTO index_metadata (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(defaults::SCHEMA_VERSION.to_string())
        .execute(&self.pool)
        .await?;
        tracing::info!(path = %self.path.display(), "index database ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin an explicit transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<'static, Sqlite>) -> BoxFuture<'t, Result<T>>,
    {
        let mut tx = self.pool.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    /// Read a metadata value.
    pub async fn metadata_get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM index_metadata WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    /// Upsert a metadata value.
    pub async fn metadata_set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO index_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn schema_version(&self) -> Result<i64> {
        let raw = self
            .metadata_get("schema_version")
            .await?
            .ok_or_else(|| Error::Integrity("schema_version missing".into()))?;
        raw.parse()
            .map_err(|_| Error::Integrity(format!("bad schema_version: {raw:?}")))
    }

    /// VACUUM + ANALYZE, recording the vacuum time in metadata.
    pub async fn optimize(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        self.metadata_set("last_vacuum", &Utc::now().to_rfc3339())
            .await?;
        tracing::info!("index database vacuumed and analyzed");
        Ok(())
    }

    /// Run SQLite's integrity check.
    pub async fn check_integrity(&self) -> Result<bool> {
        let rows = sqlx::query("PRAGMA integrity_check")
            .fetch_all(&self.pool)
            .await?;
        let ok = rows.len() == 1
            && rows[0]
                .try_get::<String, _>(0)
                .map(|v| v == "ok")
                .unwrap_or(false);
        if !ok {
            tracing::error!("index database failed integrity check");
        }
        Ok(ok)
    }

    /// Aggregate statistics for the stats tool surface.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let note_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM notes")
            .fetch_one(&self.pool)
            .await?
            .get("n");
        let link_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM links")
            .fetch_one(&self.pool)
            .await?
            .get("n");

        let file_size_bytes = tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let last_vacuum = self
            .metadata_get("last_vacuum")
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(DatabaseStats {
            note_count,
            link_count,
            file_size_bytes,
            last_vacuum,
            schema_version: self.schema_version().await?,
        })
    }

    /// Close the pool, checkpointing WAL state.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
