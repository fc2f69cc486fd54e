//! SQLite-backed durable request queue.
//!
//! The store manages its own connection pool. Entries survive restarts;
//! FIFO order within a parent directory is the rowid order.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{Method, QueueEntry, QueueStats, RequestQueue, StoredEntry};
use crate::error::{Result, TreeError};
use crate::path;

/// Durable request queue over SQLite.
#[derive(Debug, Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
}

impl SqliteQueue {
    /// Open (or create) a file-backed queue database.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let queue = Self { pool };
        queue.run_migrations().await?;

        info!(path = %db_path.display(), "request queue opened");
        Ok(queue)
    }

    /// In-memory queue, for tests and ephemeral shares.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        // A pool of one: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let queue = Self { pool };
        queue.run_migrations().await?;
        Ok(queue)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent TEXT NOT NULL,
                method TEXT NOT NULL,
                path TEXT NOT NULL,
                dest_path TEXT,
                remote_prefix TEXT NOT NULL,
                local_prefix TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_requests_parent ON requests(parent)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RequestQueue for SqliteQueue {
    async fn queue_request(&self, entry: QueueEntry) -> Result<()> {
        let parent = path::parent(&entry.path);

        if entry.method == Method::Delete {
            // Pending uploads for the name can only fail now that the
            // local file is gone; the DELETE supersedes them. This runs
            // before the duplicate check so a delete after a re-create
            // still drops the re-create's PUT.
            let dropped = sqlx::query(
                r#"
                DELETE FROM requests
                WHERE parent = ?1 AND path = ?2 AND method IN ('PUT', 'POST')
                "#,
            )
            .bind(&parent)
            .bind(&entry.path)
            .execute(&self.pool)
            .await?
            .rows_affected();
            if dropped > 0 {
                debug!(path = %entry.path, dropped, "superseded pending uploads");
            }

            // A second DELETE for the same name would replay as a
            // duplicate; keep the one already queued.
            let pending: i64 = sqlx::query(
                r#"
                SELECT COUNT(*) AS n FROM requests
                WHERE parent = ?1 AND path = ?2 AND method = 'DELETE'
                "#,
            )
            .bind(&parent)
            .bind(&entry.path)
            .fetch_one(&self.pool)
            .await?
            .get("n");

            if pending > 0 {
                debug!(path = %entry.path, "duplicate DELETE suppressed");
                return Ok(());
            }
        }

        sqlx::query(
            r#"
            INSERT INTO requests (parent, method, path, dest_path, remote_prefix, local_prefix)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&parent)
        .bind(entry.method.as_str())
        .bind(&entry.path)
        .bind(&entry.dest_path)
        .bind(&entry.remote_prefix)
        .bind(&entry.local_prefix)
        .execute(&self.pool)
        .await?;

        debug!(method = %entry.method, path = %entry.path, "request queued");
        Ok(())
    }

    async fn get_requests(&self, parent: &str) -> Result<HashMap<String, Method>> {
        let parent = path::normalize(parent);

        let rows = sqlx::query(
            r#"
            SELECT path, method FROM requests
            WHERE parent = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(&parent)
        .fetch_all(&self.pool)
        .await?;

        let mut pending = HashMap::new();
        for row in rows {
            let entry_path: String = row.get("path");
            let method: String = row.get("method");
            let method = method
                .parse::<Method>()
                .map_err(TreeError::Queue)?;
            // Later entries overwrite earlier ones; a trailing DELETE
            // hides the name even when a PUT precedes it.
            pending.insert(path::basename(&entry_path).to_string(), method);
        }

        Ok(pending)
    }

    async fn remove_path(&self, prefix: &str) -> Result<u64> {
        let prefix = path::normalize(prefix);

        let result = if prefix == "/" {
            sqlx::query("DELETE FROM requests")
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query(
                r#"
                DELETE FROM requests
                WHERE parent = ?1 OR parent LIKE ?1 || '/%'
                "#,
            )
            .bind(&prefix)
            .execute(&self.pool)
            .await?
        };

        Ok(result.rows_affected())
    }

    async fn update_path(&self, old_prefix: &str, new_prefix: &str) -> Result<u64> {
        let old_prefix = path::normalize(old_prefix);
        let new_prefix = path::normalize(new_prefix);
        let old_len = old_prefix.len() as i64;

        let mut tx = self.pool.begin().await?;

        let reparented = sqlx::query(
            r#"
            UPDATE requests
            SET parent = ?2 || substr(parent, ?3 + 1)
            WHERE parent = ?1 OR parent LIKE ?1 || '/%'
            "#,
        )
        .bind(&old_prefix)
        .bind(&new_prefix)
        .bind(old_len)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            UPDATE requests
            SET path = ?2 || substr(path, ?3 + 1)
            WHERE path = ?1 OR path LIKE ?1 || '/%'
            "#,
        )
        .bind(&old_prefix)
        .bind(&new_prefix)
        .bind(old_len)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE requests
            SET dest_path = ?2 || substr(dest_path, ?3 + 1)
            WHERE dest_path = ?1 OR dest_path LIKE ?1 || '/%'
            "#,
        )
        .bind(&old_prefix)
        .bind(&new_prefix)
        .bind(old_len)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(old = %old_prefix, new = %new_prefix, entries = reparented, "queue re-parented");
        Ok(reparented)
    }

    async fn pending_parents(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT parent, MIN(id) AS first_id FROM requests
            GROUP BY parent
            ORDER BY first_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("parent")).collect())
    }

    async fn entries_for(&self, parent: &str) -> Result<Vec<StoredEntry>> {
        let parent = path::normalize(parent);

        let rows = sqlx::query(
            r#"
            SELECT id, parent, method, path, dest_path, remote_prefix, local_prefix,
                   attempts, last_error
            FROM requests
            WHERE parent = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(&parent)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_stored).collect()
    }

    async fn has_entry_for(&self, path: &str) -> Result<bool> {
        let name = crate::path::normalize(path);

        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM requests WHERE path = ?1 OR dest_path = ?1
            ) AS present
            "#,
        )
        .bind(&name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("present") != 0)
    }

    async fn complete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM requests WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, id: i64, error: &str) -> Result<u32> {
        sqlx::query(
            r#"
            UPDATE requests
            SET attempts = attempts + 1, last_error = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT attempts FROM requests WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<i64, _>("attempts") as u32).unwrap_or(0))
    }

    async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS pending,
                   COUNT(CASE WHEN attempts > 0 THEN 1 END) AS failed,
                   COUNT(DISTINCT parent) AS parents
            FROM requests
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: row.get::<i64, _>("pending") as u64,
            failed: row.get::<i64, _>("failed") as u64,
            parents: row.get::<i64, _>("parents") as u64,
        })
    }
}

fn row_to_stored(row: &SqliteRow) -> Result<StoredEntry> {
    let method: String = row.get("method");
    let method = method.parse::<Method>().map_err(TreeError::Queue)?;

    Ok(StoredEntry {
        id: row.get("id"),
        parent: row.get("parent"),
        entry: QueueEntry {
            method,
            path: row.get("path"),
            dest_path: row.get("dest_path"),
            remote_prefix: row.get("remote_prefix"),
            local_prefix: row.get("local_prefix"),
        },
        attempts: row.get::<i64, _>("attempts") as u32,
        last_error: row.get("last_error"),
    })
}
