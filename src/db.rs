use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyKind, AnyPoolOptions};
use sqlx::AnyPool;
use tracing::info;

use crate::models::{Paste, PasteRow};

const COLUMNS: &str = "id, content, created_at, expires_at, max_views, view_count";

// Rows are read with `fetch_all` so every statement is stepped to completion.
// On SQLite a partially stepped `RETURNING` statement keeps its write
// transaction open, hiding the change from other pooled connections.

#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
    kind: AnyKind,
}

impl Database {
    /// Connect to a database by URL.
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let kind = AnyKind::from_str(url).context("unsupported database url")?;
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("failed to connect to database")?;
        Ok(Self { pool, kind })
    }

    /// Create the `pastes` table if it does not exist yet.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query(create_table_sql(self.kind))
            .execute(&mut conn)
            .await
            .context("failed to create pastes table")?;
        info!("database schema ready");
        Ok(())
    }

    /// Close every pooled connection. Later queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Round trip to the database without touching any table.
    pub async fn ping(&self) -> crate::ApiResult<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT 1").execute(&mut conn).await?;
        Ok(())
    }

    /// Insert a paste. Fails with [`crate::ApiError::Conflict`] if the id is taken.
    pub async fn insert_paste(
        &self,
        id: &str,
        content: &str,
        expires_at: Option<DateTime<Utc>>,
        max_views: Option<i64>,
        created_at: DateTime<Utc>,
    ) -> crate::ApiResult<Paste> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, PasteRow>(&format!(
            "INSERT INTO pastes (id, content, expires_at, max_views, view_count, created_at) \
             VALUES ($1, $2, $3, $4, 0, $5) RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(content)
        .bind(expires_at.map(|t| t.timestamp_millis()))
        .bind(max_views)
        .bind(created_at.timestamp_millis())
        .fetch_all(&mut conn)
        .await?
        .pop()
        .ok_or(sqlx::Error::RowNotFound)?;
        row.try_into()
    }

    /// Get a paste by id.
    pub async fn get_paste(&self, id: &str) -> crate::ApiResult<Paste> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, PasteRow>(&format!(
            "SELECT {COLUMNS} FROM pastes WHERE id = $1"
        ))
        .bind(id)
        .fetch_all(&mut conn)
        .await?
        .pop()
        .ok_or(sqlx::Error::RowNotFound)?;
        row.try_into()
    }

    /// Bump the view counter and return the updated row in one statement.
    pub async fn increment_view_and_get(&self, id: &str) -> crate::ApiResult<Paste> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, PasteRow>(&format!(
            "UPDATE pastes SET view_count = view_count + 1 WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_all(&mut conn)
        .await?
        .pop()
        .ok_or(sqlx::Error::RowNotFound)?;
        row.try_into()
    }

    /// Like [`Database::increment_view_and_get`], but only if the paste is
    /// still accessible at `now`. Returns `None` when no view was consumed.
    pub async fn consume_view(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> crate::ApiResult<Option<Paste>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, PasteRow>(&format!(
            "UPDATE pastes SET view_count = view_count + 1 \
             WHERE id = $1 \
             AND (expires_at IS NULL OR expires_at > $2) \
             AND (max_views IS NULL OR view_count < max_views) \
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(now.timestamp_millis())
        .fetch_all(&mut conn)
        .await?
        .pop();
        row.map(Paste::try_from).transpose()
    }

    /// Delete every paste that can no longer be served at `now`.
    pub async fn purge_inaccessible(&self, now: DateTime<Utc>) -> crate::ApiResult<u64> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            "DELETE FROM pastes \
             WHERE (expires_at IS NOT NULL AND expires_at <= $1) \
             OR (max_views IS NOT NULL AND view_count >= max_views)",
        )
        .bind(now.timestamp_millis())
        .execute(&mut conn)
        .await?;
        Ok(result.rows_affected())
    }
}

#[allow(unreachable_patterns)]
fn create_table_sql(kind: AnyKind) -> &'static str {
    match kind {
        #[cfg(feature = "postgres")]
        AnyKind::Postgres => {
            "CREATE TABLE IF NOT EXISTS pastes (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                expires_at BIGINT,
                max_views BIGINT,
                view_count BIGINT NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL
            )"
        }
        _ => {
            "CREATE TABLE IF NOT EXISTS pastes (
                id TEXT PRIMARY KEY NOT NULL,
                content TEXT NOT NULL,
                expires_at INTEGER,
                max_views INTEGER,
                view_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )"
        }
    }
}
