// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared dataset reference table.
//!
//! Every worker on a standard machine opens the same SQLite file. A row is
//! created by the first task that claims a dataset, `is_ready` is set once
//! that task finished downloading, and the row (plus the directory) goes away
//! when the last claim is released, unless the dataset is persisted.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

use crate::error::Result;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// One row of the reference table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DatasetReference {
    pub dataset_name: String,
    pub local_path: String,
    pub ref_count: i64,
    pub is_persisted: bool,
    pub is_ready: bool,
}

/// Access to the dataset reference table.
#[async_trait]
pub trait DatasetRegistry: Send + Sync {
    /// Current row for a dataset.
    async fn query(&self, dataset_name: &str) -> Result<Option<DatasetReference>>;

    /// Take one reference, creating a not-ready row if none exists.
    async fn increment(&self, dataset_name: &str, local_path: &Path, persisted: bool)
    -> Result<()>;

    /// Mark a dataset as fully downloaded.
    async fn mark_ready(&self, dataset_name: &str) -> Result<()>;

    /// Drop the row regardless of its count (rollback of a failed download).
    async fn remove(&self, dataset_name: &str) -> Result<()>;

    /// Release one reference.
    ///
    /// Returns `true` when this was the last reference of a non-persisted
    /// dataset; the row is gone and the caller must delete the directory.
    async fn decrement(&self, dataset_name: &str) -> Result<bool>;
}

/// SQLite-backed reference table.
#[derive(Clone)]
pub struct SqliteDatasetRegistry {
    pool: SqlitePool,
}

impl SqliteDatasetRegistry {
    /// Wrap an existing pool. Migrations must already be applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database file and apply migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Private in-memory table. Lives as long as its single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DatasetRegistry for SqliteDatasetRegistry {
    async fn query(&self, dataset_name: &str) -> Result<Option<DatasetReference>> {
        let row = sqlx::query_as::<_, DatasetReference>(
            r#"
            SELECT dataset_name, local_path, ref_count, is_persisted, is_ready
            FROM dataset_refs
            WHERE dataset_name = ?
            "#,
        )
        .bind(dataset_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn increment(
        &self,
        dataset_name: &str,
        local_path: &Path,
        persisted: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dataset_refs (dataset_name, local_path, ref_count, is_persisted, is_ready, updated_at)
            VALUES (?, ?, 1, ?, 0, ?)
            ON CONFLICT(dataset_name) DO UPDATE SET
                ref_count = ref_count + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(dataset_name)
        .bind(local_path.to_string_lossy().into_owned())
        .bind(persisted)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(dataset = dataset_name, "Dataset reference taken");
        Ok(())
    }

    async fn mark_ready(&self, dataset_name: &str) -> Result<()> {
        sqlx::query("UPDATE dataset_refs SET is_ready = 1, updated_at = ? WHERE dataset_name = ?")
            .bind(Utc::now())
            .bind(dataset_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove(&self, dataset_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM dataset_refs WHERE dataset_name = ?")
            .bind(dataset_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn decrement(&self, dataset_name: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, bool)> = sqlx::query_as(
            "SELECT ref_count, is_persisted FROM dataset_refs WHERE dataset_name = ?",
        )
        .bind(dataset_name)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((ref_count, persisted)) = row else {
            tx.commit().await?;
            return Ok(false);
        };

        let remaining = (ref_count - 1).max(0);
        let evicted = remaining == 0 && !persisted;
        if evicted {
            sqlx::query("DELETE FROM dataset_refs WHERE dataset_name = ?")
                .bind(dataset_name)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                "UPDATE dataset_refs SET ref_count = ?, updated_at = ? WHERE dataset_name = ?",
            )
            .bind(remaining)
            .bind(Utc::now())
            .bind(dataset_name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(dataset = dataset_name, remaining, evicted, "Dataset reference released");
        Ok(evicted)
    }
}
