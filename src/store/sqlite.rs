use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{Filter, StoreClient, StoreType};
use crate::error::StoreError;
use crate::record::Record;

/// SQLite-backed store.
///
/// Used as the embedded local store, and by the server as the backing store
/// of the shared remote one. All tables share a single `records` table keyed
/// on `(table_name, id)`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    store_type: StoreType,
}

// Row type for database queries
#[derive(sqlx::FromRow)]
struct RecordRow {
    data: String,
}

fn timestamp_key(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteStore {
    /// Opens (creating if needed) the database file and runs migrations.
    pub async fn open(path: &Path, store_type: StoreType) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool, store_type })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Names of tables that currently hold at least one row.
    pub async fn tables(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT table_name FROM records ORDER BY table_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    fn decode(rows: Vec<RecordRow>) -> Result<Vec<Record>, StoreError> {
        rows.into_iter()
            .map(|row| Record::from_json(&row.data).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl StoreClient for SqliteStore {
    fn store_type(&self) -> StoreType {
        self.store_type
    }

    async fn find(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        let rows: Vec<RecordRow> = match filter {
            Filter::All => {
                sqlx::query_as("SELECT data FROM records WHERE table_name = ? ORDER BY id")
                    .bind(table)
                    .fetch_all(&self.pool)
                    .await?
            }
            Filter::ById(id) => {
                sqlx::query_as("SELECT data FROM records WHERE table_name = ? AND id = ?")
                    .bind(table)
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            Filter::UpdatedSince(since) => {
                sqlx::query_as(
                    r#"
                    SELECT data FROM records
                    WHERE table_name = ? AND (updated_at IS NULL OR updated_at >= ?)
                    ORDER BY updated_at, id
                    "#,
                )
                .bind(table)
                .bind(timestamp_key(*since))
                .fetch_all(&self.pool)
                .await?
            }
        };

        // The SQL bound is inclusive at microsecond precision; the filter is exact.
        Ok(Self::decode(rows)?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect())
    }

    async fn upsert(&self, table: &str, record: &Record) -> Result<(), StoreError> {
        let id = record.id()?;
        let data = record.to_json()?;
        let updated_at = record.updated_at().map(timestamp_key);

        sqlx::query(
            r#"
            INSERT INTO records (table_name, id, data, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (table_name, id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(table)
        .bind(&id)
        .bind(&data)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM records WHERE table_name = ? AND id = ?")
            .bind(table)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records WHERE table_name = ?")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_if_absent(&self, table: &str, record: &Record) -> Result<bool, StoreError> {
        let id = record.id()?;
        let data = record.to_json()?;
        let updated_at = record.updated_at().map(timestamp_key);

        let result = sqlx::query(
            "INSERT OR IGNORE INTO records (table_name, id, data, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(table)
        .bind(&id)
        .bind(&data)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
