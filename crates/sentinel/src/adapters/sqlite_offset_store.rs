// Rust guideline compliant 2026-02-16

//! SQLite adapter for the `OffsetStore` port, grounded on
//! `fraud_detection`'s `adapters::sqlite_storage::SqliteStorage`: same
//! `create_if_missing` connect pattern, `CREATE TABLE IF NOT EXISTS` schema
//! setup, and `INSERT OR REPLACE` upsert semantics, applied to the
//! singleton `offset_config` row (§4.3, §6.4) instead of a transaction log.

use chrono::{DateTime, NaiveDate, Utc};
use domain::{OffsetRow, OffsetStore, OffsetStoreError};

/// Fixed id of the lone `offset_config` row (§4.3: the port never takes an
/// id because there is only ever one row).
const ROW_ID: &str = "log_collect";

#[derive(Debug, Clone)]
pub struct SqliteOffsetStore {
    pool: sqlx::SqlitePool,
}

impl SqliteOffsetStore {
    /// Open or create `db_url`'s `offset_config` table.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` when the connection or schema creation fails.
    pub async fn new(db_url: &str) -> Result<Self, sqlx::Error> {
        let opts = db_url.parse::<sqlx::sqlite::SqliteConnectOptions>()?.create_if_missing(true);
        let pool = sqlx::SqlitePool::connect_with(opts).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS offset_config (
                id           TEXT    PRIMARY KEY,
                file_path    TEXT    NOT NULL,
                offset       INTEGER NOT NULL,
                update_time  TEXT    NOT NULL,
                collect_date TEXT    NOT NULL,
                count        INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

impl OffsetStore for SqliteOffsetStore {
    /// Reads return the zero row if `offset_config` has no row yet (§4.3).
    async fn load(&self) -> Result<OffsetRow, OffsetStoreError> {
        let row: Option<(String, i64, String, String, i64)> = sqlx::query_as(
            "SELECT file_path, offset, update_time, collect_date, count FROM offset_config WHERE id = ?",
        )
        .bind(ROW_ID)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| OffsetStoreError::Unavailable(err.to_string()))?;

        let Some((file_path, offset, update_time, collect_date, count)) = row else {
            return Ok(OffsetRow::zero(String::new(), Utc::now().date_naive(), Utc::now()));
        };

        let update_time = DateTime::parse_from_rfc3339(&update_time)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let collect_date = NaiveDate::parse_from_str(&collect_date, "%Y-%m-%d").unwrap_or_else(|_| Utc::now().date_naive());

        Ok(OffsetRow {
            file_path,
            offset: offset.try_into().unwrap_or(0),
            update_time,
            collect_date,
            count: count.try_into().unwrap_or(0),
        })
    }

    /// `INSERT OR REPLACE` keyed by the fixed row id (§4.3: "must commit
    /// before the collector returns `true`").
    async fn save(&self, row: OffsetRow) -> Result<(), OffsetStoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO offset_config
             (id, file_path, offset, update_time, collect_date, count)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(ROW_ID)
        .bind(&row.file_path)
        .bind(i64::try_from(row.offset).unwrap_or(i64::MAX))
        .bind(row.update_time.to_rfc3339())
        .bind(row.collect_date.format("%Y-%m-%d").to_string())
        .bind(i64::try_from(row.count).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(|err| OffsetStoreError::Unavailable(err.to_string()))?;
        Ok(())
    }
}
