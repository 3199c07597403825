use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use tandem_models::enrichment::{EnrichmentRow, ENRICHMENT_TABLE_DDL};

use crate::error::CacheError;

const DATE_FORMAT: &str = "%Y-%m-%d";

const UPSERT_SQL: &str = "\
INSERT INTO enrichment (date, symbol, pattern_flags, sentiment_score, updated_at) \
VALUES (?1, ?2, ?3, ?4, ?5) \
ON CONFLICT(date, symbol) DO UPDATE SET \
    pattern_flags = COALESCE(excluded.pattern_flags, enrichment.pattern_flags), \
    sentiment_score = COALESCE(excluded.sentiment_score, enrichment.sentiment_score), \
    updated_at = excluded.updated_at";

/// Destination for batch enrichment results. One call is one logical write.
#[async_trait]
pub trait EnrichmentSink: Send + Sync {
    /// Upsert all rows atomically. Returns the number of rows written.
    async fn upsert_batch(&self, rows: &[EnrichmentRow]) -> Result<usize, CacheError>;
}

/// SQLite-backed enrichment store, upserting on `(date, symbol)`.
///
/// `rusqlite::Connection` is not `Sync`, so access goes through a `Mutex`.
pub struct SqliteEnrichmentStore {
    conn: Mutex<Connection>,
}

impl SqliteEnrichmentStore {
    /// Open (or create) the store at `path` with WAL journaling.
    pub fn open(path: &str) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(ENRICHMENT_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(ENRICHMENT_TABLE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|e| CacheError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    fn write_rows(&self, rows: &[EnrichmentRow]) -> Result<usize, CacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for row in rows {
                let flags = row
                    .pattern_flags
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                stmt.execute(rusqlite::params![
                    row.date.format(DATE_FORMAT).to_string(),
                    row.symbol,
                    flags,
                    row.sentiment_score.map(|s| s.to_string()),
                    row.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Read back one row.
    pub fn get(&self, date: NaiveDate, symbol: &str) -> Result<Option<EnrichmentRow>, CacheError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT date, symbol, pattern_flags, sentiment_score, updated_at \
                 FROM enrichment WHERE date = ?1 AND symbol = ?2",
                rusqlite::params![date.format(DATE_FORMAT).to_string(), symbol],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        raw.map(|(date, symbol, flags, score, updated_at)| {
            let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
                .map_err(|e| CacheError::InvalidRow(format!("date {date}: {e}")))?;
            let pattern_flags = flags.map(|f| serde_json::from_str(&f)).transpose()?;
            let sentiment_score = score
                .map(|s| {
                    Decimal::from_str(&s)
                        .map_err(|e| CacheError::InvalidRow(format!("sentiment_score {s}: {e}")))
                })
                .transpose()?;
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|e| CacheError::InvalidRow(format!("updated_at {updated_at}: {e}")))?
                .with_timezone(&Utc);
            Ok(EnrichmentRow {
                date,
                symbol,
                pattern_flags,
                sentiment_score,
                updated_at,
            })
        })
        .transpose()
    }

    pub fn count(&self) -> Result<usize, CacheError> {
        let conn = self.lock()?;
        let count: usize = conn.query_row("SELECT COUNT(*) FROM enrichment", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait]
impl EnrichmentSink for SqliteEnrichmentStore {
    async fn upsert_batch(&self, rows: &[EnrichmentRow]) -> Result<usize, CacheError> {
        self.write_rows(rows)
    }
}
