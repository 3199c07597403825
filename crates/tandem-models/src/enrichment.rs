use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::batch::PatternFlags;

/// Schema of the enrichment store written by the batch analyzer.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS enrichment (
///     date            TEXT NOT NULL,
///     symbol          TEXT NOT NULL,
///     pattern_flags   TEXT,
///     sentiment_score TEXT,
///     updated_at      TEXT NOT NULL,
///     PRIMARY KEY (date, symbol)
/// );
/// ```
///
/// Vision and social stages write different columns of the same row;
/// an upsert only overwrites the columns its stage produced.
pub const ENRICHMENT_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS enrichment (
    date            TEXT NOT NULL,
    symbol          TEXT NOT NULL,
    pattern_flags   TEXT,
    sentiment_score TEXT,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (date, symbol)
);
CREATE INDEX IF NOT EXISTS idx_enrichment_symbol ON enrichment(symbol);
";

/// Key pattern conventions for the analysis cache.
///
/// - Adapter output: `analysis:{kind}:{SYMBOL}:{bucket}` where `bucket` is
///   `floor(unix_seconds / 300)` (e.g. `analysis:scout:AAPL:5800000`)
pub mod key_patterns {
    pub fn analysis(kind: &str, symbol: &str, bucket: i64) -> String {
        format!("analysis:{kind}:{}:{bucket}", symbol.to_ascii_uppercase())
    }
}

/// One per-symbol enrichment row, keyed by `(date, symbol)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentRow {
    pub date: NaiveDate,
    pub symbol: String,
    pub pattern_flags: Option<PatternFlags>,
    pub sentiment_score: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichmentRow {
    pub fn patterns(date: NaiveDate, symbol: &str, flags: PatternFlags) -> Self {
        Self {
            date,
            symbol: symbol.to_string(),
            pattern_flags: Some(flags),
            sentiment_score: None,
            updated_at: Utc::now(),
        }
    }

    pub fn sentiment(date: NaiveDate, symbol: &str, score: Decimal) -> Self {
        Self {
            date,
            symbol: symbol.to_string(),
            pattern_flags: None,
            sentiment_score: Some(score),
            updated_at: Utc::now(),
        }
    }

    /// Row for an item whose call failed. Leaves any stored columns untouched on upsert.
    pub fn unscored(date: NaiveDate, symbol: &str) -> Self {
        Self {
            date,
            symbol: symbol.to_string(),
            pattern_flags: None,
            sentiment_score: None,
            updated_at: Utc::now(),
        }
    }
}
