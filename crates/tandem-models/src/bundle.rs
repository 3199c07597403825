use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An opaque key/value sub-bundle supplied by the aggregation layer.
pub type SubBundle = serde_json::Map<String, serde_json::Value>;

/// A single news item as delivered by the upstream news collector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NewsItem {
    pub headline: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Raw metrics for one social source (e.g. "reddit", "stocktwits").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SourceMetrics {
    #[serde(default)]
    pub mentions: u64,
    /// Source-reported sentiment on -1.0 (bearish) .. 1.0 (bullish).
    #[serde(default)]
    pub sentiment: Decimal,
    /// Sample post texts, newest first.
    #[serde(default)]
    pub posts: Vec<String>,
}

/// Per-source social metrics. Read directly by hybrid validation,
/// never routed through a model adapter for that purpose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SocialMetrics {
    #[serde(default)]
    pub sources: BTreeMap<String, SourceMetrics>,
}

impl SocialMetrics {
    /// Saturates at `u64::MAX`.
    pub fn total_mentions(&self) -> u64 {
        self.sources
            .values()
            .fold(0u64, |total, s| total.saturating_add(s.mentions))
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Immutable per-symbol input to the consensus engine.
///
/// Produced by the external aggregation layer. The engine only reads the
/// fields it scores on and forwards the rest to prompts as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AnalysisBundle {
    pub symbol: String,
    #[serde(default)]
    pub technical: SubBundle,
    #[serde(default)]
    pub news: Vec<NewsItem>,
    #[serde(default)]
    pub social: SocialMetrics,
    #[serde(default)]
    pub options_flow: SubBundle,
    #[serde(default)]
    pub catalysts: SubBundle,
    #[serde(default)]
    pub unusual_volume: SubBundle,
    /// Caller-supplied prior on 0.0 .. 1.0.
    #[serde(default = "default_base_confidence")]
    pub base_confidence: Decimal,
}

fn default_base_confidence() -> Decimal {
    Decimal::new(5, 1)
}
