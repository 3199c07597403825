use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Buy,
    Sell,
    Hold,
}

impl Recommendation {
    /// Lenient label matching for model output.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "buy" | "strong_buy" | "bullish" | "long" | "accumulate" => Some(Self::Buy),
            "sell" | "strong_sell" | "bearish" | "short" | "avoid" => Some(Self::Sell),
            "hold" | "neutral" | "wait" | "watch" => Some(Self::Hold),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which adapter produced a `ModelAnalysis`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdapterRole {
    Scout,
    Refinement,
}

/// Structured output of one model adapter call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelAnalysis {
    pub role: AdapterRole,
    pub recommendation: Recommendation,
    /// 0 to 100.
    pub confidence: Decimal,
    pub reasoning: String,
    #[serde(default)]
    pub risk_warning: Option<String>,
    /// Ordered by importance as reported by the model.
    #[serde(default)]
    pub key_factors: Vec<String>,
    #[serde(default)]
    pub contrarian_note: Option<String>,
}

/// Raw social signal extracted by the scout and handed to the refinement adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocialDataPacket {
    pub symbol: String,
    /// 0.0 (bearish) to 1.0 (bullish).
    pub raw_sentiment: Decimal,
    pub mention_count: u64,
    #[serde(default)]
    pub themes: Vec<String>,
    /// Mentions per source.
    #[serde(default)]
    pub source_breakdown: BTreeMap<String, u64>,
    /// 0.0 to 1.0.
    pub extraction_confidence: Decimal,
    pub extracted_at: DateTime<Utc>,
}

/// Output of the scout phase: the technical read plus the social extract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoutReport {
    pub analysis: ModelAnalysis,
    pub social: SocialDataPacket,
}

/// Output of the sentiment refinement call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentRefinement {
    pub analysis: ModelAnalysis,
    /// Refined narrative sentiment, 0.0 (bearish) to 1.0 (bullish).
    pub sentiment_score: Decimal,
    #[serde(default)]
    pub narrative: Option<String>,
}
