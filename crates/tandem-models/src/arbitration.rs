use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::Recommendation;

/// A shortlisted symbol submitted to the final arbitration call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    /// Upstream composite score, 0.0 .. 1.0.
    pub score: Decimal,
    /// Enrichment signals (vision patterns, social score, consensus summary...).
    #[serde(default)]
    pub signals: serde_json::Value,
}

/// Previously learned weighting parameters, loaded fresh per arbitration run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BiasParameters {
    #[serde(default = "default_technical_weight")]
    pub technical_weight: Decimal,
    #[serde(default = "default_sentiment_weight")]
    pub sentiment_weight: Decimal,
    #[serde(default = "default_vision_weight")]
    pub vision_weight: Decimal,
    /// Decisions below this confidence (0-100) should be treated as watch-only.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: Decimal,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_technical_weight() -> Decimal {
    Decimal::new(40, 2)
}
fn default_sentiment_weight() -> Decimal {
    Decimal::new(35, 2)
}
fn default_vision_weight() -> Decimal {
    Decimal::new(25, 2)
}
fn default_min_confidence() -> Decimal {
    Decimal::new(60, 0)
}

impl Default for BiasParameters {
    fn default() -> Self {
        Self {
            technical_weight: default_technical_weight(),
            sentiment_weight: default_sentiment_weight(),
            vision_weight: default_vision_weight(),
            min_confidence: default_min_confidence(),
            notes: Vec::new(),
            updated_at: None,
        }
    }
}

/// One pick returned by an arbitration backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArbitrationDecision {
    pub symbol: String,
    pub action: Recommendation,
    /// 0 to 100.
    pub confidence: Decimal,
    #[serde(default)]
    pub rationale: String,
}

/// Successful arbitration run. Always records which backends were tried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArbitrationResult {
    pub run_id: Uuid,
    /// Backend that produced the decisions.
    pub backend: String,
    /// Backends attempted, in order, including the successful one.
    pub attempted: Vec<String>,
    pub fell_back: bool,
    pub decisions: Vec<ArbitrationDecision>,
    pub bias: BiasParameters,
    pub decided_at: DateTime<Utc>,
}
