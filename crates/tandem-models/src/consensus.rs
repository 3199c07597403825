use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::analysis::Recommendation;

/// Upper bound (inclusive) of the score delta for strong agreement.
pub const STRONG_AGREEMENT_MAX_DELTA: Decimal = Decimal::from_parts(2, 0, 0, false, 1);
/// Upper bound (inclusive) of the score delta for partial agreement.
pub const PARTIAL_AGREEMENT_MAX_DELTA: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// How closely the scout and refinement scores align.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLevel {
    StrongAgreement,
    PartialAgreement,
    StrongDisagreement,
}

impl AgreementLevel {
    /// Classify an absolute score delta on the 0-1 scale.
    /// Both boundaries are inclusive on the agreeing side.
    pub fn classify(delta: Decimal) -> Self {
        let delta = delta.abs();
        if delta <= STRONG_AGREEMENT_MAX_DELTA {
            Self::StrongAgreement
        } else if delta <= PARTIAL_AGREEMENT_MAX_DELTA {
            Self::PartialAgreement
        } else {
            Self::StrongDisagreement
        }
    }

    /// Signed multiplicative adjustment applied to the blended confidence.
    pub fn confidence_adjustment(&self) -> Decimal {
        match self {
            Self::StrongAgreement => Decimal::new(12, 2),
            Self::PartialAgreement => Decimal::ZERO,
            Self::StrongDisagreement => Decimal::new(-15, 2),
        }
    }
}

/// Phase-3 advisory signals, all on 0.0 .. 1.0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossReview {
    pub technical_social_correlation: Decimal,
    pub narrative_consistency: Decimal,
    /// Bullishness of the independent news analysis.
    pub narrative_score: Decimal,
    /// Alignment of refined sentiment with raw news.
    pub bridge_score: Decimal,
    pub bridge_bonus: Decimal,
}

/// The sole externally visible artifact of the consensus engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusResult {
    pub symbol: String,
    pub recommendation: Recommendation,
    /// 0 to 100, always clamped.
    pub confidence: Decimal,
    pub agreement: AgreementLevel,
    /// Scout bullishness on 0.0 .. 1.0.
    pub scout_score: Decimal,
    /// Refined sentiment on 0.0 .. 1.0.
    pub refinement_score: Decimal,
    /// Signed fraction, e.g. 0.12 or -0.15.
    pub confidence_adjustment: Decimal,
    pub reasoning: String,
    pub risk_warning: Option<String>,
    pub bridge_score: Decimal,
    pub cross_review: CrossReview,
    /// Advisory: the independent social estimate deviated from the consensus.
    pub hybrid_validation_triggered: bool,
    pub decided_at: DateTime<Utc>,
}
