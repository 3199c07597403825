//! Pure scoring for the consensus engine. Everything here is infallible and
//! works on the 0-1 bullishness scale or the 0-100 confidence scale.

use rust_decimal::Decimal;
use tandem_models::{
    AgreementLevel, CrossReview, ModelAnalysis, Recommendation, SentimentRefinement,
    SocialDataPacket, SocialMetrics,
};

const HALF: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
const BUY_THRESHOLD: Decimal = Decimal::from_parts(6, 0, 0, false, 1);
const SELL_THRESHOLD: Decimal = Decimal::from_parts(4, 0, 0, false, 1);
const BRIDGE_MIN_SCORE: Decimal = Decimal::from_parts(8, 0, 0, false, 1);
const BRIDGE_BONUS: Decimal = Decimal::from_parts(5, 0, 0, false, 2);
const REFINEMENT_BASE_WEIGHT: Decimal = Decimal::from_parts(4, 0, 0, false, 1);
const REFINEMENT_CONSISTENCY_WEIGHT: Decimal = Decimal::from_parts(2, 0, 0, false, 1);
const REFINEMENT_MAX_WEIGHT: Decimal = Decimal::from_parts(65, 0, 0, false, 2);

/// Default deviation above which hybrid validation fires.
pub const DEFAULT_HYBRID_THRESHOLD: Decimal = Decimal::from_parts(2, 0, 0, false, 1);

fn unit(value: Decimal) -> Decimal {
    value.clamp(Decimal::ZERO, Decimal::ONE)
}

fn clamp_confidence(value: Decimal) -> Decimal {
    value.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED).round_dp(2)
}

/// Map a directional call to 0-1 bullishness.
pub fn bullishness(recommendation: Recommendation, confidence: Decimal) -> Decimal {
    let c = unit(confidence / Decimal::ONE_HUNDRED);
    match recommendation {
        Recommendation::Buy => c,
        Recommendation::Sell => Decimal::ONE - c,
        Recommendation::Hold => HALF,
    }
}

pub fn analysis_bullishness(analysis: &ModelAnalysis) -> Decimal {
    bullishness(analysis.recommendation, analysis.confidence)
}

pub fn recommendation_from_bullishness(score: Decimal) -> Recommendation {
    if score >= BUY_THRESHOLD {
        Recommendation::Buy
    } else if score <= SELL_THRESHOLD {
        Recommendation::Sell
    } else {
        Recommendation::Hold
    }
}

/// Refined sentiment expressed as confidence in the scout's direction.
pub fn refinement_confidence(scout: Recommendation, refinement_score: Decimal) -> Decimal {
    let score = unit(refinement_score);
    match scout {
        Recommendation::Sell => Decimal::ONE_HUNDRED * (Decimal::ONE - score),
        Recommendation::Buy | Recommendation::Hold => Decimal::ONE_HUNDRED * score,
    }
}

/// `clamp((a + b) / 2 * (1 + adjustment), 0, 100)`.
pub fn blended_confidence(
    scout_confidence: Decimal,
    refinement_confidence: Decimal,
    adjustment: Decimal,
) -> Decimal {
    let average = (scout_confidence + refinement_confidence) / Decimal::TWO;
    clamp_confidence(average * (Decimal::ONE + adjustment))
}

/// 1.0 same direction, 0.5 when either holds, 0.0 when opposed.
pub fn narrative_consistency(a: Recommendation, b: Recommendation) -> Decimal {
    match (a, b) {
        (Recommendation::Hold, _) | (_, Recommendation::Hold) => HALF,
        (a, b) if a == b => Decimal::ONE,
        _ => Decimal::ZERO,
    }
}

/// Phase-3 advisory signals.
pub fn cross_review(
    scout_score: Decimal,
    packet: &SocialDataPacket,
    refinement: &SentimentRefinement,
    news: &ModelAnalysis,
) -> CrossReview {
    let refinement_score = unit(refinement.sentiment_score);
    let narrative_score = analysis_bullishness(news);
    let bridge_score = unit(Decimal::ONE - (refinement_score - narrative_score).abs());

    let same_side = (refinement_score > HALF && narrative_score > HALF)
        || (refinement_score < HALF && narrative_score < HALF);
    let bridge_bonus = if bridge_score >= BRIDGE_MIN_SCORE && same_side {
        BRIDGE_BONUS
    } else {
        Decimal::ZERO
    };

    CrossReview {
        technical_social_correlation: unit(
            Decimal::ONE - (scout_score - unit(packet.raw_sentiment)).abs(),
        ),
        narrative_consistency: narrative_consistency(
            refinement.analysis.recommendation,
            news.recommendation,
        ),
        narrative_score,
        bridge_score,
        bridge_bonus,
    }
}

/// `(w_scout, w_refinement)` for partial agreement.
pub fn partial_weights(review: &CrossReview) -> (Decimal, Decimal) {
    let refinement = (REFINEMENT_BASE_WEIGHT
        + REFINEMENT_CONSISTENCY_WEIGHT * review.narrative_consistency
        + review.bridge_bonus)
        .clamp(REFINEMENT_BASE_WEIGHT, REFINEMENT_MAX_WEIGHT);
    (Decimal::ONE - refinement, refinement)
}

/// Phase-4 outcome before it is stamped into a `ConsensusResult`.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub agreement: AgreementLevel,
    pub recommendation: Recommendation,
    pub confidence: Decimal,
    pub confidence_adjustment: Decimal,
    pub risk_warning: Option<String>,
}

pub fn resolve(
    scout: &ModelAnalysis,
    refinement: &SentimentRefinement,
    news: &ModelAnalysis,
    review: &CrossReview,
) -> Resolution {
    let scout_score = analysis_bullishness(scout);
    let refinement_score = unit(refinement.sentiment_score);
    let agreement = AgreementLevel::classify(scout_score - refinement_score);
    let adjustment = agreement.confidence_adjustment();

    let scout_confidence = scout.confidence.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
    let refinement_confidence = refinement_confidence(scout.recommendation, refinement_score);

    let first_warning = scout
        .risk_warning
        .clone()
        .or_else(|| refinement.analysis.risk_warning.clone())
        .or_else(|| news.risk_warning.clone());

    match agreement {
        AgreementLevel::StrongAgreement => Resolution {
            agreement,
            recommendation: scout.recommendation,
            confidence: blended_confidence(scout_confidence, refinement_confidence, adjustment),
            confidence_adjustment: adjustment,
            risk_warning: first_warning,
        },
        AgreementLevel::PartialAgreement => {
            let (w_scout, w_refinement) = partial_weights(review);
            let bullish = w_scout * scout_score + w_refinement * refinement_score;
            Resolution {
                agreement,
                recommendation: recommendation_from_bullishness(bullish),
                confidence: clamp_confidence(
                    w_scout * scout_confidence + w_refinement * refinement_confidence,
                ),
                confidence_adjustment: adjustment,
                risk_warning: first_warning,
            }
        }
        AgreementLevel::StrongDisagreement => {
            let mut warning = format!(
                "Scout and refinement disagree (scout {}, refinement {}); defaulting to hold",
                scout_score.round_dp(2),
                refinement_score.round_dp(2)
            );
            if let Some(extra) = first_warning {
                warning.push_str(". ");
                warning.push_str(&extra);
            }
            Resolution {
                agreement,
                recommendation: Recommendation::Hold,
                confidence: blended_confidence(scout_confidence, refinement_confidence, adjustment),
                confidence_adjustment: adjustment,
                risk_warning: Some(warning),
            }
        }
    }
}

/// Mention-weighted mean of per-source sentiment, mapped from -1..1 onto 0..1.
///
/// `None` when the bundle carries no social sources. When every source has
/// zero mentions each source counts once.
pub fn independent_sentiment(social: &SocialMetrics) -> Option<Decimal> {
    if social.sources.is_empty() {
        return None;
    }
    let unweighted = social.sources.values().all(|s| s.mentions == 0);

    let mut weighted = Decimal::ZERO;
    let mut total_weight = Decimal::ZERO;
    for metrics in social.sources.values() {
        let weight = if unweighted {
            Decimal::ONE
        } else {
            Decimal::from(metrics.mentions)
        };
        let s = metrics.sentiment.clamp(Decimal::NEGATIVE_ONE, Decimal::ONE);
        weighted += weight * (s + Decimal::ONE) / Decimal::TWO;
        total_weight += weight;
    }
    Some(unit(weighted / total_weight))
}

/// Whether the independent estimate strays from the mean component score by more than `threshold`.
pub fn hybrid_validation_triggered(
    estimate: Option<Decimal>,
    scout_score: Decimal,
    refinement_score: Decimal,
    threshold: Decimal,
) -> bool {
    match estimate {
        Some(estimate) => {
            let mean = (scout_score + refinement_score) / Decimal::TWO;
            (estimate - mean).abs() > threshold
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use tandem_models::{AdapterRole, SourceMetrics};

    fn analysis(role: AdapterRole, rec: Recommendation, confidence: Decimal) -> ModelAnalysis {
        ModelAnalysis {
            role,
            recommendation: rec,
            confidence,
            reasoning: "test".to_string(),
            risk_warning: None,
            key_factors: vec![],
            contrarian_note: None,
        }
    }

    fn refinement(score: Decimal) -> SentimentRefinement {
        SentimentRefinement {
            analysis: analysis(
                AdapterRole::Refinement,
                recommendation_from_bullishness(score),
                dec!(70),
            ),
            sentiment_score: score,
            narrative: None,
        }
    }

    fn packet(raw: Decimal) -> SocialDataPacket {
        SocialDataPacket {
            symbol: "TEST".to_string(),
            raw_sentiment: raw,
            mention_count: 10,
            themes: vec![],
            source_breakdown: BTreeMap::new(),
            extraction_confidence: dec!(0.5),
            extracted_at: Utc::now(),
        }
    }

    fn run(scout_conf: Decimal, score: Decimal, news_rec: Recommendation) -> Resolution {
        let scout = analysis(AdapterRole::Scout, Recommendation::Buy, scout_conf);
        let refined = refinement(score);
        let news = analysis(AdapterRole::Refinement, news_rec, dec!(70));
        let review = cross_review(analysis_bullishness(&scout), &packet(dec!(0.6)), &refined, &news);
        resolve(&scout, &refined, &news, &review)
    }

    #[test]
    fn strong_agreement_example() {
        let resolution = run(dec!(80), dec!(0.82), Recommendation::Buy);
        assert_eq!(resolution.agreement, AgreementLevel::StrongAgreement);
        assert_eq!(resolution.confidence, dec!(90.72));
        assert_eq!(resolution.confidence_adjustment, dec!(0.12));
        assert_eq!(resolution.recommendation, Recommendation::Buy);
    }

    #[test]
    fn strong_disagreement_example() {
        let resolution = run(dec!(80), dec!(0.20), Recommendation::Buy);
        assert_eq!(resolution.agreement, AgreementLevel::StrongDisagreement);
        assert_eq!(resolution.confidence, dec!(42.5));
        assert_eq!(resolution.recommendation, Recommendation::Hold);
        assert!(resolution.risk_warning.unwrap().contains("disagree"));
    }

    #[test]
    fn boundary_deltas() {
        assert_eq!(
            run(dec!(80), dec!(0.6), Recommendation::Buy).agreement,
            AgreementLevel::StrongAgreement
        );
        assert_eq!(
            run(dec!(80), dec!(0.3), Recommendation::Buy).agreement,
            AgreementLevel::PartialAgreement
        );
        assert_eq!(
            run(dec!(80), dec!(0.29), Recommendation::Buy).agreement,
            AgreementLevel::StrongDisagreement
        );
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(blended_confidence(dec!(100), dec!(100), dec!(0.12)), dec!(100));
        assert_eq!(blended_confidence(dec!(0), dec!(0), dec!(-0.15)), dec!(0));
    }

    #[test]
    fn partial_weighting_leans_on_refinement_when_narratives_agree() {
        let review = CrossReview {
            technical_social_correlation: dec!(0.9),
            narrative_consistency: dec!(1),
            narrative_score: dec!(0.8),
            bridge_score: dec!(0.9),
            bridge_bonus: dec!(0.05),
        };
        assert_eq!(partial_weights(&review), (dec!(0.35), dec!(0.65)));

        let review = CrossReview {
            narrative_consistency: dec!(0),
            bridge_bonus: dec!(0),
            ..review
        };
        assert_eq!(partial_weights(&review), (dec!(0.6), dec!(0.4)));
    }

    #[test]
    fn partial_agreement_is_weighted_not_flat() {
        // scout 0.9 bullish, refinement 0.55: delta 0.35
        let resolution = run(dec!(90), dec!(0.55), Recommendation::Hold);
        assert_eq!(resolution.agreement, AgreementLevel::PartialAgreement);
        assert_eq!(resolution.confidence_adjustment, dec!(0));
        // narrative consistency 0.5 (news holds), no bridge bonus: weights 0.5 / 0.5
        assert_eq!(resolution.confidence, dec!(72.5));
        assert_eq!(resolution.recommendation, Recommendation::Buy);
    }

    #[test]
    fn sell_scout_flips_refinement_confidence() {
        assert_eq!(refinement_confidence(Recommendation::Sell, dec!(0.2)), dec!(80));
        assert_eq!(refinement_confidence(Recommendation::Buy, dec!(0.2)), dec!(20));
    }

    #[test]
    fn bridge_bonus_requires_same_side() {
        let scout = analysis(AdapterRole::Scout, Recommendation::Buy, dec!(70));
        let news = analysis(AdapterRole::Refinement, Recommendation::Buy, dec!(75));
        let review = cross_review(dec!(0.7), &packet(dec!(0.65)), &refinement(dec!(0.7)), &news);
        assert_eq!(review.bridge_score, dec!(0.95));
        assert_eq!(review.bridge_bonus, dec!(0.05));
        assert_eq!(review.narrative_consistency, dec!(1));
        assert_eq!(review.technical_social_correlation, dec!(0.95));

        let news = analysis(AdapterRole::Refinement, Recommendation::Sell, dec!(55));
        let review = cross_review(
            analysis_bullishness(&scout),
            &packet(dec!(0.65)),
            &refinement(dec!(0.52)),
            &news,
        );
        assert_eq!(review.bridge_bonus, dec!(0));
    }

    #[test]
    fn independent_sentiment_is_mention_weighted() {
        let mut sources = BTreeMap::new();
        sources.insert(
            "reddit".to_string(),
            SourceMetrics {
                mentions: 300,
                sentiment: dec!(0.6),
                posts: vec![],
            },
        );
        sources.insert(
            "stocktwits".to_string(),
            SourceMetrics {
                mentions: 100,
                sentiment: dec!(-0.2),
                posts: vec![],
            },
        );
        let social = SocialMetrics { sources };
        // (300 * 0.8 + 100 * 0.4) / 400
        assert_eq!(independent_sentiment(&social), Some(dec!(0.7)));
    }

    #[test]
    fn zero_mentions_weigh_sources_equally() {
        let mut sources = BTreeMap::new();
        for (name, s) in [("a", dec!(1)), ("b", dec!(0))] {
            sources.insert(
                name.to_string(),
                SourceMetrics {
                    mentions: 0,
                    sentiment: s,
                    posts: vec![],
                },
            );
        }
        assert_eq!(
            independent_sentiment(&SocialMetrics { sources }),
            Some(dec!(0.75))
        );
    }

    #[test]
    fn huge_mention_counts_stay_weighted() {
        let mut sources = BTreeMap::new();
        for (name, s) in [("a", dec!(1)), ("b", dec!(0))] {
            sources.insert(
                name.to_string(),
                SourceMetrics {
                    mentions: u64::MAX,
                    sentiment: s,
                    posts: vec![],
                },
            );
        }
        let social = SocialMetrics { sources };
        assert_eq!(social.total_mentions(), u64::MAX);
        assert_eq!(independent_sentiment(&social), Some(dec!(0.75)));
    }

    #[test]
    fn hybrid_threshold_is_strict() {
        assert!(!hybrid_validation_triggered(None, dec!(0.9), dec!(0.9), dec!(0.2)));
        assert!(!hybrid_validation_triggered(
            Some(dec!(0.6)),
            dec!(0.8),
            dec!(0.8),
            dec!(0.2)
        ));
        assert!(hybrid_validation_triggered(
            Some(dec!(0.59)),
            dec!(0.8),
            dec!(0.8),
            dec!(0.2)
        ));
    }
}
