use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rust_decimal::Decimal;
use tandem_models::{AnalysisBundle, ConsensusResult};
use tracing::{debug, info, warn};

use crate::adapter::{NewsAdapter, ScoutAdapter, SentimentAdapter};
use crate::error::AgentError;
use crate::scoring::{self, DEFAULT_HYBRID_THRESHOLD};

/// Dual-model consensus: scout, refine, cross-review, resolve, validate.
///
/// Phases run strictly in order. Only the two refinement calls of phase 2
/// run concurrently. Any adapter failure in phases 1-2 aborts the run.
pub struct ConsensusEngine {
    scout: Arc<ScoutAdapter>,
    sentiment: Arc<SentimentAdapter>,
    news: Arc<NewsAdapter>,
    hybrid_threshold: Decimal,
}

impl ConsensusEngine {
    pub fn new(
        scout: Arc<ScoutAdapter>,
        sentiment: Arc<SentimentAdapter>,
        news: Arc<NewsAdapter>,
    ) -> Self {
        Self {
            scout,
            sentiment,
            news,
            hybrid_threshold: DEFAULT_HYBRID_THRESHOLD,
        }
    }

    pub fn with_hybrid_threshold(mut self, threshold: Decimal) -> Self {
        self.hybrid_threshold = threshold;
        self
    }

    /// Run the pipeline. `None` means no consensus is available; the cause is logged.
    pub async fn analyze(&self, bundle: &AnalysisBundle) -> Option<ConsensusResult> {
        match self.try_analyze(bundle).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(
                    symbol = %bundle.symbol,
                    kind = ?e.kind(),
                    error = %e,
                    "Consensus pipeline aborted"
                );
                None
            }
        }
    }

    /// Run the pipeline, surfacing the abort cause.
    pub async fn try_analyze(&self, bundle: &AnalysisBundle) -> Result<ConsensusResult, AgentError> {
        let symbol = bundle.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(AgentError::InvalidInput("bundle has no symbol".to_string()));
        }
        let start = Instant::now();

        // Phase 1: scout
        let scout = self.scout.analyze(&symbol, bundle).await?;
        debug!(
            symbol = %symbol,
            recommendation = %scout.analysis.recommendation,
            confidence = %scout.analysis.confidence,
            "Scout phase complete"
        );

        // Phase 2: sentiment refinement and news, independent of each other
        let (refinement, news) = tokio::join!(
            self.sentiment.analyze(&symbol, &scout.social),
            self.news.analyze(&symbol, &bundle.news),
        );
        let refinement = refinement?;
        let news = news?;

        // Phase 3: cross-review
        let scout_score = scoring::analysis_bullishness(&scout.analysis);
        let refinement_score = refinement
            .sentiment_score
            .clamp(Decimal::ZERO, Decimal::ONE);
        let review = scoring::cross_review(scout_score, &scout.social, &refinement, &news);

        // Phase 4: resolution
        let resolution = scoring::resolve(&scout.analysis, &refinement, &news, &review);

        // Phase 5: hybrid validation against the raw social metrics
        let estimate = scoring::independent_sentiment(&bundle.social);
        let hybrid_validation_triggered = scoring::hybrid_validation_triggered(
            estimate,
            scout_score,
            refinement_score,
            self.hybrid_threshold,
        );
        if hybrid_validation_triggered {
            warn!(
                symbol = %symbol,
                estimate = ?estimate,
                scout_score = %scout_score,
                refinement_score = %refinement_score,
                "Hybrid validation flagged consensus"
            );
        }

        let reasoning = format!(
            "{:?} (delta {}). Scout: {} Sentiment: {} News: {}",
            resolution.agreement,
            (scout_score - refinement_score).abs().round_dp(2),
            scout.analysis.reasoning,
            refinement.analysis.reasoning,
            news.reasoning
        );

        info!(
            symbol = %symbol,
            recommendation = %resolution.recommendation,
            confidence = %resolution.confidence,
            agreement = ?resolution.agreement,
            hybrid_validation_triggered,
            elapsed_ms = start.elapsed().as_millis(),
            "Consensus reached"
        );

        Ok(ConsensusResult {
            symbol,
            recommendation: resolution.recommendation,
            confidence: resolution.confidence,
            agreement: resolution.agreement,
            scout_score,
            refinement_score,
            confidence_adjustment: resolution.confidence_adjustment,
            reasoning,
            risk_warning: resolution.risk_warning,
            bridge_score: review.bridge_score,
            cross_review: review,
            hybrid_validation_triggered,
            decided_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterSettings, CachedAdapter, NewsTask, ScoutTask, SentimentRefinementTask};
    use crate::error::ErrorKind;
    use crate::test_support::{
        news_reply, refinement_reply, sample_bundle, scout_reply, ScriptedBackend,
    };
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tandem_cache::AnalysisCache;
    use tandem_models::{AgreementLevel, Recommendation};

    struct Harness {
        engine: ConsensusEngine,
        scout: Arc<ScriptedBackend>,
        sentiment: Arc<ScriptedBackend>,
        news: Arc<ScriptedBackend>,
    }

    fn harness(scout: ScriptedBackend, sentiment: ScriptedBackend, news: ScriptedBackend) -> Harness {
        let cache = Arc::new(AnalysisCache::new(100, Duration::from_secs(300)));
        let settings = AdapterSettings {
            timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let scout = Arc::new(scout);
        let sentiment = Arc::new(sentiment);
        let news = Arc::new(news);
        let engine = ConsensusEngine::new(
            Arc::new(CachedAdapter::new(ScoutTask, scout.clone(), cache.clone(), settings.clone())),
            Arc::new(CachedAdapter::new(
                SentimentRefinementTask,
                sentiment.clone(),
                cache.clone(),
                settings.clone(),
            )),
            Arc::new(CachedAdapter::new(NewsTask, news.clone(), cache, settings)),
        );
        Harness {
            engine,
            scout,
            sentiment,
            news,
        }
    }

    #[tokio::test]
    async fn strong_agreement_boosts_confidence() {
        let h = harness(
            ScriptedBackend::replying("haiku", scout_reply("buy", 80, "0.75", 400)),
            ScriptedBackend::replying("sonnet", refinement_reply("0.82")),
            ScriptedBackend::replying("sonnet-news", news_reply("buy", 72)),
        );

        let result = h.engine.analyze(&sample_bundle("nvda")).await.unwrap();
        assert_eq!(result.symbol, "NVDA");
        assert_eq!(result.agreement, AgreementLevel::StrongAgreement);
        assert_eq!(result.confidence, dec!(90.72));
        assert_eq!(result.recommendation, Recommendation::Buy);
        assert_eq!(result.confidence_adjustment, dec!(0.12));
    }

    #[tokio::test]
    async fn strong_disagreement_holds_with_warning() {
        let h = harness(
            ScriptedBackend::replying("haiku", scout_reply("buy", 80, "0.75", 400)),
            ScriptedBackend::replying("sonnet", refinement_reply("0.20")),
            ScriptedBackend::replying("sonnet-news", news_reply("sell", 60)),
        );

        let result = h.engine.analyze(&sample_bundle("NVDA")).await.unwrap();
        assert_eq!(result.agreement, AgreementLevel::StrongDisagreement);
        assert_eq!(result.recommendation, Recommendation::Hold);
        assert_eq!(result.confidence, dec!(42.5));
        assert!(result.risk_warning.is_some());
    }

    #[tokio::test]
    async fn scout_failure_aborts_before_refinement() {
        let h = harness(
            ScriptedBackend::failing("haiku", "connection reset"),
            ScriptedBackend::replying("sonnet", refinement_reply("0.8")),
            ScriptedBackend::replying("sonnet-news", news_reply("buy", 70)),
        );

        let err = h.engine.try_analyze(&sample_bundle("NVDA")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(h.sentiment.calls(), 0);
        assert_eq!(h.news.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_news_aborts_pipeline() {
        let h = harness(
            ScriptedBackend::replying("haiku", scout_reply("buy", 80, "0.75", 400)),
            ScriptedBackend::replying("sonnet", refinement_reply("0.8")),
            ScriptedBackend::replying("sonnet-news", "The news looks fine overall."),
        );

        assert!(h.engine.analyze(&sample_bundle("NVDA")).await.is_none());
        assert_eq!(h.scout.calls(), 1);
        assert_eq!(h.sentiment.calls(), 1);
    }

    #[tokio::test]
    async fn refinement_timeout_aborts_pipeline() {
        let h = harness(
            ScriptedBackend::replying("haiku", scout_reply("buy", 80, "0.75", 400)),
            ScriptedBackend::hanging("sonnet"),
            ScriptedBackend::replying("sonnet-news", news_reply("buy", 70)),
        );

        let err = h.engine.try_analyze(&sample_bundle("NVDA")).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout { .. }));
    }

    #[tokio::test]
    async fn hybrid_validation_flags_divergent_social_metrics() {
        let h = harness(
            ScriptedBackend::replying("haiku", scout_reply("buy", 80, "0.75", 400)),
            ScriptedBackend::replying("sonnet", refinement_reply("0.82")),
            ScriptedBackend::replying("sonnet-news", news_reply("buy", 72)),
        );
        // sample_bundle social sentiment is mildly bullish; make it sharply bearish
        let mut bundle = sample_bundle("NVDA");
        for metrics in bundle.social.sources.values_mut() {
            metrics.sentiment = dec!(-0.8);
        }

        let result = h.engine.analyze(&bundle).await.unwrap();
        assert!(result.hybrid_validation_triggered);
        assert_eq!(result.recommendation, Recommendation::Buy);
    }

    #[tokio::test]
    async fn no_social_sources_never_flags() {
        let h = harness(
            ScriptedBackend::replying("haiku", scout_reply("buy", 80, "0.75", 400)),
            ScriptedBackend::replying("sonnet", refinement_reply("0.82")),
            ScriptedBackend::replying("sonnet-news", news_reply("buy", 72)),
        );
        let mut bundle = sample_bundle("NVDA");
        bundle.social.sources.clear();

        let result = h.engine.analyze(&bundle).await.unwrap();
        assert!(!result.hybrid_validation_triggered);
    }

    #[tokio::test]
    async fn second_run_in_bucket_makes_no_calls() {
        let h = harness(
            ScriptedBackend::replying("haiku", scout_reply("buy", 80, "0.75", 400)),
            ScriptedBackend::replying("sonnet", refinement_reply("0.82")),
            ScriptedBackend::replying("sonnet-news", news_reply("buy", 72)),
        );
        let bundle = sample_bundle("NVDA");

        let first = h.engine.analyze(&bundle).await.unwrap();
        let second = h.engine.analyze(&bundle).await.unwrap();

        assert_eq!(first.confidence, second.confidence);
        assert_eq!(h.scout.calls(), 1);
        assert_eq!(h.sentiment.calls(), 1);
        assert_eq!(h.news.calls(), 1);
    }

    #[tokio::test]
    async fn empty_symbol_is_invalid_input() {
        let h = harness(
            ScriptedBackend::replying("haiku", scout_reply("buy", 80, "0.75", 400)),
            ScriptedBackend::replying("sonnet", refinement_reply("0.82")),
            ScriptedBackend::replying("sonnet-news", news_reply("buy", 72)),
        );
        let err = h.engine.try_analyze(&AnalysisBundle::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
        assert_eq!(h.scout.calls(), 0);
    }
}
