use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tandem_cache::AnalysisCache;
use tandem_models::{
    AdapterRole, AnalysisBundle, ModelAnalysis, NewsItem, ScoutReport, SentimentRefinement,
    SocialDataPacket,
};
use tracing::{debug, warn};

use crate::backend::{complete_with_timeout, ModelBackend, ModelRequest};
use crate::error::AgentError;
use crate::parser::{
    clamp_unit, normalize_confidence, optional_decimal, optional_recommendation, optional_str,
    parse_model_analysis, parse_payload, required_decimal, required_str, required_u64,
    string_list, sub_payload, Payload,
};
use crate::prompts;
use crate::scoring;

/// Per-adapter call settings.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub timeout: Duration,
    pub prompt_max_chars: usize,
    /// Response budget; `None` defers to the backend.
    pub max_tokens: Option<u32>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            prompt_max_chars: 12_000,
            max_tokens: None,
        }
    }
}

/// One kind of structured analysis: how to prompt for it and how to read the answer.
pub trait AnalysisTask: Send + Sync + 'static {
    type Input: Send + Sync;
    type Output: Serialize + DeserializeOwned + Send + Sync;

    /// Cache namespace, e.g. `scout`.
    const KIND: &'static str;

    fn system_prompt(&self) -> String;

    fn render(&self, symbol: &str, input: &Self::Input) -> Result<String, AgentError>;

    fn parse(&self, symbol: &str, raw: &str) -> Result<Self::Output, AgentError>;
}

/// `analyze(symbol, sub-bundle)`: a typed model call. Mockable for testing.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    async fn analyze(&self, symbol: &str, input: &Self::Input) -> Result<Self::Output, AgentError>;
}

pub type ScoutAdapter = dyn ModelAdapter<Input = AnalysisBundle, Output = ScoutReport>;
pub type SentimentAdapter =
    dyn ModelAdapter<Input = SocialDataPacket, Output = SentimentRefinement>;
pub type NewsAdapter = dyn ModelAdapter<Input = Vec<NewsItem>, Output = ModelAnalysis>;

/// Adapter that consults the analysis cache before making one bounded backend call.
///
/// A hit returns without any external call. A miss renders a capped prompt,
/// calls the backend under the configured timeout, parses, and writes the
/// result back to the cache before returning it.
pub struct CachedAdapter<T: AnalysisTask> {
    task: T,
    backend: Arc<dyn ModelBackend>,
    cache: Arc<AnalysisCache>,
    settings: AdapterSettings,
}

impl<T: AnalysisTask> CachedAdapter<T> {
    pub fn new(
        task: T,
        backend: Arc<dyn ModelBackend>,
        cache: Arc<AnalysisCache>,
        settings: AdapterSettings,
    ) -> Self {
        Self {
            task,
            backend,
            cache,
            settings,
        }
    }

    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }
}

#[async_trait]
impl<T: AnalysisTask> ModelAdapter for CachedAdapter<T> {
    type Input = T::Input;
    type Output = T::Output;

    async fn analyze(&self, symbol: &str, input: &T::Input) -> Result<T::Output, AgentError> {
        if let Some(hit) = self.cache.get::<T::Output>(T::KIND, symbol).await {
            return Ok(hit);
        }

        let rendered = self.task.render(symbol, input)?;
        let request = ModelRequest {
            system_prompt: self.task.system_prompt(),
            user_prompt: prompts::truncate_to_budget(&rendered, self.settings.prompt_max_chars),
            max_tokens: self.settings.max_tokens,
        };

        debug!(
            symbol = %symbol,
            kind = T::KIND,
            backend = %self.backend.id(),
            prompt_chars = request.user_prompt.len(),
            "Adapter cache miss, calling backend"
        );

        let raw = complete_with_timeout(self.backend.as_ref(), &request, self.settings.timeout)
            .await?;
        let output = self.task.parse(symbol, &raw)?;

        if let Err(e) = self.cache.put(T::KIND, symbol, &output).await {
            warn!(symbol = %symbol, kind = T::KIND, error = %e, "Failed to cache adapter output");
        }
        Ok(output)
    }
}

/// Technical read of the full bundle plus the raw social extract.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoutTask;

fn source_breakdown(social: &Payload) -> BTreeMap<String, u64> {
    match social.get("source_breakdown") {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(source, count)| {
                let count = match count {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                }?;
                Some((source.clone(), count))
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

impl AnalysisTask for ScoutTask {
    type Input = AnalysisBundle;
    type Output = ScoutReport;

    const KIND: &'static str = "scout";

    fn system_prompt(&self) -> String {
        prompts::scout_system_prompt()
    }

    fn render(&self, _symbol: &str, input: &AnalysisBundle) -> Result<String, AgentError> {
        prompts::render_scout_prompt(input)
    }

    fn parse(&self, symbol: &str, raw: &str) -> Result<ScoutReport, AgentError> {
        let payload = parse_payload(raw)?;
        let analysis = parse_model_analysis(&payload, AdapterRole::Scout)?;
        let social = sub_payload(&payload, "social")
            .ok_or_else(|| AgentError::MalformedResponse("Missing field: social".to_string()))?;

        let packet = SocialDataPacket {
            symbol: symbol.to_ascii_uppercase(),
            raw_sentiment: clamp_unit(required_decimal(&social, "raw_sentiment")?),
            mention_count: required_u64(&social, "mention_count")?,
            themes: string_list(&social, "themes"),
            source_breakdown: source_breakdown(&social),
            extraction_confidence: clamp_unit(
                optional_decimal(&social, "extraction_confidence")?
                    .unwrap_or(Decimal::new(5, 1)),
            ),
            extracted_at: Utc::now(),
        };

        Ok(ScoutReport {
            analysis,
            social: packet,
        })
    }
}

/// Refines the scout's social extract into a narrative sentiment score.
#[derive(Debug, Clone, Copy, Default)]
pub struct SentimentRefinementTask;

impl AnalysisTask for SentimentRefinementTask {
    type Input = SocialDataPacket;
    type Output = SentimentRefinement;

    const KIND: &'static str = "sentiment_refinement";

    fn system_prompt(&self) -> String {
        prompts::sentiment_refinement_system_prompt()
    }

    fn render(&self, _symbol: &str, input: &SocialDataPacket) -> Result<String, AgentError> {
        prompts::render_refinement_prompt(input)
    }

    fn parse(&self, _symbol: &str, raw: &str) -> Result<SentimentRefinement, AgentError> {
        let payload = parse_payload(raw)?;
        let score = clamp_unit(required_decimal(&payload, "sentiment_score")?);

        // The score is authoritative; direction and confidence fall back to it.
        let recommendation = optional_recommendation(&payload, "recommendation")?
            .unwrap_or_else(|| scoring::recommendation_from_bullishness(score));
        let confidence = match optional_decimal(&payload, "confidence")? {
            Some(c) => normalize_confidence(c),
            None => Decimal::ONE_HUNDRED * score.max(Decimal::ONE - score),
        };

        Ok(SentimentRefinement {
            analysis: ModelAnalysis {
                role: AdapterRole::Refinement,
                recommendation,
                confidence,
                reasoning: required_str(&payload, "reasoning")?,
                risk_warning: optional_str(&payload, "risk_warning"),
                key_factors: string_list(&payload, "key_factors"),
                contrarian_note: optional_str(&payload, "contrarian_note"),
            },
            sentiment_score: score,
            narrative: optional_str(&payload, "narrative"),
        })
    }
}

/// Independent read of the raw news sub-bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewsTask;

impl AnalysisTask for NewsTask {
    type Input = Vec<NewsItem>;
    type Output = ModelAnalysis;

    const KIND: &'static str = "news";

    fn system_prompt(&self) -> String {
        prompts::news_system_prompt()
    }

    fn render(&self, symbol: &str, input: &Vec<NewsItem>) -> Result<String, AgentError> {
        prompts::render_news_prompt(symbol, input)
    }

    fn parse(&self, _symbol: &str, raw: &str) -> Result<ModelAnalysis, AgentError> {
        let payload = parse_payload(raw)?;
        parse_model_analysis(&payload, AdapterRole::Refinement)
    }
}
