use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tandem_cache::EnrichmentSink;
use tandem_models::{
    BatchItem, BatchOutcome, BatchReport, EnrichmentRow, PatternFlags, SocialMetrics, SocialScore,
};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::backend::{complete_with_timeout, ModelBackend, ModelRequest};
use crate::error::{AgentError, ErrorKind};
use crate::parser::{optional_str, optional_u64, parse_payload, required_decimal, sub_payload, Payload};
use crate::prompts;

/// One per-item enrichment call: prompt, parse, documented default, store row.
pub trait BatchTask: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;
    type Output: Clone + Send + 'static;

    fn name(&self) -> &'static str;

    /// Value substituted for an item whose call failed.
    fn default_output(&self) -> Self::Output;

    fn system_prompt(&self) -> String;

    fn render(&self, item: &BatchItem<Self::Payload>) -> Result<String, AgentError>;

    fn parse(&self, item: &BatchItem<Self::Payload>, raw: &str) -> Result<Self::Output, AgentError>;

    fn to_row(&self, date: NaiveDate, symbol: &str, output: &Self::Output) -> EnrichmentRow;
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Ceiling on in-flight calls.
    pub max_concurrency: usize,
    pub item_timeout: Duration,
    /// Delay between dispatches beyond the ceiling.
    pub stagger: Duration,
    pub prompt_max_chars: usize,
    pub max_tokens: Option<u32>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 25,
            item_timeout: Duration::from_secs(30),
            stagger: Duration::from_millis(150),
            prompt_max_chars: 4_000,
            max_tokens: None,
        }
    }
}

/// Fans a batch out to one bounded call per item, substituting defaults for
/// failed items, then persists the whole result set in one write.
pub struct BatchAnalyzer<T: BatchTask> {
    task: Arc<T>,
    backend: Arc<dyn ModelBackend>,
    sink: Arc<dyn EnrichmentSink>,
    settings: BatchSettings,
}

impl<T: BatchTask> BatchAnalyzer<T> {
    pub fn new(
        task: T,
        backend: Arc<dyn ModelBackend>,
        sink: Arc<dyn EnrichmentSink>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            task: Arc::new(task),
            backend,
            sink,
            settings,
        }
    }

    /// Returns exactly one outcome per item, in input order.
    pub async fn analyze_batch(&self, items: Vec<BatchItem<T::Payload>>) -> BatchReport<T::Output> {
        if items.is_empty() {
            return BatchReport {
                outcomes: Vec::new(),
                failed: 0,
                persisted: false,
            };
        }

        let date = Utc::now().date_naive();
        let start = Instant::now();
        let total = items.len();
        let ceiling = self.settings.max_concurrency.max(1);
        let stagger = total > ceiling && !self.settings.stagger.is_zero();
        let semaphore = Arc::new(Semaphore::new(ceiling));

        let mut symbols = Vec::with_capacity(total);
        let mut handles = Vec::with_capacity(total);

        for (index, item) in items.into_iter().enumerate() {
            if stagger && index >= ceiling {
                tokio::time::sleep(self.settings.stagger).await;
            }
            symbols.push(item.symbol.clone());

            let sem = Arc::clone(&semaphore);
            let task = Arc::clone(&self.task);
            let backend = Arc::clone(&self.backend);
            let settings = self.settings.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| AgentError::Internal(format!("semaphore closed: {e}")))?;
                run_item(task.as_ref(), backend.as_ref(), &settings, &item).await
            }));
        }

        let mut outcomes = Vec::with_capacity(total);
        for (symbol, handle) in symbols.into_iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(AgentError::Internal(format!("item task failed: {e}"))),
            };
            outcomes.push(match result {
                Ok(output) => BatchOutcome {
                    symbol,
                    result: output,
                    success: true,
                    error: None,
                },
                Err(e) => {
                    warn!(
                        task = self.task.name(),
                        symbol = %symbol,
                        kind = ?e.kind(),
                        error = %e,
                        "Batch item failed, substituting default"
                    );
                    BatchOutcome {
                        symbol,
                        result: self.task.default_output(),
                        success: false,
                        error: Some(format!("{:?}: {e}", e.kind())),
                    }
                }
            });
        }

        let failed = outcomes.iter().filter(|o| !o.success).count();
        if failed > 0 {
            warn!(
                task = self.task.name(),
                kind = ?ErrorKind::PartialBatchFailure,
                failed,
                total,
                "Batch completed with defaults substituted"
            );
        }

        let rows: Vec<EnrichmentRow> = outcomes
            .iter()
            .map(|o| {
                if o.success {
                    self.task.to_row(date, &o.symbol, &o.result)
                } else {
                    EnrichmentRow::unscored(date, &o.symbol)
                }
            })
            .collect();
        let persisted = match self.sink.upsert_batch(&rows).await {
            Ok(written) => {
                debug!(task = self.task.name(), written, "Batch persisted");
                true
            }
            Err(e) => {
                error!(task = self.task.name(), error = %e, "Failed to persist batch results");
                false
            }
        };

        info!(
            task = self.task.name(),
            total,
            failed,
            persisted,
            elapsed_ms = start.elapsed().as_millis(),
            "Batch complete"
        );

        BatchReport {
            outcomes,
            failed,
            persisted,
        }
    }
}

async fn run_item<T: BatchTask>(
    task: &T,
    backend: &dyn ModelBackend,
    settings: &BatchSettings,
    item: &BatchItem<T::Payload>,
) -> Result<T::Output, AgentError> {
    let rendered = task.render(item)?;
    let request = ModelRequest {
        system_prompt: task.system_prompt(),
        user_prompt: prompts::truncate_to_budget(&rendered, settings.prompt_max_chars),
        max_tokens: settings.max_tokens,
    };
    let raw = complete_with_timeout(backend, &request, settings.item_timeout).await?;
    task.parse(item, &raw)
}

/// Chart-pattern classification from a textual chart summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisionPatternTask;

fn flag(patterns: &Payload, name: &str) -> Result<bool, AgentError> {
    match patterns.get(name) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(true),
            "false" | "no" | "n" | "0" | "" => Ok(false),
            other => Err(AgentError::MalformedResponse(format!(
                "Pattern {name} is not a flag: {other}"
            ))),
        },
        Some(other) => Err(AgentError::MalformedResponse(format!(
            "Pattern {name} is not a flag: {other}"
        ))),
    }
}

impl BatchTask for VisionPatternTask {
    type Payload = String;
    type Output = PatternFlags;

    fn name(&self) -> &'static str {
        "vision"
    }

    fn default_output(&self) -> PatternFlags {
        PatternFlags::default()
    }

    fn system_prompt(&self) -> String {
        prompts::vision_system_prompt()
    }

    fn render(&self, item: &BatchItem<String>) -> Result<String, AgentError> {
        Ok(prompts::render_vision_prompt(&item.symbol, &item.payload))
    }

    fn parse(&self, _item: &BatchItem<String>, raw: &str) -> Result<PatternFlags, AgentError> {
        let payload = parse_payload(raw)?;
        let patterns = sub_payload(&payload, "patterns")
            .ok_or_else(|| AgentError::MalformedResponse("Missing field: patterns".to_string()))?;
        Ok(PatternFlags {
            breakout: flag(&patterns, "breakout")?,
            bull_flag: flag(&patterns, "bull_flag")?,
            double_bottom: flag(&patterns, "double_bottom")?,
            cup_and_handle: flag(&patterns, "cup_and_handle")?,
            head_and_shoulders: flag(&patterns, "head_and_shoulders")?,
            descending_triangle: flag(&patterns, "descending_triangle")?,
        })
    }

    fn to_row(&self, date: NaiveDate, symbol: &str, output: &PatternFlags) -> EnrichmentRow {
        EnrichmentRow::patterns(date, symbol, *output)
    }
}

/// Social sentiment scoring from per-source metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocialSentimentTask;

impl BatchTask for SocialSentimentTask {
    type Payload = SocialMetrics;
    type Output = SocialScore;

    fn name(&self) -> &'static str {
        "social"
    }

    fn default_output(&self) -> SocialScore {
        SocialScore::default()
    }

    fn system_prompt(&self) -> String {
        prompts::social_system_prompt()
    }

    fn render(&self, item: &BatchItem<SocialMetrics>) -> Result<String, AgentError> {
        prompts::render_social_prompt(&item.symbol, &item.payload)
    }

    fn parse(&self, item: &BatchItem<SocialMetrics>, raw: &str) -> Result<SocialScore, AgentError> {
        let payload = parse_payload(raw)?;
        Ok(SocialScore {
            score: required_decimal(&payload, "sentiment_score")?
                .clamp(Decimal::NEGATIVE_ONE, Decimal::ONE),
            mentions: optional_u64(&payload, "mentions")?
                .unwrap_or_else(|| item.payload.total_mentions()),
            summary: optional_str(&payload, "summary"),
        })
    }

    fn to_row(&self, date: NaiveDate, symbol: &str, output: &SocialScore) -> EnrichmentRow {
        EnrichmentRow::sentiment(date, symbol, output.score)
    }
}
