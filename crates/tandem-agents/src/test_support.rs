//! Test doubles shared by unit and integration tests.
//!
//! `ScriptedBackend` stands in for a model backend: it replies with canned
//! text, fails, hangs past any timeout, or computes a reply from the request.
//! The reply helpers render responses in the shape the prompts ask for.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use tandem_cache::{CacheError, EnrichmentSink};
use tandem_models::{AnalysisBundle, EnrichmentRow, NewsItem, SocialMetrics, SourceMetrics};

use crate::backend::{ModelBackend, ModelRequest};
use crate::error::AgentError;

type Responder = Box<dyn Fn(&ModelRequest) -> Result<String, AgentError> + Send + Sync>;

enum Script {
    Reply(String),
    Delayed(Duration, String),
    Fail(String),
    Hang,
    Respond(Responder),
}

/// A backend that follows a fixed script and records what it was asked.
pub struct ScriptedBackend {
    id: String,
    script: Script,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedBackend {
    fn new(id: &str, script: Script) -> Self {
        Self {
            id: id.to_string(),
            script,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(id: &str, reply: impl Into<String>) -> Self {
        Self::new(id, Script::Reply(reply.into()))
    }

    /// Replies after `delay`, holding an in-flight slot meanwhile.
    pub fn delayed(id: &str, delay: Duration, reply: impl Into<String>) -> Self {
        Self::new(id, Script::Delayed(delay, reply.into()))
    }

    pub fn failing(id: &str, message: &str) -> Self {
        Self::new(id, Script::Fail(message.to_string()))
    }

    /// Never completes; only a caller-side timeout ends the call.
    pub fn hanging(id: &str) -> Self {
        Self::new(id, Script::Hang)
    }

    pub fn with_responder<F>(id: &str, responder: F) -> Self
    where
        F: Fn(&ModelRequest) -> Result<String, AgentError> + Send + Sync + 'static,
    {
        Self::new(id, Script::Respond(Box::new(responder)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        match &self.script {
            Script::Reply(text) => Ok(text.clone()),
            Script::Delayed(delay, text) => {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(*delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(text.clone())
            }
            Script::Fail(message) => Err(AgentError::transport(&self.id, message.clone())),
            Script::Hang => std::future::pending().await,
            Script::Respond(responder) => responder(request),
        }
    }
}

/// Scout response in a fenced JSON block, as models usually return it.
pub fn scout_reply(recommendation: &str, confidence: u32, raw_sentiment: &str, mentions: u64) -> String {
    let body = json!({
        "recommendation": recommendation,
        "confidence": confidence,
        "reasoning": "Price holding above the 20-day with rising volume",
        "key_factors": ["trend", "volume"],
        "social": {
            "raw_sentiment": raw_sentiment,
            "mention_count": mentions,
            "themes": ["earnings run-up"],
            "source_breakdown": {"reddit": mentions}
        }
    });
    format!("Here is my read:\n```json\n{body}\n```")
}

pub fn refinement_reply(sentiment_score: &str) -> String {
    json!({
        "sentiment_score": sentiment_score,
        "reasoning": "Themes are consistent across sources",
        "narrative": "Retail positioning ahead of earnings"
    })
    .to_string()
}

pub fn news_reply(recommendation: &str, confidence: u32) -> String {
    json!({
        "recommendation": recommendation,
        "confidence": confidence,
        "reasoning": "Recent headlines are constructive"
    })
    .to_string()
}

/// Arbitration response with `(symbol, action, confidence)` decisions.
pub fn decisions_reply(decisions: &[(&str, &str, u32)]) -> String {
    let decisions: Vec<_> = decisions
        .iter()
        .map(|(symbol, action, confidence)| {
            json!({
                "symbol": symbol,
                "action": action,
                "confidence": confidence,
                "rationale": format!("{symbol} ranks well on the weighted signals")
            })
        })
        .collect();
    json!({ "decisions": decisions }).to_string()
}

/// Vision response with the named patterns set.
pub fn vision_reply(patterns: &[&str]) -> String {
    let flags: serde_json::Map<String, serde_json::Value> = [
        "breakout",
        "bull_flag",
        "double_bottom",
        "cup_and_handle",
        "head_and_shoulders",
        "descending_triangle",
    ]
    .iter()
    .map(|p| (p.to_string(), json!(patterns.contains(p))))
    .collect();
    json!({ "patterns": flags }).to_string()
}

pub fn social_reply(sentiment_score: &str) -> String {
    json!({ "sentiment_score": sentiment_score, "summary": "Mildly constructive chatter" })
        .to_string()
}

/// A realistic bundle with mildly bullish social metrics.
pub fn sample_bundle(symbol: &str) -> AnalysisBundle {
    let mut technical = serde_json::Map::new();
    technical.insert("rsi_14".to_string(), json!(58.4));
    technical.insert("sma_20".to_string(), json!(131.2));
    technical.insert("trend".to_string(), json!("up"));

    let mut sources = BTreeMap::new();
    sources.insert(
        "reddit".to_string(),
        SourceMetrics {
            mentions: 300,
            sentiment: Decimal::new(6, 1),
            posts: vec!["earnings run-up incoming".to_string()],
        },
    );
    sources.insert(
        "stocktwits".to_string(),
        SourceMetrics {
            mentions: 100,
            sentiment: Decimal::new(5, 1),
            posts: vec![],
        },
    );

    AnalysisBundle {
        symbol: symbol.to_string(),
        technical,
        news: vec![NewsItem {
            headline: format!("{symbol} raises full-year guidance"),
            summary: None,
            source: Some("wire".to_string()),
            published_at: None,
        }],
        social: SocialMetrics { sources },
        base_confidence: Decimal::new(6, 1),
        ..Default::default()
    }
}

/// Sink that keeps every write in memory.
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<EnrichmentRow>>>,
}

impl MemorySink {
    /// Number of `upsert_batch` calls received.
    pub fn writes(&self) -> usize {
        self.batches.lock().map(|b| b.len()).unwrap_or_default()
    }

    /// All rows received, across writes.
    pub fn rows(&self) -> Vec<EnrichmentRow> {
        self.batches
            .lock()
            .map(|b| b.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EnrichmentSink for MemorySink {
    async fn upsert_batch(&self, rows: &[EnrichmentRow]) -> Result<usize, CacheError> {
        let mut batches = self
            .batches
            .lock()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        batches.push(rows.to_vec());
        Ok(rows.len())
    }
}

/// Sink whose store is always down.
pub struct FailingSink;

#[async_trait]
impl EnrichmentSink for FailingSink {
    async fn upsert_batch(&self, _rows: &[EnrichmentRow]) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("store offline".to_string()))
    }
}
