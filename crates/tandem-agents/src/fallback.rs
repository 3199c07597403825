use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use tandem_models::{ArbitrationDecision, ArbitrationResult, Candidate};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{complete_with_timeout, BackendRegistry, ModelRequest};
use crate::bias::BiasSource;
use crate::error::AgentError;
use crate::parser::{
    normalize_confidence, optional_decimal, optional_str, parse_payload, required_recommendation,
    required_str, Payload,
};
use crate::prompts;

/// Ordered backend ids for one arbitration run. The terminal backend appears
/// exactly once, always last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    backends: Vec<String>,
}

impl FallbackChain {
    /// Primary first, then `known` in order, deduplicated, then the terminal.
    pub fn build(primary: &str, known: &[String], terminal: &str) -> Self {
        let mut backends: Vec<String> = Vec::with_capacity(known.len() + 2);
        for id in std::iter::once(primary).chain(known.iter().map(String::as_str)) {
            if id != terminal && !id.is_empty() && !backends.iter().any(|b| b == id) {
                backends.push(id.to_string());
            }
        }
        backends.push(terminal.to_string());
        Self { backends }
    }

    pub fn backends(&self) -> &[String] {
        &self.backends
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.backends.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn terminal(&self) -> &str {
        self.backends.last().map(String::as_str).unwrap_or_default()
    }
}

/// Cursor over a `FallbackChain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    NotStarted,
    Attempting(usize),
    Succeeded(usize),
    ExhaustedFatal,
}

impl AttemptState {
    /// Move to the next backend, or to `ExhaustedFatal` past the end.
    pub fn advance(self, chain_len: usize) -> Self {
        let next = match self {
            Self::NotStarted => 0,
            Self::Attempting(i) => i + 1,
            done => return done,
        };
        if next < chain_len {
            Self::Attempting(next)
        } else {
            Self::ExhaustedFatal
        }
    }

    pub fn succeed(self) -> Self {
        match self {
            Self::Attempting(i) => Self::Succeeded(i),
            other => other,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::ExhaustedFatal)
    }
}

#[derive(Debug, Clone)]
pub struct ArbitrationSettings {
    pub primary: String,
    pub terminal: String,
    pub timeout: Duration,
    pub prompt_max_chars: usize,
    pub max_tokens: Option<u32>,
}

impl Default for ArbitrationSettings {
    fn default() -> Self {
        Self {
            primary: "sonnet".to_string(),
            terminal: "haiku".to_string(),
            timeout: Duration::from_secs(120),
            prompt_max_chars: 24_000,
            max_tokens: None,
        }
    }
}

/// Final arbitration over a shortlist, hardened by a fallback chain.
pub struct FallbackOrchestrator {
    registry: BackendRegistry,
    bias: Arc<dyn BiasSource>,
    settings: ArbitrationSettings,
}

impl FallbackOrchestrator {
    pub fn new(
        registry: BackendRegistry,
        bias: Arc<dyn BiasSource>,
        settings: ArbitrationSettings,
    ) -> Self {
        Self {
            registry,
            bias,
            settings,
        }
    }

    pub fn chain(&self) -> FallbackChain {
        FallbackChain::build(
            &self.settings.primary,
            &self.registry.ids(),
            &self.settings.terminal,
        )
    }

    /// Decide on the shortlist. Fails only when every backend in the chain
    /// failed, or when there is nothing to decide on.
    pub async fn arbitrate(
        &self,
        candidates: &[Candidate],
    ) -> Result<ArbitrationResult, AgentError> {
        if candidates.is_empty() {
            return Err(AgentError::InvalidInput("empty shortlist".to_string()));
        }

        let run_id = Uuid::new_v4();
        let bias = self.bias.load_or_default().await;
        let rendered = prompts::render_arbitration_prompt(candidates, &bias)?;
        let request = ModelRequest {
            system_prompt: prompts::arbiter_system_prompt(),
            user_prompt: prompts::truncate_to_budget(&rendered, self.settings.prompt_max_chars),
            max_tokens: self.settings.max_tokens,
        };

        let chain = self.chain();
        let mut attempted = Vec::with_capacity(chain.len());
        let mut state = AttemptState::NotStarted.advance(chain.len());

        while let AttemptState::Attempting(index) = state {
            let Some(id) = chain.get(index) else {
                break;
            };
            attempted.push(id.to_string());

            match self.attempt(id, &request, candidates).await {
                Ok(decisions) => {
                    let fell_back = attempted.len() > 1;
                    info!(
                        run_id = %run_id,
                        backend = %id,
                        state = ?state.succeed(),
                        fell_back,
                        decisions = decisions.len(),
                        "Arbitration complete"
                    );
                    return Ok(ArbitrationResult {
                        run_id,
                        backend: id.to_string(),
                        attempted,
                        fell_back,
                        decisions,
                        bias,
                        decided_at: Utc::now(),
                    });
                }
                Err(e) => {
                    warn!(
                        run_id = %run_id,
                        backend = %id,
                        kind = ?e.kind(),
                        error = %e,
                        "Arbitration backend failed, advancing"
                    );
                    state = state.advance(chain.len());
                }
            }
        }

        error!(
            run_id = %run_id,
            attempted = ?attempted,
            "Arbitration fallback chain exhausted, terminal backend is down"
        );
        Err(AgentError::ExhaustedFallback { attempted })
    }

    async fn attempt(
        &self,
        id: &str,
        request: &ModelRequest,
        candidates: &[Candidate],
    ) -> Result<Vec<ArbitrationDecision>, AgentError> {
        let backend = self
            .registry
            .get(id)
            .ok_or_else(|| AgentError::NotImplemented(id.to_string()))?;
        let raw = complete_with_timeout(backend.as_ref(), request, self.settings.timeout).await?;
        parse_decisions(&raw, candidates)
    }
}

fn parse_decision(entry: &Payload) -> Result<ArbitrationDecision, AgentError> {
    let action = if entry.contains_key("action") {
        required_recommendation(entry, "action")?
    } else {
        required_recommendation(entry, "recommendation")?
    };
    Ok(ArbitrationDecision {
        symbol: required_str(entry, "symbol")?.to_ascii_uppercase(),
        action,
        confidence: normalize_confidence(
            optional_decimal(entry, "confidence")?.unwrap_or(Decimal::new(50, 0)),
        ),
        rationale: optional_str(entry, "rationale").unwrap_or_default(),
    })
}

/// Read the decision list, keeping only decisions about shortlisted symbols.
/// An empty result is a malformed response.
pub fn parse_decisions(
    raw: &str,
    candidates: &[Candidate],
) -> Result<Vec<ArbitrationDecision>, AgentError> {
    let payload = parse_payload(raw)?;
    let entries = match payload.get("decisions") {
        Some(Value::Array(entries)) => entries,
        _ => {
            return Err(AgentError::MalformedResponse(
                "Missing field: decisions".to_string(),
            ))
        }
    };

    let allowed: BTreeSet<String> = candidates
        .iter()
        .map(|c| c.symbol.to_ascii_uppercase())
        .collect();

    let mut decisions = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Object(entry) = entry else {
            return Err(AgentError::MalformedResponse(format!(
                "decision is not an object: {entry}"
            )));
        };
        let decision = parse_decision(entry)?;
        if allowed.contains(&decision.symbol) {
            decisions.push(decision);
        } else {
            warn!(symbol = %decision.symbol, "Dropping decision for symbol outside the shortlist");
        }
    }

    if decisions.is_empty() {
        return Err(AgentError::MalformedResponse(
            "no decisions for shortlisted symbols".to_string(),
        ));
    }
    Ok(decisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UnsupportedBackend;
    use crate::bias::StaticBiasSource;
    use crate::error::ErrorKind;
    use crate::test_support::{decisions_reply, ScriptedBackend};
    use rust_decimal_macros::dec;
    use tandem_models::{BiasParameters, Recommendation};

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn shortlist() -> Vec<Candidate> {
        ["AAPL", "NVDA"]
            .iter()
            .map(|s| Candidate {
                symbol: s.to_string(),
                score: dec!(0.7),
                signals: Value::Null,
            })
            .collect()
    }

    fn orchestrator(registry: BackendRegistry, primary: &str) -> FallbackOrchestrator {
        FallbackOrchestrator::new(
            registry,
            Arc::new(StaticBiasSource::default()),
            ArbitrationSettings {
                primary: primary.to_string(),
                terminal: "haiku".to_string(),
                timeout: Duration::from_millis(200),
                ..Default::default()
            },
        )
    }

    #[test]
    fn chain_puts_terminal_last_exactly_once() {
        let chain = FallbackChain::build("grok", &ids(&["haiku", "sonnet", "grok", "local"]), "haiku");
        assert_eq!(chain.backends(), ids(&["grok", "sonnet", "local", "haiku"]).as_slice());
        assert_eq!(chain.terminal(), "haiku");
    }

    #[test]
    fn primary_equal_to_terminal_is_tried_last() {
        let chain = FallbackChain::build("haiku", &ids(&["sonnet", "haiku"]), "haiku");
        assert_eq!(chain.backends(), ids(&["sonnet", "haiku"]).as_slice());
    }

    #[test]
    fn unknown_terminal_still_terminates_chain() {
        let chain = FallbackChain::build("sonnet", &[], "haiku");
        assert_eq!(chain.backends(), ids(&["sonnet", "haiku"]).as_slice());
    }

    #[test]
    fn attempt_state_walks_the_chain() {
        let state = AttemptState::NotStarted.advance(2);
        assert_eq!(state, AttemptState::Attempting(0));
        let state = state.advance(2);
        assert_eq!(state, AttemptState::Attempting(1));
        assert_eq!(state.succeed(), AttemptState::Succeeded(1));
        assert_eq!(state.advance(2), AttemptState::ExhaustedFatal);
        assert!(AttemptState::ExhaustedFatal.advance(2).is_finished());
        assert_eq!(AttemptState::NotStarted.advance(0), AttemptState::ExhaustedFatal);
    }

    #[test]
    fn decisions_outside_shortlist_are_dropped() {
        let raw = decisions_reply(&[("aapl", "buy", 80), ("TSLA", "sell", 90)]);
        let decisions = parse_decisions(&raw, &shortlist()).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].symbol, "AAPL");
        assert_eq!(decisions[0].action, Recommendation::Buy);
    }

    #[test]
    fn only_foreign_decisions_is_malformed() {
        let raw = decisions_reply(&[("TSLA", "sell", 90)]);
        let err = parse_decisions(&raw, &shortlist()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn empty_decision_list_is_malformed() {
        let err = parse_decisions(r#"{"decisions": []}"#, &shortlist()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn primary_success_does_not_fall_back() {
        let registry = BackendRegistry::new()
            .with(Arc::new(ScriptedBackend::replying("sonnet", decisions_reply(&[("NVDA", "buy", 75)]))))
            .with(Arc::new(ScriptedBackend::replying("haiku", decisions_reply(&[("AAPL", "hold", 50)]))));

        let result = orchestrator(registry, "sonnet").arbitrate(&shortlist()).await.unwrap();
        assert_eq!(result.backend, "sonnet");
        assert_eq!(result.attempted, ids(&["sonnet"]));
        assert!(!result.fell_back);
        assert_eq!(result.bias, BiasParameters::default());
    }

    #[tokio::test]
    async fn not_implemented_primary_advances() {
        let haiku = Arc::new(ScriptedBackend::replying("haiku", decisions_reply(&[("AAPL", "buy", 66)])));
        let registry = BackendRegistry::new()
            .with(Arc::new(UnsupportedBackend::new("grok")))
            .with(Arc::new(ScriptedBackend::failing("sonnet", "rate limited")))
            .with(haiku.clone());

        let result = orchestrator(registry, "grok").arbitrate(&shortlist()).await.unwrap();
        assert_eq!(result.backend, "haiku");
        assert_eq!(result.attempted, ids(&["grok", "sonnet", "haiku"]));
        assert!(result.fell_back);
        assert_eq!(haiku.calls(), 1);
    }

    #[tokio::test]
    async fn exhausting_the_chain_is_fatal() {
        let registry = BackendRegistry::new()
            .with(Arc::new(ScriptedBackend::hanging("sonnet")))
            .with(Arc::new(ScriptedBackend::replying("haiku", "no decisions today")));

        let err = orchestrator(registry, "sonnet").arbitrate(&shortlist()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExhaustedFallback);
        match err {
            AgentError::ExhaustedFallback { attempted } => {
                assert_eq!(attempted, ids(&["sonnet", "haiku"]))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unregistered_terminal_counts_as_attempt() {
        let registry = BackendRegistry::new()
            .with(Arc::new(ScriptedBackend::failing("sonnet", "boom")));

        let err = orchestrator(registry, "sonnet").arbitrate(&shortlist()).await.unwrap_err();
        assert!(matches!(err, AgentError::ExhaustedFallback { ref attempted } if attempted.len() == 2));
    }

    #[tokio::test]
    async fn empty_shortlist_is_rejected_without_calls() {
        let sonnet = Arc::new(ScriptedBackend::replying("sonnet", decisions_reply(&[("AAPL", "buy", 70)])));
        let registry = BackendRegistry::new().with(sonnet.clone());

        let err = orchestrator(registry, "sonnet").arbitrate(&[]).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
        assert_eq!(sonnet.calls(), 0);
    }

    #[tokio::test]
    async fn prompt_carries_loaded_bias() {
        let sonnet = Arc::new(ScriptedBackend::replying("sonnet", decisions_reply(&[("AAPL", "buy", 70)])));
        let bias = BiasParameters {
            notes: vec!["fade gap-ups".to_string()],
            ..Default::default()
        };
        let orchestrator = FallbackOrchestrator::new(
            BackendRegistry::new().with(sonnet.clone()),
            Arc::new(StaticBiasSource(bias.clone())),
            ArbitrationSettings {
                primary: "sonnet".to_string(),
                terminal: "sonnet".to_string(),
                ..Default::default()
            },
        );

        let result = orchestrator.arbitrate(&shortlist()).await.unwrap();
        assert_eq!(result.bias, bias);
        assert!(sonnet.requests()[0].user_prompt.contains("fade gap-ups"));
    }
}
