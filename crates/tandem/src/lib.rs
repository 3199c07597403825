//! tandem - dual-model consensus and arbitration for stock signals
//!
//! Combines a fast scout model and a deeper refinement model into one
//! recommendation per symbol, arbitrates a shortlist through a fallback
//! chain of backends, and fans enrichment calls out over a batch.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use tandem::models::{AnalysisBundle, ConsensusResult, TandemConfig};
//! use tandem::agents::{ConsensusEngine, FallbackOrchestrator, BatchAnalyzer};
//!
//! # async fn run(bundle: AnalysisBundle) -> anyhow::Result<Option<ConsensusResult>> {
//! let config = TandemConfig::default();
//! let registry = tandem::build_registry(&config)?;
//! let engine = tandem::build_consensus_engine(&config, &registry, tandem::build_cache(&config))?;
//! Ok(engine.analyze(&bundle).await)
//! # }
//! ```

pub use tandem_agents as agents;
pub use tandem_cache as cache;
pub use tandem_models as models;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tandem_agents::{
    AdapterSettings, ArbitrationSettings, BackendRegistry, BatchAnalyzer, BatchSettings,
    BiasSource, CachedAdapter, ClaudeCliBackend, ConsensusEngine, FallbackOrchestrator,
    HttpBackend, JsonFileBiasSource, ModelBackend, NewsTask, ScoutTask, SentimentRefinementTask,
    SocialSentimentTask, StaticBiasSource, UnsupportedBackend, VisionPatternTask,
};
use tandem_cache::{AnalysisCache, EnrichmentSink, SqliteEnrichmentStore};
use tandem_models::{BackendConfig, BackendKind, BatchConfig, TandemConfig};
use tracing::warn;

/// Read and parse a TOML configuration file.
pub fn load_config(path: &str) -> Result<TandemConfig, anyhow::Error> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {path}"))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config: {path}"))
}

fn build_backend(config: &BackendConfig) -> Result<Arc<dyn ModelBackend>, anyhow::Error> {
    let backend: Arc<dyn ModelBackend> = match config.kind {
        BackendKind::ClaudeCli => Arc::new(ClaudeCliBackend::new(
            config.id.clone(),
            config.model.clone(),
            config.max_tokens,
        )),
        BackendKind::Http => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| anyhow!("Backend {} is http but has no endpoint", config.id))?;
            let api_key = config.api_key_env.as_ref().and_then(|var| {
                let key = std::env::var(var).ok();
                if key.is_none() {
                    warn!(backend = %config.id, env = %var, "API key variable not set");
                }
                key
            });
            Arc::new(HttpBackend::new(
                config.id.clone(),
                config.model.clone(),
                endpoint,
                api_key,
                config.max_tokens,
            )?)
        }
        BackendKind::Unsupported => {
            warn!(backend = %config.id, "Backend kind not supported, calls will fail over");
            Arc::new(UnsupportedBackend::new(config.id.clone()))
        }
    };
    Ok(backend)
}

/// Build the backend registry, in configuration order.
pub fn build_registry(config: &TandemConfig) -> Result<BackendRegistry, anyhow::Error> {
    let mut registry = BackendRegistry::new();
    for backend in &config.backends {
        registry.register(build_backend(backend)?);
    }
    Ok(registry)
}

/// Build the shared analysis cache.
pub fn build_cache(config: &TandemConfig) -> Arc<AnalysisCache> {
    Arc::new(AnalysisCache::new(
        config.cache.max_capacity,
        Duration::from_secs(config.cache.ttl_seconds),
    ))
}

fn require_backend(
    registry: &BackendRegistry,
    id: &str,
) -> Result<Arc<dyn ModelBackend>, anyhow::Error> {
    registry
        .get(id)
        .ok_or_else(|| anyhow!("Backend {id} is not configured"))
}

/// Build a ConsensusEngine from configuration.
pub fn build_consensus_engine(
    config: &TandemConfig,
    registry: &BackendRegistry,
    cache: Arc<AnalysisCache>,
) -> Result<ConsensusEngine, anyhow::Error> {
    let consensus = &config.consensus;
    let scout = require_backend(registry, &consensus.scout_backend)?;
    let refinement = require_backend(registry, &consensus.refinement_backend)?;
    let settings = AdapterSettings {
        timeout: Duration::from_secs(consensus.call_timeout_seconds),
        prompt_max_chars: consensus.prompt_max_chars,
        max_tokens: None,
    };

    Ok(ConsensusEngine::new(
        Arc::new(CachedAdapter::new(ScoutTask, scout, cache.clone(), settings.clone())),
        Arc::new(CachedAdapter::new(
            SentimentRefinementTask,
            refinement.clone(),
            cache.clone(),
            settings.clone(),
        )),
        Arc::new(CachedAdapter::new(NewsTask, refinement, cache, settings)),
    )
    .with_hybrid_threshold(consensus.hybrid_variance_threshold))
}

/// Build the arbitration orchestrator. Every registered backend joins the chain.
pub fn build_arbitrator(config: &TandemConfig, registry: BackendRegistry) -> FallbackOrchestrator {
    let arbitration = &config.arbitration;
    let bias: Arc<dyn BiasSource> = match &arbitration.bias_path {
        Some(path) => Arc::new(JsonFileBiasSource::new(path)),
        None => Arc::new(StaticBiasSource::default()),
    };
    FallbackOrchestrator::new(
        registry,
        bias,
        ArbitrationSettings {
            primary: arbitration.primary.clone(),
            terminal: arbitration.terminal.clone(),
            timeout: Duration::from_secs(arbitration.timeout_seconds),
            prompt_max_chars: arbitration.prompt_max_chars,
            max_tokens: None,
        },
    )
}

/// Open the enrichment store, creating its parent directory if needed.
pub fn build_store(config: &TandemConfig) -> Result<Arc<SqliteEnrichmentStore>, anyhow::Error> {
    let path = &config.store.sqlite_path;
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteEnrichmentStore::open(path)
        .with_context(|| format!("Failed to open enrichment store: {path}"))?;
    Ok(Arc::new(store))
}

fn batch_settings(batch: &BatchConfig) -> BatchSettings {
    BatchSettings {
        max_concurrency: batch.max_concurrency,
        item_timeout: Duration::from_secs(batch.item_timeout_seconds),
        stagger: Duration::from_millis(batch.stagger_ms),
        prompt_max_chars: batch.prompt_max_chars,
        max_tokens: None,
    }
}

pub fn build_vision_analyzer(
    config: &TandemConfig,
    registry: &BackendRegistry,
    sink: Arc<dyn EnrichmentSink>,
) -> Result<BatchAnalyzer<VisionPatternTask>, anyhow::Error> {
    Ok(BatchAnalyzer::new(
        VisionPatternTask,
        require_backend(registry, &config.batch.backend)?,
        sink,
        batch_settings(&config.batch),
    ))
}

pub fn build_social_analyzer(
    config: &TandemConfig,
    registry: &BackendRegistry,
    sink: Arc<dyn EnrichmentSink>,
) -> Result<BatchAnalyzer<SocialSentimentTask>, anyhow::Error> {
    Ok(BatchAnalyzer::new(
        SocialSentimentTask,
        require_backend(registry, &config.batch.backend)?,
        sink,
        batch_settings(&config.batch),
    ))
}
