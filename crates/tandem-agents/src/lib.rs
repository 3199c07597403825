pub mod adapter;
pub mod backend;
pub mod batch;
pub mod bias;
pub mod claude_cli;
pub mod consensus;
pub mod error;
pub mod fallback;
pub mod http;
pub mod parser;
pub mod prompts;
pub mod scoring;

pub mod test_support;

pub use adapter::{
    AdapterSettings, AnalysisTask, CachedAdapter, ModelAdapter, NewsAdapter, NewsTask,
    ScoutAdapter, ScoutTask, SentimentAdapter, SentimentRefinementTask,
};
pub use backend::{BackendRegistry, ModelBackend, ModelRequest, UnsupportedBackend};
pub use batch::{BatchAnalyzer, BatchSettings, BatchTask, SocialSentimentTask, VisionPatternTask};
pub use bias::{BiasSource, JsonFileBiasSource, StaticBiasSource};
pub use claude_cli::ClaudeCliBackend;
pub use consensus::ConsensusEngine;
pub use error::{AgentError, ErrorKind};
pub use fallback::{ArbitrationSettings, AttemptState, FallbackChain, FallbackOrchestrator};
pub use http::HttpBackend;
