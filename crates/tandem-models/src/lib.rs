pub mod analysis;
pub mod arbitration;
pub mod batch;
pub mod bundle;
pub mod config;
pub mod consensus;
pub mod enrichment;

pub use analysis::{
    AdapterRole, ModelAnalysis, Recommendation, ScoutReport, SentimentRefinement, SocialDataPacket,
};
pub use arbitration::{ArbitrationDecision, ArbitrationResult, BiasParameters, Candidate};
pub use batch::{BatchItem, BatchOutcome, BatchReport, PatternFlags, SocialScore};
pub use bundle::{AnalysisBundle, NewsItem, SocialMetrics, SourceMetrics};
pub use config::{
    ArbitrationConfig, BackendConfig, BackendKind, BatchConfig, CacheConfig, ConsensusConfig,
    StoreConfig, TandemConfig,
};
pub use consensus::{AgreementLevel, ConsensusResult, CrossReview};
pub use enrichment::EnrichmentRow;
