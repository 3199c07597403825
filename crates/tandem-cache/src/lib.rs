pub mod analysis_cache;
pub mod error;
pub mod store;

pub use analysis_cache::{bucket_of, AnalysisCache, Clock, BUCKET_SECONDS};
pub use error::CacheError;
pub use store::{EnrichmentSink, SqliteEnrichmentStore};
