use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tandem_models::enrichment::key_patterns;
use tracing::{debug, warn};

use crate::error::CacheError;

/// Width of a cache time bucket.
pub const BUCKET_SECONDS: i64 = 300;

/// Source of "now" for bucket computation. Injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn bucket_of(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(BUCKET_SECONDS)
}

/// Adapter output cache keyed by (kind, symbol, 5-minute bucket).
///
/// Shared across concurrent requests. Entries are idempotent recomputations,
/// so there is no locking beyond moka's own per-key consistency. Last writer
/// wins per key; moka evicts after the TTL regardless of reads.
pub struct AnalysisCache {
    entries: Cache<String, String>,
    clock: Clock,
}

impl AnalysisCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Cache key for the current bucket.
    pub fn key_for(&self, kind: &str, symbol: &str) -> String {
        key_patterns::analysis(kind, symbol, bucket_of((self.clock)()))
    }

    /// Typed read. An entry that no longer deserializes is dropped and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, kind: &str, symbol: &str) -> Option<T> {
        let key = self.key_for(kind, symbol);
        let json = self.entries.get(&key).await?;
        match serde_json::from_str(&json) {
            Ok(value) => {
                debug!(key = %key, "Analysis cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                self.entries.invalidate(&key).await;
                None
            }
        }
    }

    pub async fn put<T: Serialize>(
        &self,
        kind: &str,
        symbol: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let key = self.key_for(kind, symbol);
        let json = serde_json::to_string(value)?;
        self.entries.insert(key, json).await;
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use tandem_models::{AdapterRole, ModelAnalysis, Recommendation};

    fn sample_analysis() -> ModelAnalysis {
        ModelAnalysis {
            role: AdapterRole::Scout,
            recommendation: Recommendation::Buy,
            confidence: dec!(80),
            reasoning: "Breakout above 50-day with volume".to_string(),
            risk_warning: None,
            key_factors: vec!["volume".to_string(), "trend".to_string()],
            contrarian_note: Some("Earnings in 6 days".to_string()),
        }
    }

    fn settable_clock(start: DateTime<Utc>) -> (Clock, Arc<Mutex<DateTime<Utc>>>) {
        let now = Arc::new(Mutex::new(start));
        let handle = Arc::clone(&now);
        let clock: Clock = Arc::new(move || *handle.lock().unwrap());
        (clock, now)
    }

    #[test]
    fn bucket_floors_to_five_minutes() {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
        assert_eq!(bucket_of(t), bucket_of(t + chrono::Duration::seconds(299)));
        assert_eq!(bucket_of(t) + 1, bucket_of(t + chrono::Duration::seconds(300)));
    }

    #[tokio::test]
    async fn roundtrip_within_bucket() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 10).unwrap();
        let (clock, now) = settable_clock(start);
        let cache = AnalysisCache::new(100, Duration::from_secs(300)).with_clock(clock);

        let written = sample_analysis();
        cache.put("scout", "AAPL", &written).await.unwrap();

        *now.lock().unwrap() = start + chrono::Duration::seconds(200);
        let read: Option<ModelAnalysis> = cache.get("scout", "AAPL").await;
        assert_eq!(read, Some(written));
    }

    #[tokio::test]
    async fn next_bucket_misses() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 4, 50).unwrap();
        let (clock, now) = settable_clock(start);
        let cache = AnalysisCache::new(100, Duration::from_secs(300)).with_clock(clock);

        cache.put("scout", "AAPL", &sample_analysis()).await.unwrap();

        *now.lock().unwrap() = start + chrono::Duration::seconds(15);
        let read: Option<ModelAnalysis> = cache.get("scout", "AAPL").await;
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn kinds_and_symbols_are_separate() {
        let cache = AnalysisCache::new(100, Duration::from_secs(300));
        cache.put("scout", "AAPL", &sample_analysis()).await.unwrap();

        let other_kind: Option<ModelAnalysis> = cache.get("news", "AAPL").await;
        let other_symbol: Option<ModelAnalysis> = cache.get("scout", "MSFT").await;
        assert!(other_kind.is_none());
        assert!(other_symbol.is_none());
    }

    #[tokio::test]
    async fn undecodable_entry_is_a_miss() {
        let cache = AnalysisCache::new(100, Duration::from_secs(300));
        cache.put("scout", "AAPL", &"not an analysis").await.unwrap();

        let read: Option<ModelAnalysis> = cache.get("scout", "AAPL").await;
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn later_put_replaces_earlier() {
        let cache = AnalysisCache::new(100, Duration::from_secs(300));
        let mut second = sample_analysis();
        second.confidence = dec!(55);
        cache.put("scout", "AAPL", &sample_analysis()).await.unwrap();
        cache.put("scout", "AAPL", &second).await.unwrap();

        let read: Option<ModelAnalysis> = cache.get("scout", "AAPL").await;
        assert_eq!(read.unwrap().confidence, dec!(55));
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = AnalysisCache::new(100, Duration::from_millis(50));
        cache.put("news", "TSLA", &sample_analysis()).await.unwrap();
        assert!(cache.get::<ModelAnalysis>("news", "TSLA").await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get::<ModelAnalysis>("news", "TSLA").await.is_none());
    }
}
