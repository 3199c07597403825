use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level configuration for tandem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TandemConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub arbitration: ArbitrationConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Default for TandemConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
            backends: default_backends(),
            consensus: ConsensusConfig::default(),
            arbitration: ArbitrationConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl TandemConfig {
    pub fn backend(&self, id: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.id == id)
    }
}

/// Configuration for the analysis cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of entries in the in-memory moka cache.
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
    /// Entry TTL in seconds. Matches the 5-minute key bucket.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_cache_capacity(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

/// Configuration for the enrichment store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Path to the SQLite enrichment database.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
        }
    }
}

/// How a backend is reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    ClaudeCli,
    Http,
    /// Recognised in config but not supported by this build.
    #[serde(other)]
    Unsupported,
}

/// One model backend known to the process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub id: String,
    #[serde(default)]
    pub kind: BackendKind,
    pub model: String,
    /// Required for `http` backends.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Response length budget passed to the backend.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Configuration for the consensus engine and its adapters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusConfig {
    pub scout_backend: String,
    pub refinement_backend: String,
    /// Per adapter call timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
    /// Hard cap on rendered user prompts.
    #[serde(default = "default_prompt_max_chars")]
    pub prompt_max_chars: usize,
    /// Hybrid validation fires when the independent estimate deviates by more than this.
    #[serde(default = "default_variance_threshold")]
    pub hybrid_variance_threshold: Decimal,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            scout_backend: "haiku".to_string(),
            refinement_backend: "sonnet".to_string(),
            call_timeout_seconds: default_call_timeout(),
            prompt_max_chars: default_prompt_max_chars(),
            hybrid_variance_threshold: default_variance_threshold(),
        }
    }
}

/// Configuration for the final arbitration call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArbitrationConfig {
    pub primary: String,
    /// Always-available backend tried last.
    pub terminal: String,
    #[serde(default = "default_arbitration_timeout")]
    pub timeout_seconds: u64,
    /// JSON file of learned bias parameters. Missing falls back to the baseline.
    #[serde(default)]
    pub bias_path: Option<String>,
    #[serde(default = "default_arbitration_prompt_max_chars")]
    pub prompt_max_chars: usize,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            primary: "sonnet".to_string(),
            terminal: "haiku".to_string(),
            timeout_seconds: default_arbitration_timeout(),
            bias_path: None,
            prompt_max_chars: default_arbitration_prompt_max_chars(),
        }
    }
}

/// Configuration for the parallel batch analyzer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    pub backend: String,
    /// Ceiling on in-flight item calls.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_item_timeout")]
    pub item_timeout_seconds: u64,
    /// Delay between dispatches once the batch exceeds the ceiling.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
    #[serde(default = "default_batch_prompt_max_chars")]
    pub prompt_max_chars: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            backend: "haiku".to_string(),
            max_concurrency: default_max_concurrency(),
            item_timeout_seconds: default_item_timeout(),
            stagger_ms: default_stagger_ms(),
            prompt_max_chars: default_batch_prompt_max_chars(),
        }
    }
}

fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig {
            id: "haiku".to_string(),
            kind: BackendKind::ClaudeCli,
            model: "claude-3-5-haiku-latest".to_string(),
            endpoint: None,
            api_key_env: None,
            max_tokens: default_max_tokens(),
        },
        BackendConfig {
            id: "sonnet".to_string(),
            kind: BackendKind::ClaudeCli,
            model: "claude-sonnet-4-5-20250929".to_string(),
            endpoint: None,
            api_key_env: None,
            max_tokens: default_max_tokens(),
        },
    ]
}

fn default_cache_capacity() -> u64 {
    10_000
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_sqlite_path() -> String {
    "data/tandem_enrichment.db".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_call_timeout() -> u64 {
    45
}
fn default_prompt_max_chars() -> usize {
    12_000
}
fn default_variance_threshold() -> Decimal {
    Decimal::new(2, 1)
}
fn default_arbitration_timeout() -> u64 {
    120
}
fn default_arbitration_prompt_max_chars() -> usize {
    24_000
}
fn default_max_concurrency() -> usize {
    25
}
fn default_item_timeout() -> u64 {
    30
}
fn default_stagger_ms() -> u64 {
    150
}
fn default_batch_prompt_max_chars() -> usize {
    4_000
}
