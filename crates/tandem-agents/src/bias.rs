use std::path::PathBuf;

use async_trait::async_trait;
use tandem_models::BiasParameters;
use tracing::{debug, warn};

use crate::error::{AgentError, ErrorKind};

/// Source of learned bias parameters, read fresh for every arbitration run.
#[async_trait]
pub trait BiasSource: Send + Sync {
    async fn load(&self) -> Result<BiasParameters, AgentError>;

    /// Load, recovering to the built-in baseline when the source is unavailable.
    async fn load_or_default(&self) -> BiasParameters {
        match self.load().await {
            Ok(bias) => bias,
            Err(e) => {
                warn!(
                    kind = ?ErrorKind::ConfigUnavailable,
                    error = %e,
                    "Bias parameters unavailable, using baseline"
                );
                BiasParameters::default()
            }
        }
    }
}

/// Bias record stored as a JSON file, typically rewritten by the offline learner.
#[derive(Debug, Clone)]
pub struct JsonFileBiasSource {
    path: PathBuf,
}

impl JsonFileBiasSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BiasSource for JsonFileBiasSource {
    async fn load(&self) -> Result<BiasParameters, AgentError> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AgentError::ConfigUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        let bias: BiasParameters = serde_json::from_str(&text).map_err(|e| {
            AgentError::ConfigUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), "Loaded bias parameters");
        Ok(bias)
    }
}

/// Fixed parameters, for runs with no learned bias configured.
#[derive(Debug, Clone, Default)]
pub struct StaticBiasSource(pub BiasParameters);

#[async_trait]
impl BiasSource for StaticBiasSource {
    async fn load(&self) -> Result<BiasParameters, AgentError> {
        Ok(self.0.clone())
    }
}
