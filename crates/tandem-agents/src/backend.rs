use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::AgentError;

/// A rendered model call.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Response budget. `None` uses the backend's configured budget.
    pub max_tokens: Option<u32>,
}

/// A model backend: given a rendered request, return raw response text or fail.
/// Mockable for testing.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn id(&self) -> &str;

    async fn complete(&self, request: &ModelRequest) -> Result<String, AgentError>;
}

/// Invoke `backend` bounded by `timeout`. Empty output counts as malformed.
///
/// Every external call goes through here so that a timeout surfaces the same
/// way regardless of the backend implementation.
pub async fn complete_with_timeout(
    backend: &dyn ModelBackend,
    request: &ModelRequest,
    timeout: Duration,
) -> Result<String, AgentError> {
    let start = Instant::now();
    let text = tokio::time::timeout(timeout, backend.complete(request))
        .await
        .map_err(|_| AgentError::Timeout {
            backend: backend.id().to_string(),
            seconds: timeout.as_secs(),
        })??;

    debug!(
        backend = %backend.id(),
        elapsed_ms = start.elapsed().as_millis(),
        bytes = text.len(),
        "Backend call complete"
    );

    if text.trim().is_empty() {
        return Err(AgentError::MalformedResponse(format!(
            "{} returned an empty response",
            backend.id()
        )));
    }
    Ok(text)
}

/// A backend named in configuration that this build cannot reach.
pub struct UnsupportedBackend {
    id: String,
}

impl UnsupportedBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl ModelBackend for UnsupportedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, _request: &ModelRequest) -> Result<String, AgentError> {
        Err(AgentError::NotImplemented(self.id.clone()))
    }
}

/// Ordered set of backends known to the process.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn ModelBackend>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends.iter().map(|b| b.id()).collect::<Vec<_>>())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend. A later registration with the same id replaces the earlier one.
    pub fn register(&mut self, backend: Arc<dyn ModelBackend>) {
        if let Some(existing) = self.backends.iter_mut().find(|b| b.id() == backend.id()) {
            *existing = backend;
        } else {
            self.backends.push(backend);
        }
    }

    pub fn with(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ModelBackend>> {
        self.backends.iter().find(|b| b.id() == id).cloned()
    }

    /// Backend ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::ScriptedBackend;

    fn request() -> ModelRequest {
        ModelRequest {
            system_prompt: "system".to_string(),
            user_prompt: "user".to_string(),
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn timeout_maps_to_transport_failure() {
        let backend = ScriptedBackend::hanging("slow");
        let err = complete_with_timeout(&backend, &request(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout { ref backend, .. } if backend == "slow"));
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }

    #[tokio::test]
    async fn blank_output_is_malformed() {
        let backend = ScriptedBackend::replying("blank", "   \n");
        let err = complete_with_timeout(&backend, &request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn unsupported_backend_is_not_implemented() {
        let backend = UnsupportedBackend::new("grok");
        let err = backend.complete(&request()).await.unwrap_err();
        assert!(matches!(err, AgentError::NotImplemented(ref id) if id == "grok"));
    }

    #[test]
    fn registry_preserves_order_and_replaces_duplicates() {
        let registry = BackendRegistry::new()
            .with(Arc::new(ScriptedBackend::replying("a", "1")))
            .with(Arc::new(ScriptedBackend::replying("b", "2")))
            .with(Arc::new(UnsupportedBackend::new("a")));

        assert_eq!(registry.ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("c").is_none());
    }
}
