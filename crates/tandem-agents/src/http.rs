use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backend::{ModelBackend, ModelRequest};
use crate::error::AgentError;

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionEnvelope {
    #[serde(default)]
    content: Option<String>,
}

/// Backend reached over HTTP.
///
/// POSTs `{model, system, prompt, max_tokens}` and expects `{"content": "..."}` back.
pub struct HttpBackend {
    id: String,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    max_tokens: u32,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        max_tokens: u32,
    ) -> Result<Self, AgentError> {
        let id = id.into();
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AgentError::transport(&id, format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            id,
            model: model.into(),
            endpoint: endpoint.into(),
            api_key,
            max_tokens,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Pull the `content` string out of a response envelope.
pub fn parse_envelope(backend: &str, body: &str) -> Result<String, AgentError> {
    let envelope: CompletionEnvelope = serde_json::from_str(body).map_err(|e| {
        AgentError::MalformedResponse(format!("{backend}: response envelope is not JSON: {e}"))
    })?;
    match envelope.content {
        Some(content) if !content.trim().is_empty() => Ok(content),
        Some(_) => Err(AgentError::MalformedResponse(format!(
            "{backend}: empty content"
        ))),
        None => Err(AgentError::MalformedResponse(format!(
            "{backend}: response has no content field"
        ))),
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, AgentError> {
        let body = CompletionBody {
            model: &self.model,
            system: &request.system_prompt,
            prompt: &request.user_prompt,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
        };

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AgentError::transport(&self.id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(backend = %self.id, status = %status, "Backend returned error status");
            let message = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                "rate limited".to_string()
            } else {
                format!("status {status}")
            };
            return Err(AgentError::transport(&self.id, message));
        }

        let text = response
            .text()
            .await
            .map_err(|e| AgentError::transport(&self.id, e.to_string()))?;
        parse_envelope(&self.id, &text)
    }
}
