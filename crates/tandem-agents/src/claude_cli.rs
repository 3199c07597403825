use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::backend::{ModelBackend, ModelRequest};
use crate::error::AgentError;

/// Backend that invokes the `claude` CLI.
///
/// The CLI has no response-length flag, so the token budget is stated in the
/// system prompt. The child is killed if the call future is dropped on timeout.
#[derive(Debug, Clone)]
pub struct ClaudeCliBackend {
    id: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeCliBackend {
    pub fn new(id: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ModelBackend for ClaudeCliBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, AgentError> {
        debug!(backend = %self.id, model = %self.model, "Invoking claude CLI");

        let budget = request.max_tokens.unwrap_or(self.max_tokens);
        let system_prompt = format!(
            "{}\n\nKeep the whole response under {budget} tokens.",
            request.system_prompt
        );

        let result = Command::new("claude")
            .args([
                "-p",
                &request.user_prompt,
                "--system-prompt",
                &system_prompt,
                "--model",
                &self.model,
                "--output-format",
                "text",
            ])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AgentError::transport(&self.id, format!("Failed to spawn claude: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!(backend = %self.id, status = %result.status, stderr = %stderr, "Claude CLI failed");
            return Err(AgentError::transport(
                &self.id,
                format!("claude exited {}: {}", result.status, stderr),
            ));
        }

        Ok(String::from_utf8_lossy(&result.stdout).to_string())
    }
}

/// Check if the `claude` CLI is available on the system.
pub async fn check_cli_available() -> bool {
    match Command::new("claude").arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_identity() {
        let backend = ClaudeCliBackend::new("haiku", "claude-3-5-haiku-latest", 1024);
        assert_eq!(backend.id(), "haiku");
        assert_eq!(backend.model(), "claude-3-5-haiku-latest");
    }
}
