//! HTTP implementation of the one-shot AI supervisor over an
//! OpenAI-compatible chat-completions endpoint.

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use converge::{Completion, Supervisor, SupervisorError};

/// Supervisor client for an OpenAI-compatible endpoint.
///
/// Configured from `VC_SUPERVISOR_URL` / `VC_SUPERVISOR_API_KEY`; endpoints
/// without auth accept the conventional `"not-needed"` key.
pub struct HttpSupervisor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpSupervisor {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("VC_SUPERVISOR_URL")
                .unwrap_or_else(|_| "http://localhost:8317/v1".into()),
            std::env::var("VC_SUPERVISOR_API_KEY").unwrap_or_else(|_| "not-needed".into()),
        )
    }

    /// Model used for supervisor calls unless the caller picks one
    /// (`VC_SUPERVISOR_MODEL`).
    pub fn default_model() -> String {
        std::env::var("VC_SUPERVISOR_MODEL").unwrap_or_else(|_| "claude-sonnet-4-5".into())
    }
}

#[async_trait]
impl Supervisor for HttpSupervisor {
    async fn call(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<Completion, SupervisorError> {
        let body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if self.api_key != "not-needed" {
            request = request.bearer_auth(&self.api_key);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(SupervisorError::Transport("supervisor call canceled".into()));
            }
            response = request.send() => {
                response.map_err(|e| SupervisorError::Transport(e.to_string()))?
            }
        };

        if !response.status().is_success() {
            return Err(SupervisorError::Transport(format!(
                "supervisor endpoint returned {}",
                response.status()
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SupervisorError::Transport(e.to_string()))?;
        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                SupervisorError::Parse("reply carries no message content".into())
            })?;

        Ok(Completion::from_text(text))
    }
}
