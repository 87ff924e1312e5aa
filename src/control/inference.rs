//! Inference Client
//!
//! Wraps the provider's OpenAI-compatible chat completion endpoint. The
//! agent pays for its own thinking, so the survival engine can flip this
//! client into low-compute mode and pin it to the cheap model.

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::survival::LOW_COMPUTE_MODEL;
use crate::types::{ChatMessage, InferenceClient, InferenceResponse, TokenUsage};

/// HTTP inference client with a switchable active model.
pub struct InferenceHttpClient {
    api_url: String,
    api_key: String,
    default_model: String,
    active_model: Mutex<String>,
    max_tokens: u32,
    http: Client,
}

impl InferenceHttpClient {
    pub fn new(api_url: String, api_key: String, default_model: String, max_tokens: u32) -> Self {
        Self {
            api_url,
            api_key,
            active_model: Mutex::new(default_model.clone()),
            default_model,
            max_tokens,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl InferenceClient for InferenceHttpClient {
    /// Send a chat completion request using the currently active model.
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<InferenceResponse> {
        let model = self.current_model();

        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "stream": false,
        });

        let url = format!("{}/v1/chat/completions", self.api_url);
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Inference request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Inference error: {}: {text}", status.as_u16());
        }

        let data: Value = resp
            .json()
            .await
            .context("Failed to parse inference response")?;

        let choice = data["choices"]
            .get(0)
            .context("No completion choice returned from inference")?;

        Ok(InferenceResponse {
            id: data["id"].as_str().unwrap_or("").to_string(),
            model: data["model"].as_str().unwrap_or(&model).to_string(),
            content: choice["message"]["content"]
                .as_str()
                .unwrap_or("")
                .to_string(),
            usage: TokenUsage {
                prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
                completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
                total_tokens: data["usage"]["total_tokens"].as_u64().unwrap_or(0),
            },
            finish_reason: choice["finish_reason"].as_str().unwrap_or("stop").to_string(),
        })
    }

    /// Toggle low-compute mode. Enabled pins the cheap model; disabled
    /// restores the configured default. Redundant calls are harmless.
    fn set_low_compute_mode(&self, enabled: bool) {
        let mut active = self.active_model.lock().unwrap();
        *active = if enabled {
            LOW_COMPUTE_MODEL.to_string()
        } else {
            self.default_model.clone()
        };
    }

    /// The model currently in effect.
    fn current_model(&self) -> String {
        self.active_model.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_compute_mode_swaps_and_restores_the_model() {
        let client = InferenceHttpClient::new(
            "http://localhost".into(),
            "key".into(),
            "gpt-4o".into(),
            4096,
        );
        assert_eq!(client.current_model(), "gpt-4o");

        client.set_low_compute_mode(true);
        assert_eq!(client.current_model(), LOW_COMPUTE_MODEL);

        // Redundant enable is a no-op.
        client.set_low_compute_mode(true);
        assert_eq!(client.current_model(), LOW_COMPUTE_MODEL);

        client.set_low_compute_mode(false);
        assert_eq!(client.current_model(), "gpt-4o");
    }
}
