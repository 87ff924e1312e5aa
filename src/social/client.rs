//! Relay Client
//!
//! Polls the relay server for messages addressed to the agent, using an
//! opaque cursor for pagination.

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::types::{MessagingClient, PollResponse};

/// Messaging client over the relay's HTTP API.
pub struct RelayClient {
    relay_url: String,
    address: String,
    http: reqwest::Client,
}

impl RelayClient {
    /// Create a client for the agent identified by `address` against the
    /// relay at `relay_url`.
    pub fn new(relay_url: String, address: String) -> Self {
        Self {
            relay_url,
            address,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MessagingClient for RelayClient {
    /// Poll the relay for new messages addressed to this agent.
    ///
    /// `cursor` is an opaque pagination token from a previous response.
    async fn poll(&self, cursor: Option<&str>, limit: u32) -> Result<PollResponse> {
        let mut url = format!(
            "{}/messages/{}?limit={limit}",
            self.relay_url, self.address
        );

        if let Some(c) = cursor {
            url.push_str(&format!("&cursor={}", urlencoding::encode(c)));
        }

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to poll relay for messages")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Relay returned {status}: {body}");
        }

        let result: PollResponse = response
            .json()
            .await
            .context("Failed to parse poll response")?;

        Ok(result)
    }
}
