//! Control Plane API Client
//!
//! Communicates with the provider's control plane for sandbox
//! execution, file writes, credit balance, and wallet balance queries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::types::{ChainBalances, ChainClient, CreditsClient, ExecResult, SandboxClient};

/// Control plane client. One instance serves the credits, chain, and
/// sandbox collaborator traits.
pub struct ControlHttpClient {
    pub api_url: String,
    pub api_key: String,
    pub sandbox_id: String,
    http: Client,
}

impl ControlHttpClient {
    pub fn new(api_url: String, api_key: String, sandbox_id: String) -> Self {
        Self {
            api_url,
            api_key,
            sandbox_id,
            http: Client::new(),
        }
    }

    /// Send an HTTP request to the control plane and return JSON.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{}", self.api_url, path);

        let mut builder = match method {
            "GET" => self.http.get(&url),
            "POST" => self.http.post(&url),
            "PUT" => self.http.put(&url),
            "DELETE" => self.http.delete(&url),
            _ => self.http.get(&url),
        };

        builder = builder
            .header("Content-Type", "application/json")
            .header("Authorization", &self.api_key);

        if let Some(b) = body {
            builder = builder.json(&b);
        }

        let resp = builder
            .send()
            .await
            .with_context(|| format!("Control plane request failed: {method} {path}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "Control plane error: {method} {path} -> {}: {text}",
                status.as_u16()
            );
        }

        let json: Value = resp
            .json()
            .await
            .with_context(|| format!("Invalid JSON from {method} {path}"))?;
        Ok(json)
    }
}

#[async_trait]
impl CreditsClient for ControlHttpClient {
    /// Current credit balance in integer cents.
    async fn get_credits_balance(&self) -> Result<i64> {
        let result = self.request("GET", "/v1/credits/balance", None).await?;
        result["balanceCents"]
            .as_i64()
            .context("Missing balanceCents in credits response")
    }
}

#[async_trait]
impl ChainClient for ControlHttpClient {
    /// Settlement-layer balances for the sandbox's wallet.
    async fn get_chain_balances(&self) -> Result<ChainBalances> {
        let result = self.request("GET", "/v1/wallet/balances", None).await?;
        Ok(ChainBalances {
            settled_usdc: result["settledUsdc"].as_f64().unwrap_or(0.0),
            fee_native: result["feeNative"].as_f64().unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl SandboxClient for ControlHttpClient {
    /// Execute a command in the agent's own sandbox.
    async fn exec(&self, command: &str, timeout_ms: Option<u64>) -> Result<ExecResult> {
        let mut body = serde_json::json!({ "command": command });
        if let Some(t) = timeout_ms {
            body["timeout"] = serde_json::json!(t);
        }

        let result = self
            .request(
                "POST",
                &format!("/v1/sandboxes/{}/exec", self.sandbox_id),
                Some(body),
            )
            .await?;

        Ok(ExecResult {
            stdout: result["stdout"].as_str().unwrap_or("").to_string(),
            stderr: result["stderr"].as_str().unwrap_or("").to_string(),
            exit_code: result["exitCode"]
                .as_i64()
                .or_else(|| result["exit_code"].as_i64())
                .unwrap_or(0) as i32,
        })
    }

    /// Write a file into the sandbox.
    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let body = serde_json::json!({ "path": path, "content": content });
        self.request(
            "POST",
            &format!("/v1/sandboxes/{}/files/upload/json", self.sandbox_id),
            Some(body),
        )
        .await?;
        Ok(())
    }

    /// Read a file from the sandbox.
    async fn read_file(&self, path: &str) -> Result<String> {
        let encoded = urlencoding::encode(path);
        let result = self
            .request(
                "GET",
                &format!(
                    "/v1/sandboxes/{}/files/read?path={encoded}",
                    self.sandbox_id
                ),
                None,
            )
            .await?;

        result["content"]
            .as_str()
            .map(str::to_string)
            .context("Missing content in file read response")
    }
}
