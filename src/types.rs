//! Vigil - Type Definitions
//!
//! Shared types for the agent's operational core: the data model for
//! heartbeat scheduling, survival tiers, and the self-modification audit
//! trail, plus the collaborator traits the core consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── Identity ────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub name: String,
    /// Wallet address the agent is known by on the settlement layer.
    pub address: String,
    pub created_at: String,
}

// ─── Configuration ───────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub name: String,
    pub wallet_address: String,
    pub control_api_url: String,
    pub control_api_key: String,
    pub sandbox_id: String,
    pub inference_model: String,
    pub max_tokens_per_turn: u32,
    pub heartbeat_config_path: String,
    pub db_path: String,
    pub log_level: LogLevel,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Returns a default (partial) `AgentConfig`. Fields that have no sensible
/// default are set to empty strings so callers can override them.
pub fn default_config() -> AgentConfig {
    AgentConfig {
        name: String::new(),
        wallet_address: String::new(),
        control_api_url: "https://api.conway.tech".to_string(),
        control_api_key: String::new(),
        sandbox_id: String::new(),
        inference_model: "gpt-4o".to_string(),
        max_tokens_per_turn: 4096,
        heartbeat_config_path: "~/.vigil/heartbeat.yml".to_string(),
        db_path: "~/.vigil/state.db".to_string(),
        log_level: LogLevel::Info,
        version: "0.1.0".to_string(),
        relay_url: Some("https://social.conway.tech".to_string()),
    }
}

// ─── Survival ────────────────────────────────────────────────────

/// Operating tier derived from the credit balance. Ordered by severity,
/// so `a > b` means "a is a worse place to be than b".
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SurvivalTier {
    Normal,
    LowCompute,
    Critical,
    Dead,
}

impl SurvivalTier {
    /// Stable string form used for kv markers and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            SurvivalTier::Normal => "normal",
            SurvivalTier::LowCompute => "low_compute",
            SurvivalTier::Critical => "critical",
            SurvivalTier::Dead => "dead",
        }
    }

    /// Parse the string form written by [`SurvivalTier::as_str`].
    pub fn from_marker(s: &str) -> Option<SurvivalTier> {
        match s {
            "normal" => Some(SurvivalTier::Normal),
            "low_compute" => Some(SurvivalTier::LowCompute),
            "critical" => Some(SurvivalTier::Critical),
            "dead" => Some(SurvivalTier::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for SurvivalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Heartbeat ───────────────────────────────────────────────────

/// One scheduled task binding. "Removal" is modeled as `enabled = false`;
/// rows are never physically deleted so schedule history stays intact.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatEntry {
    pub name: String,
    /// Six-field cron expression (with seconds).
    pub schedule: String,
    /// Name of the built-in task this entry runs.
    pub task: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    pub entries: Vec<HeartbeatEntry>,
}

/// Snapshot published by the liveness ping task.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPingPayload {
    pub name: String,
    pub address: String,
    pub tier: SurvivalTier,
    pub credits_cents: i64,
    pub uptime_seconds: u64,
    pub version: String,
    pub timestamp: String,
}

/// Recorded when the liveness ping finds the agent in a critical or dead
/// tier. Kept in the kv store for post-hoc inspection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistressPayload {
    pub tier: SurvivalTier,
    pub credits_cents: i64,
    pub message: String,
    pub timestamp: String,
}

/// Snapshot persisted by the on-chain/off-chain balance check.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub credits_cents: i64,
    pub settled_usdc: f64,
    pub fee_native: f64,
    pub checked_at: String,
}

/// Immutable record of a survival tier change. Appended only when the
/// computed tier differs from the previously recorded one.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeTransition {
    pub id: String,
    pub from_tier: SurvivalTier,
    pub to_tier: SurvivalTier,
    pub credits_cents: i64,
    pub transitioned_at: String,
}

// ─── Self-Modification ───────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationEntry {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub mod_type: ModificationType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    pub reversible: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModificationType {
    CodeEdit,
    ToolInstall,
    ConfigChange,
    HeartbeatChange,
    PromptChange,
    UpstreamPull,
}

impl ModificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationType::CodeEdit => "code_edit",
            ModificationType::ToolInstall => "tool_install",
            ModificationType::ConfigChange => "config_change",
            ModificationType::HeartbeatChange => "heartbeat_change",
            ModificationType::PromptChange => "prompt_change",
            ModificationType::UpstreamPull => "upstream_pull",
        }
    }

    pub fn from_marker(s: &str) -> Option<ModificationType> {
        match s {
            "code_edit" => Some(ModificationType::CodeEdit),
            "tool_install" => Some(ModificationType::ToolInstall),
            "config_change" => Some(ModificationType::ConfigChange),
            "heartbeat_change" => Some(ModificationType::HeartbeatChange),
            "prompt_change" => Some(ModificationType::PromptChange),
            "upstream_pull" => Some(ModificationType::UpstreamPull),
            _ => None,
        }
    }
}

// ─── Messaging ───────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub content: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub messages: Vec<InboxMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ─── Source Control ──────────────────────────────────────────────

/// Status of the agent's checkout relative to its origin.
///
/// Fetch failures are reported in `fetch_error` rather than raised, so
/// callers can decide whether a repeated identical error is news.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamStatus {
    pub behind: u32,
    pub commits: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

// ─── Sandbox ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

// ─── Inference ───────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
    pub id: String,
    pub model: String,
    pub content: String,
    pub usage: TokenUsage,
    pub finish_reason: String,
}

// ─── Collaborator Interfaces ─────────────────────────────────────

/// Spendable compute-credit balance, from the control plane.
#[async_trait]
pub trait CreditsClient: Send + Sync {
    /// Current credit balance in integer cents. Callers must treat a
    /// failure as a zero balance for the current check, never as "leave
    /// the tier unchanged".
    async fn get_credits_balance(&self) -> anyhow::Result<i64>;
}

/// Settlement-layer balances for the agent's wallet.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBalances {
    /// Settled stablecoin value that could be converted into credits.
    pub settled_usdc: f64,
    /// Native balance used to pay transaction fees.
    pub fee_native: f64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_chain_balances(&self) -> anyhow::Result<ChainBalances>;
}

/// The inference collaborator. The core only steers it; the chat surface
/// exists so operator tooling can exercise the configured model.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>) -> anyhow::Result<InferenceResponse>;

    /// Flip the low-compute flag. Safe to call redundantly.
    fn set_low_compute_mode(&self, enabled: bool);

    /// The model currently in effect (default, or the low-compute model).
    fn current_model(&self) -> String;
}

/// Relay messaging: cursor-based inbox polling.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn poll(&self, cursor: Option<&str>, limit: u32) -> anyhow::Result<PollResponse>;
}

/// Source-control collaborator for upstream tracking.
#[async_trait]
pub trait SourceControlClient: Send + Sync {
    async fn check_upstream(&self) -> anyhow::Result<UpstreamStatus>;
}

/// Sandbox execution and file writes. All self-modification flows through
/// this surface so the command and file guards sit in front of it.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    async fn exec(&self, command: &str, timeout_ms: Option<u64>) -> anyhow::Result<ExecResult>;
    async fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()>;
    async fn read_file(&self, path: &str) -> anyhow::Result<String>;
}
