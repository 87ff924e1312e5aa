//! Built-in Heartbeat Tasks
//!
//! Each task is an async function that performs one maintenance check
//! and returns a `HeartbeatTaskResult` indicating whether the reasoning
//! loop should wake, with an optional single-line message.
//!
//! The registry is a closed enum: every schedulable task is a `TaskId`
//! variant, and dispatch is an exhaustive match. Config entries naming
//! anything else are a validation warning, never a runtime error.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::state::SharedDatabase;
use crate::survival::tier::tier_for_credits;
use crate::types::{
    AgentIdentity, BalanceSnapshot, ChainClient, CreditsClient, DistressPayload, HeartbeatEntry,
    HeartbeatPingPayload, InferenceClient, MessagingClient, SandboxClient, SourceControlClient,
    SurvivalTier,
};

// ─── Persisted state keys ────────────────────────────────────────

pub const KEY_LAST_PING: &str = "last_ping";
pub const KEY_LAST_DISTRESS: &str = "last_distress";
pub const KEY_LAST_CREDIT_CHECK: &str = "last_credit_check";
pub const KEY_CREDIT_TIER_MARKER: &str = "last_credit_tier";
pub const KEY_LAST_BALANCE_CHECK: &str = "last_balance_check";
pub const KEY_INBOX_CURSOR: &str = "inbox_cursor";
pub const KEY_UPSTREAM_STATUS: &str = "upstream_status";
pub const KEY_UPSTREAM_FETCH_ERROR: &str = "upstream_last_fetch_error";
pub const KEY_LAST_HEALTH_CHECK: &str = "last_health_check";

// ─── Task tuning ─────────────────────────────────────────────────

/// Settled USDC at or above this is worth converting into credits.
const MIN_CONVERTIBLE_USDC: f64 = 1.0;

/// Native fee balance below this cannot reliably pay for a transaction.
const FEE_FLOOR_NATIVE: f64 = 0.001;

/// Messages fetched per inbox poll.
const INBOX_POLL_LIMIT: u32 = 50;

/// Timeout for the health-check probe command.
const HEALTH_CHECK_TIMEOUT_MS: u64 = 10_000;

// ─── Results ─────────────────────────────────────────────────────

/// Result of a heartbeat task execution.
#[derive(Debug, Clone)]
pub struct HeartbeatTaskResult {
    /// Whether this result should wake the reasoning loop.
    pub should_wake: bool,
    /// Optional human-readable message describing the result.
    pub message: Option<String>,
}

impl HeartbeatTaskResult {
    /// A result that does not request a wake.
    pub fn ok() -> Self {
        Self {
            should_wake: false,
            message: None,
        }
    }

    /// A result that does not request a wake, with a message.
    pub fn ok_with_message(msg: impl Into<String>) -> Self {
        Self {
            should_wake: false,
            message: Some(msg.into()),
        }
    }

    /// A result that requests the reasoning loop to wake.
    pub fn wake(msg: impl Into<String>) -> Self {
        Self {
            should_wake: true,
            message: Some(msg.into()),
        }
    }
}

// ─── Registry ────────────────────────────────────────────────────

/// The closed set of schedulable built-in tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskId {
    HeartbeatPing,
    CheckCredits,
    CheckUsdcBalance,
    CheckSocialInbox,
    CheckForUpdates,
    HealthCheck,
}

impl TaskId {
    pub const ALL: [TaskId; 6] = [
        TaskId::HeartbeatPing,
        TaskId::CheckCredits,
        TaskId::CheckUsdcBalance,
        TaskId::CheckSocialInbox,
        TaskId::CheckForUpdates,
        TaskId::HealthCheck,
    ];

    /// The stable name used in heartbeat config entries.
    pub fn name(self) -> &'static str {
        match self {
            TaskId::HeartbeatPing => "heartbeat_ping",
            TaskId::CheckCredits => "check_credits",
            TaskId::CheckUsdcBalance => "check_usdc_balance",
            TaskId::CheckSocialInbox => "check_social_inbox",
            TaskId::CheckForUpdates => "check_for_updates",
            TaskId::HealthCheck => "health_check",
        }
    }

    /// Resolve a config-provided task name.
    pub fn from_name(name: &str) -> Option<TaskId> {
        TaskId::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// Essential tasks keep running in every degraded tier: the checks
    /// that watch the balance, the inbox, and liveness itself.
    pub fn is_essential(self) -> bool {
        matches!(
            self,
            TaskId::HeartbeatPing
                | TaskId::CheckCredits
                | TaskId::CheckUsdcBalance
                | TaskId::CheckSocialInbox
        )
    }
}

/// Check configured entries against the registry. Returns a warning line
/// per entry whose task name does not resolve; such entries are skipped
/// at tick time, never errored.
pub fn validate_entries(entries: &[HeartbeatEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|e| TaskId::from_name(&e.task).is_none())
        .map(|e| {
            format!(
                "heartbeat entry '{}' references unknown task '{}'",
                e.name, e.task
            )
        })
        .collect()
}

// ─── Context ─────────────────────────────────────────────────────

/// Everything a task may touch: the shared single-writer database and
/// the external collaborators. One context is built per daemon and
/// shared by all tasks; tasks run sequentially, so no task ever sees
/// another task's half-written state.
#[derive(Clone)]
pub struct TaskContext {
    pub identity: AgentIdentity,
    pub version: String,
    pub db: SharedDatabase,
    pub credits: Arc<dyn CreditsClient>,
    pub chain: Arc<dyn ChainClient>,
    pub inference: Arc<dyn InferenceClient>,
    pub messaging: Option<Arc<dyn MessagingClient>>,
    pub source_control: Arc<dyn SourceControlClient>,
    pub sandbox: Arc<dyn SandboxClient>,
    pub started_at: Instant,
}

/// Execute one task by id. Exhaustive over the registry.
pub async fn run_task(id: TaskId, ctx: &TaskContext) -> Result<HeartbeatTaskResult> {
    match id {
        TaskId::HeartbeatPing => heartbeat_ping(ctx).await,
        TaskId::CheckCredits => check_credits(ctx).await,
        TaskId::CheckUsdcBalance => check_usdc_balance(ctx).await,
        TaskId::CheckSocialInbox => check_social_inbox(ctx).await,
        TaskId::CheckForUpdates => check_for_updates(ctx).await,
        TaskId::HealthCheck => health_check(ctx).await,
    }
}

/// Query the credit balance, treating a collaborator failure as zero.
/// Failing toward the most restrictive tier is deliberate: a balance we
/// cannot read must never keep the agent spending.
async fn credits_or_zero(ctx: &TaskContext) -> i64 {
    match ctx.credits.get_credits_balance().await {
        Ok(cents) => cents,
        Err(e) => {
            warn!("Credit balance query failed, assuming 0: {e:#}");
            0
        }
    }
}

// ─── Tasks ───────────────────────────────────────────────────────

/// Publish a liveness snapshot to persisted state.
///
/// In the `Critical` and `Dead` tiers the ping doubles as a distress
/// beacon: it records a distress payload and requests a wake.
pub async fn heartbeat_ping(ctx: &TaskContext) -> Result<HeartbeatTaskResult> {
    let credits_cents = credits_or_zero(ctx).await;
    let tier = tier_for_credits(credits_cents);
    let now = Utc::now().to_rfc3339();

    let payload = HeartbeatPingPayload {
        name: ctx.identity.name.clone(),
        address: ctx.identity.address.clone(),
        tier,
        credits_cents,
        uptime_seconds: ctx.started_at.elapsed().as_secs(),
        version: ctx.version.clone(),
        timestamp: now.clone(),
    };

    {
        let db = ctx.db.lock().unwrap();
        db.set_kv(KEY_LAST_PING, &serde_json::to_string(&payload)?)?;
    }

    if tier >= SurvivalTier::Critical {
        let message = format!(
            "Distress ping: tier {tier}, {credits_cents} cents remaining"
        );
        let distress = DistressPayload {
            tier,
            credits_cents,
            message: message.clone(),
            timestamp: now,
        };
        {
            let db = ctx.db.lock().unwrap();
            db.set_kv(KEY_LAST_DISTRESS, &serde_json::to_string(&distress)?)?;
        }
        warn!("{message}");
        return Ok(HeartbeatTaskResult::wake(message));
    }

    debug!("Heartbeat ping recorded (tier {tier})");
    Ok(HeartbeatTaskResult::ok_with_message("Ping recorded"))
}

/// Recompute the survival tier from the credit balance.
///
/// Wakes only on a downgrade into `Critical` or `Dead` -- edge-triggered
/// against this task's own tier marker, so an agent that stays critical
/// does not re-alert every check.
pub async fn check_credits(ctx: &TaskContext) -> Result<HeartbeatTaskResult> {
    let credits_cents = credits_or_zero(ctx).await;
    let new_tier = tier_for_credits(credits_cents);
    let now = Utc::now().to_rfc3339();

    let prev_tier = {
        let db = ctx.db.lock().unwrap();
        let prev = db
            .get_kv(KEY_CREDIT_TIER_MARKER)?
            .and_then(|s| SurvivalTier::from_marker(&s))
            .unwrap_or(SurvivalTier::Normal);

        db.set_kv(KEY_CREDIT_TIER_MARKER, new_tier.as_str())?;
        db.set_kv(
            KEY_LAST_CREDIT_CHECK,
            &serde_json::json!({
                "creditsCents": credits_cents,
                "tier": new_tier.as_str(),
                "checkedAt": now,
            })
            .to_string(),
        )?;
        prev
    };

    if new_tier > prev_tier && new_tier >= SurvivalTier::Critical {
        let message = format!(
            "Credit tier downgraded {prev_tier} -> {new_tier}: {credits_cents} cents remaining"
        );
        warn!("{message}");
        return Ok(HeartbeatTaskResult::wake(message));
    }

    debug!("Credit check: {credits_cents} cents, tier {new_tier}");
    Ok(HeartbeatTaskResult::ok_with_message(format!(
        "Credits: {credits_cents} cents ({new_tier})"
    )))
}

/// Compare settlement-layer balances against the spendable credit
/// balance.
///
/// Wakes when settled value is sitting unconverted while credits are
/// short (money exists but has not been turned into compute), or when
/// the fee-paying balance drops below the operational floor.
pub async fn check_usdc_balance(ctx: &TaskContext) -> Result<HeartbeatTaskResult> {
    let balances = ctx.chain.get_chain_balances().await?;
    let credits_cents = credits_or_zero(ctx).await;
    let now = Utc::now().to_rfc3339();

    let snapshot = BalanceSnapshot {
        credits_cents,
        settled_usdc: balances.settled_usdc,
        fee_native: balances.fee_native,
        checked_at: now,
    };
    {
        let db = ctx.db.lock().unwrap();
        db.set_kv(KEY_LAST_BALANCE_CHECK, &serde_json::to_string(&snapshot)?)?;
    }

    let credits_short = tier_for_credits(credits_cents) != SurvivalTier::Normal;
    if balances.settled_usdc >= MIN_CONVERTIBLE_USDC && credits_short {
        let message = format!(
            "Unconverted funds: {:.2} USDC settled but only {credits_cents} credit cents",
            balances.settled_usdc
        );
        info!("{message}");
        return Ok(HeartbeatTaskResult::wake(message));
    }

    if balances.fee_native < FEE_FLOOR_NATIVE {
        let message = format!(
            "Fee balance below floor: {:.6} native remaining",
            balances.fee_native
        );
        warn!("{message}");
        return Ok(HeartbeatTaskResult::wake(message));
    }

    Ok(HeartbeatTaskResult::ok_with_message(format!(
        "Balances OK: {:.2} USDC settled, {credits_cents} credit cents",
        balances.settled_usdc
    )))
}

/// Poll the relay inbox from the persisted cursor.
///
/// Messages are deduplicated by id against the stored seen-set; the
/// cursor advances regardless, and a wake is requested only when
/// genuinely new messages arrived.
pub async fn check_social_inbox(ctx: &TaskContext) -> Result<HeartbeatTaskResult> {
    let Some(messaging) = ctx.messaging.as_ref() else {
        return Ok(HeartbeatTaskResult::ok_with_message("No relay configured"));
    };

    let cursor = {
        let db = ctx.db.lock().unwrap();
        db.get_kv(KEY_INBOX_CURSOR)?
    };

    let response = messaging.poll(cursor.as_deref(), INBOX_POLL_LIMIT).await?;

    let mut new_count = 0u32;
    {
        let db = ctx.db.lock().unwrap();
        for msg in &response.messages {
            if db.insert_inbox_message(msg)? {
                new_count += 1;
            }
        }
        if let Some(next) = response.next_cursor.as_deref() {
            db.set_kv(KEY_INBOX_CURSOR, next)?;
        }
    }

    if new_count > 0 {
        let message = format!("{new_count} new inbox message(s)");
        info!("{message}");
        return Ok(HeartbeatTaskResult::wake(message));
    }

    debug!("Inbox poll: nothing new");
    Ok(HeartbeatTaskResult::ok_with_message("Inbox empty"))
}

/// Ask the source-control collaborator how far behind origin we are.
///
/// Wakes on a positive behind-count. Fetch errors wake once per distinct
/// error value; repeats of the same error are suppressed until the error
/// changes or clears.
pub async fn check_for_updates(ctx: &TaskContext) -> Result<HeartbeatTaskResult> {
    let status = ctx.source_control.check_upstream().await?;

    if let Some(error) = status.fetch_error.as_deref() {
        let previous = {
            let db = ctx.db.lock().unwrap();
            let prev = db.get_kv(KEY_UPSTREAM_FETCH_ERROR)?;
            db.set_kv(KEY_UPSTREAM_FETCH_ERROR, error)?;
            prev
        };

        if previous.as_deref() == Some(error) {
            debug!("Upstream fetch error unchanged, not re-alerting");
            return Ok(HeartbeatTaskResult::ok_with_message(
                "Upstream fetch error unchanged",
            ));
        }

        let message = format!("Upstream fetch failed: {error}");
        warn!("{message}");
        return Ok(HeartbeatTaskResult::wake(message));
    }

    {
        let db = ctx.db.lock().unwrap();
        db.delete_kv(KEY_UPSTREAM_FETCH_ERROR)?;
        db.set_kv(KEY_UPSTREAM_STATUS, &serde_json::to_string(&status)?)?;
    }

    if status.behind > 0 {
        let message = format!("{} commit(s) behind origin", status.behind);
        info!("{message}");
        return Ok(HeartbeatTaskResult::wake(message));
    }

    debug!("Upstream check: up to date");
    Ok(HeartbeatTaskResult::ok_with_message("Up to date with origin"))
}

/// Execute a trivial liveness command in the agent's own sandbox.
///
/// Any failure -- including a clean non-zero exit -- requests a wake:
/// an agent whose sandbox cannot run `echo` has bigger problems than a
/// noisy alert.
pub async fn health_check(ctx: &TaskContext) -> Result<HeartbeatTaskResult> {
    let probe = ctx
        .sandbox
        .exec("echo ok", Some(HEALTH_CHECK_TIMEOUT_MS))
        .await;

    {
        let db = ctx.db.lock().unwrap();
        db.set_kv(KEY_LAST_HEALTH_CHECK, &Utc::now().to_rfc3339())?;
    }

    match probe {
        Ok(result) if result.exit_code == 0 => {
            debug!("Health check passed");
            Ok(HeartbeatTaskResult::ok_with_message("Sandbox healthy"))
        }
        Ok(result) => {
            let message = format!(
                "Health check exited with status {}: {}",
                result.exit_code,
                result.stderr.trim()
            );
            warn!("{message}");
            Ok(HeartbeatTaskResult::wake(message))
        }
        Err(e) => {
            let message = format!("Health check failed: {e:#}");
            warn!("{message}");
            Ok(HeartbeatTaskResult::wake(message))
        }
    }
}
