//! Heartbeat Daemon
//!
//! Runs the background loop that checks cron schedules and executes due
//! heartbeat tasks. Uses `tokio::time::interval` for the tick loop; each
//! tick runs inline in the loop task, so a slow tick delays the next one
//! rather than overlapping it.
//!
//! Failure handling is two-level. A failing task only bumps that task's
//! consecutive-failure streak, waking the reasoning loop at the
//! threshold. A failing tick -- the orchestration itself throwing -- is
//! graver: past its threshold the daemon stops itself and says so,
//! because a loop that cannot even run its checks is riskier silent than
//! stopped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::survival::{observe_tier, tier_for_credits};
use crate::types::{HeartbeatEntry, SurvivalTier};

use super::tasks::{run_task, HeartbeatTaskResult, TaskContext, TaskId};
use super::wake::WakeSender;

/// Seconds between ticks.
pub const TICK_INTERVAL_SECS: u64 = 60;

/// Seconds between ticks in verbose mode.
pub const VERBOSE_TICK_INTERVAL_SECS: u64 = 15;

/// Consecutive failures of one task before a wake is raised.
pub const TASK_FAILURE_WAKE_THRESHOLD: u32 = 3;

/// Consecutive whole-tick failures before the daemon stops itself.
pub const TICK_FAILURE_STOP_THRESHOLD: u32 = 5;

/// Due-ness basis for entries that have never run: assume overdue by
/// computing the next fire time from this far in the past.
const NEVER_RUN_LOOKBACK_HOURS: i64 = 24;

/// Options for creating a heartbeat daemon.
#[derive(Debug, Default)]
pub struct HeartbeatDaemonOptions {
    /// Tick faster for interactive debugging.
    pub verbose: bool,
    /// Explicit tick interval override, mainly for tests and operator
    /// diagnostics. Takes precedence over `verbose`.
    pub tick_interval_secs: Option<u64>,
}

/// The heartbeat daemon. Each instance owns its own timer, failure
/// counters, and context; construct as many as you need (tests do).
pub struct HeartbeatDaemon {
    core: Arc<DaemonCore>,
    stop_signal: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
    tick_interval: Duration,
}

impl HeartbeatDaemon {
    pub fn new(ctx: TaskContext, wake: WakeSender, options: HeartbeatDaemonOptions) -> Self {
        let tick_interval_secs = options.tick_interval_secs.unwrap_or(if options.verbose {
            VERBOSE_TICK_INTERVAL_SECS
        } else {
            TICK_INTERVAL_SECS
        });

        Self {
            core: Arc::new(DaemonCore {
                ctx,
                wake,
                running: AtomicBool::new(false),
                tick_in_flight: AtomicBool::new(false),
                task_failures: Mutex::new(HashMap::new()),
                tick_failures: AtomicU32::new(0),
            }),
            stop_signal: Arc::new(Notify::new()),
            handle: None,
            tick_interval: Duration::from_secs(tick_interval_secs),
        }
    }

    /// Start the daemon loop. Idempotent: calling while running is a
    /// no-op. The first tick is dispatched immediately, not after the
    /// interval.
    pub fn start(&mut self) {
        if self.core.running.swap(true, Ordering::SeqCst) {
            warn!("Heartbeat daemon is already running");
            return;
        }

        info!(
            "Starting heartbeat daemon ({}s tick interval)",
            self.tick_interval.as_secs()
        );

        let core = Arc::clone(&self.core);
        let stop = Arc::clone(&self.stop_signal);
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            // A slow tick delays the next one; it is never run
            // concurrently with itself.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // The first interval.tick() completes immediately, which
                // gives start() its immediate tick.
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = stop.notified() => {}
                }

                if !core.running.load(Ordering::SeqCst) {
                    info!("Heartbeat daemon stopping");
                    break;
                }

                core.run_tick().await;

                if !core.running.load(Ordering::SeqCst) {
                    // The tick-failure threshold tripped mid-loop.
                    break;
                }
            }
        });

        self.handle = Some(handle);
    }

    /// Stop the daemon. Idempotent. Only prevents the next tick from
    /// being armed; a tick already in flight runs to completion.
    pub fn stop(&mut self) {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            debug!("Heartbeat daemon is not running");
            return;
        }

        info!("Stopping heartbeat daemon");
        self.stop_signal.notify_one();
        // The loop exits on its own once any in-flight tick completes.
        self.handle.take();
    }

    /// Whether the daemon loop is alive. Becomes false after `stop()` or
    /// after the daemon halts itself on repeated tick failures.
    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    /// Execute exactly one named task outside its schedule, bypassing
    /// the due-check. For operator and diagnostic use.
    pub async fn force_run(&self, task_name: &str) -> Result<HeartbeatTaskResult> {
        let entry = {
            let db = self.core.ctx.db.lock().unwrap();
            db.get_heartbeat_entries()?
                .into_iter()
                .find(|e| e.name == task_name)
        }
        .with_context(|| format!("no heartbeat entry named '{task_name}'"))?;

        let task = TaskId::from_name(&entry.task).with_context(|| {
            format!(
                "entry '{}' references unknown task '{}'",
                entry.name, entry.task
            )
        })?;

        info!("Force-running heartbeat task: {task_name}");
        let result = run_task(task, &self.core.ctx).await;

        let now = Utc::now().to_rfc3339();
        if let Err(e) = self
            .core
            .ctx
            .db
            .lock()
            .unwrap()
            .update_heartbeat_last_run(&entry.name, &now)
        {
            warn!("Failed to record last_run for '{}': {e:#}", entry.name);
        }

        result
    }
}

/// Check whether a heartbeat entry is due at `now`.
///
/// An entry is due when it is enabled, its schedule parses, and the next
/// fire time computed from `last_run` (or from 24 hours ago when it has
/// never run) is at or before `now`. An unparseable schedule makes the
/// entry "not due", never an error.
pub fn is_due(entry: &HeartbeatEntry, now: DateTime<Utc>) -> bool {
    if !entry.enabled {
        return false;
    }

    let schedule: Schedule = match entry.schedule.parse() {
        Ok(s) => s,
        Err(e) => {
            warn!(
                "Invalid cron schedule '{}' for entry '{}': {e}",
                entry.schedule, entry.name
            );
            return false;
        }
    };

    let basis = entry
        .last_run
        .as_deref()
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .unwrap_or_else(|| now - ChronoDuration::hours(NEVER_RUN_LOOKBACK_HOURS));

    match schedule.after(&basis).next() {
        Some(next) => next <= now,
        None => false,
    }
}

/// Shared state between the daemon handle and its spawned loop.
struct DaemonCore {
    ctx: TaskContext,
    wake: WakeSender,
    running: AtomicBool,
    tick_in_flight: AtomicBool,
    /// Consecutive failures per entry name. In-memory only: streaks do
    /// not survive a restart.
    task_failures: Mutex<HashMap<String, u32>>,
    tick_failures: AtomicU32,
}

impl DaemonCore {
    /// Run one tick, tracking the whole-tick failure streak.
    async fn run_tick(&self) {
        if !self.running.load(Ordering::SeqCst) {
            debug!("Tick requested while stopped; ignoring");
            return;
        }

        // Ticks run inline in the loop task, so this flag never trips in
        // normal operation; it makes the non-overlap invariant observable
        // instead of assumed.
        if self.tick_in_flight.swap(true, Ordering::SeqCst) {
            warn!("Tick already in flight, skipping");
            return;
        }

        let result = self.tick().await;
        self.tick_in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                self.tick_failures.store(0, Ordering::SeqCst);
            }
            Err(e) => {
                error!("Heartbeat tick failed: {e:#}");
                let failures = self.tick_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= TICK_FAILURE_STOP_THRESHOLD {
                    self.running.store(false, Ordering::SeqCst);
                    error!("Heartbeat daemon stopping after {failures} consecutive tick failures");
                    self.wake.request(format!(
                        "Heartbeat daemon stopped: {failures} consecutive tick failures (last: {e:#})"
                    ));
                }
            }
        }
    }

    /// One tick: read the schedule, compute the tier, filter to what may
    /// run at that tier, and execute due entries strictly in sequence.
    async fn tick(&self) -> Result<()> {
        let entries = {
            let db = self.ctx.db.lock().unwrap();
            db.get_heartbeat_entries()
                .context("failed to read heartbeat entries")?
        };

        // A balance we cannot read is treated as empty for this tick
        // only: fail toward the most restrictive tier, don't abort.
        let credits_cents = match self.ctx.credits.get_credits_balance().await {
            Ok(cents) => cents,
            Err(e) => {
                warn!("Balance query failed, assuming 0 for this tick: {e:#}");
                0
            }
        };
        let tier = tier_for_credits(credits_cents);

        {
            let db = self.ctx.db.lock().unwrap();
            observe_tier(&db, self.ctx.inference.as_ref(), tier, credits_cents)
                .context("failed to apply tier bookkeeping")?;
        }

        let now = Utc::now();
        for entry in &entries {
            if !entry.enabled {
                continue;
            }

            // Stale config naming a removed built-in self-heals by
            // fixing the config; not worth alerting on every tick.
            let Some(task) = TaskId::from_name(&entry.task) else {
                debug!(
                    "Skipping entry '{}': unknown task '{}'",
                    entry.name, entry.task
                );
                continue;
            };

            if tier != SurvivalTier::Normal && !task.is_essential() {
                debug!(
                    "Tier {tier}: skipping non-essential entry '{}' this tick",
                    entry.name
                );
                continue;
            }

            if !is_due(entry, now) {
                continue;
            }

            self.execute_entry(entry, task).await;
        }

        Ok(())
    }

    /// Execute one due entry, tracking its consecutive-failure streak.
    /// `last_run` is written for every attempted run, success or failure.
    async fn execute_entry(&self, entry: &HeartbeatEntry, task: TaskId) {
        debug!("Executing heartbeat task: {} ({})", entry.name, entry.task);
        let result = run_task(task, &self.ctx).await;

        let now = Utc::now().to_rfc3339();
        if let Err(e) = self
            .ctx
            .db
            .lock()
            .unwrap()
            .update_heartbeat_last_run(&entry.name, &now)
        {
            warn!("Failed to record last_run for '{}': {e:#}", entry.name);
        }

        match result {
            Ok(outcome) => {
                self.task_failures.lock().unwrap().remove(&entry.name);
                if outcome.should_wake {
                    let reason = outcome
                        .message
                        .unwrap_or_else(|| format!("Task '{}' requested wake", entry.name));
                    info!("Task '{}' requests wake: {reason}", entry.name);
                    self.wake.request(reason);
                } else {
                    debug!(
                        "Task '{}' completed: {}",
                        entry.name,
                        outcome.message.as_deref().unwrap_or("(no message)")
                    );
                }
            }
            Err(e) => {
                warn!("Heartbeat task '{}' failed: {e:#}", entry.name);
                let streak = {
                    let mut failures = self.task_failures.lock().unwrap();
                    let streak = failures.entry(entry.name.clone()).or_insert(0);
                    *streak += 1;
                    *streak
                };
                if streak == TASK_FAILURE_WAKE_THRESHOLD {
                    self.wake.request(format!(
                        "Task '{}' has failed {streak} times in a row (last: {e:#})",
                        entry.name
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::tasks::{KEY_LAST_DISTRESS, KEY_LAST_PING};
    use crate::heartbeat::wake::{wake_channel, WakeReceiver};
    use crate::survival::CURRENT_TIER_KEY;
    use crate::testkit::TestRig;

    fn entry(name: &str, schedule: &str, task: &str, last_run: Option<&str>) -> HeartbeatEntry {
        HeartbeatEntry {
            name: name.to_string(),
            schedule: schedule.to_string(),
            task: task.to_string(),
            enabled: true,
            last_run: last_run.map(str::to_string),
        }
    }

    fn core_with_rig(rig: &TestRig) -> (Arc<DaemonCore>, WakeReceiver) {
        let (wake, wake_rx) = wake_channel();
        let core = Arc::new(DaemonCore {
            ctx: rig.ctx.clone(),
            wake,
            running: AtomicBool::new(true),
            tick_in_flight: AtomicBool::new(false),
            task_failures: Mutex::new(HashMap::new()),
            tick_failures: AtomicU32::new(0),
        });
        (core, wake_rx)
    }

    // ─── Due-ness ────────────────────────────────────────────────

    #[test]
    fn never_run_entry_is_due_immediately() {
        let e = entry("ping", "0 0 * * * *", "heartbeat_ping", None);
        let now = "2026-03-01T12:30:00Z".parse().unwrap();
        assert!(is_due(&e, now));
    }

    #[test]
    fn just_ran_hourly_entry_is_not_due_until_the_hour_passes() {
        let e = entry(
            "ping",
            "0 0 * * * *",
            "heartbeat_ping",
            Some("2026-03-01T12:00:00Z"),
        );
        let at_last_run = "2026-03-01T12:00:00Z".parse().unwrap();
        assert!(!is_due(&e, at_last_run));

        let one_hour_later = "2026-03-01T13:00:00Z".parse().unwrap();
        assert!(is_due(&e, one_hour_later));
    }

    #[test]
    fn disabled_and_unparseable_entries_are_never_due() {
        let now = "2026-03-01T12:30:00Z".parse().unwrap();

        let mut e = entry("ping", "0 0 * * * *", "heartbeat_ping", None);
        e.enabled = false;
        assert!(!is_due(&e, now));

        let bad = entry("ping", "not a cron line", "heartbeat_ping", None);
        assert!(!is_due(&bad, now));
    }

    // ─── Per-task failure streaks ────────────────────────────────

    #[tokio::test]
    async fn third_consecutive_task_failure_raises_one_wake() {
        let rig = TestRig::new();
        rig.chain.set_failing(true);
        let (core, mut wake_rx) = core_with_rig(&rig);

        let e = entry("usdc", "0 * * * * *", "check_usdc_balance", None);
        for _ in 0..2 {
            core.execute_entry(&e, TaskId::CheckUsdcBalance).await;
        }
        assert!(wake_rx.try_recv().is_err());

        core.execute_entry(&e, TaskId::CheckUsdcBalance).await;
        let reason = wake_rx.try_recv().expect("wake at the third failure");
        assert!(reason.contains("usdc"));
        assert!(reason.contains("3 times"));

        // Further failures past the threshold stay quiet until a reset.
        core.execute_entry(&e, TaskId::CheckUsdcBalance).await;
        assert!(wake_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn task_success_resets_the_failure_streak() {
        let rig = TestRig::new();
        let (core, mut wake_rx) = core_with_rig(&rig);
        let e = entry("usdc", "0 * * * * *", "check_usdc_balance", None);

        rig.chain.set_failing(true);
        core.execute_entry(&e, TaskId::CheckUsdcBalance).await;
        core.execute_entry(&e, TaskId::CheckUsdcBalance).await;

        rig.chain.set_failing(false);
        core.execute_entry(&e, TaskId::CheckUsdcBalance).await;

        // Streak restarted: one more failure is 1 of 3, not 3 of 3.
        rig.chain.set_failing(true);
        core.execute_entry(&e, TaskId::CheckUsdcBalance).await;
        assert!(wake_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_run_still_records_last_run() {
        let rig = TestRig::new();
        rig.chain.set_failing(true);
        let e = entry("usdc", "0 * * * * *", "check_usdc_balance", None);
        {
            let db = rig.ctx.db.lock().unwrap();
            db.upsert_heartbeat_entry(&e).unwrap();
        }
        let (core, _wake_rx) = core_with_rig(&rig);

        core.execute_entry(&e, TaskId::CheckUsdcBalance).await;

        let db = rig.ctx.db.lock().unwrap();
        let stored = db.get_heartbeat_entries().unwrap();
        assert!(stored[0].last_run.is_some());
    }

    // ─── Whole-tick failure streaks ──────────────────────────────

    #[tokio::test]
    async fn fifth_tick_failure_stops_the_daemon_with_one_wake() {
        let rig = TestRig::new();
        {
            // Break the orchestration itself, not an individual task.
            let db = rig.ctx.db.lock().unwrap();
            db.execute_raw("DROP TABLE heartbeat_entries").unwrap();
        }
        let (core, mut wake_rx) = core_with_rig(&rig);

        for _ in 0..4 {
            core.run_tick().await;
        }
        assert!(core.running.load(Ordering::SeqCst));
        assert!(wake_rx.try_recv().is_err());

        core.run_tick().await;
        assert!(!core.running.load(Ordering::SeqCst));
        let reason = wake_rx.try_recv().expect("wake when the daemon stops");
        assert!(reason.contains("stopped"));

        // A sixth tick never runs: the daemon is already stopped.
        core.run_tick().await;
        assert!(wake_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn successful_tick_resets_the_tick_failure_streak() {
        let rig = TestRig::new();
        let (core, mut wake_rx) = core_with_rig(&rig);

        // Tier bookkeeping requires the kv table; dropping it fails the
        // tick before any task runs.
        {
            let db = rig.ctx.db.lock().unwrap();
            db.execute_raw("ALTER TABLE kv RENAME TO kv_hidden").unwrap();
        }
        for _ in 0..4 {
            core.run_tick().await;
        }

        {
            let db = rig.ctx.db.lock().unwrap();
            db.execute_raw("ALTER TABLE kv_hidden RENAME TO kv").unwrap();
        }
        core.run_tick().await;
        assert_eq!(core.tick_failures.load(Ordering::SeqCst), 0);
        assert!(core.running.load(Ordering::SeqCst));
        assert!(wake_rx.try_recv().is_err());
    }

    // ─── Tier gating ─────────────────────────────────────────────

    #[tokio::test]
    async fn critical_tick_runs_essentials_only_and_raises_distress() {
        let rig = TestRig::new();
        rig.credits.set_balance(5);
        {
            let db = rig.ctx.db.lock().unwrap();
            db.upsert_heartbeat_entry(&entry("ping", "0 * * * * *", "heartbeat_ping", None))
                .unwrap();
            db.upsert_heartbeat_entry(&entry("health", "0 * * * * *", "health_check", None))
                .unwrap();
        }
        let (core, mut wake_rx) = core_with_rig(&rig);

        core.run_tick().await;

        // The non-essential health check was skipped without running.
        assert!(rig.sandbox.commands.lock().unwrap().is_empty());

        let db = rig.ctx.db.lock().unwrap();
        assert_eq!(
            db.get_kv(CURRENT_TIER_KEY).unwrap().as_deref(),
            Some("critical")
        );
        assert!(db.get_kv(KEY_LAST_PING).unwrap().is_some());
        assert!(db.get_kv(KEY_LAST_DISTRESS).unwrap().is_some());
        assert!(rig.inference.low_compute_enabled());

        let reason = wake_rx.try_recv().expect("distress wake");
        assert!(reason.contains("critical"));
    }

    #[tokio::test]
    async fn skipped_nonessential_entry_is_not_marked_failed() {
        let rig = TestRig::new();
        rig.credits.set_balance(5);
        {
            let db = rig.ctx.db.lock().unwrap();
            db.upsert_heartbeat_entry(&entry("health", "0 * * * * *", "health_check", None))
                .unwrap();
        }
        let (core, _wake_rx) = core_with_rig(&rig);

        core.run_tick().await;

        assert!(core.task_failures.lock().unwrap().is_empty());
        // Skipped, not attempted: last_run stays empty.
        let db = rig.ctx.db.lock().unwrap();
        assert!(db.get_heartbeat_entries().unwrap()[0].last_run.is_none());
    }

    #[tokio::test]
    async fn unknown_task_names_are_skipped_silently() {
        let rig = TestRig::new();
        {
            let db = rig.ctx.db.lock().unwrap();
            db.upsert_heartbeat_entry(&entry("stale", "0 * * * * *", "removed_builtin", None))
                .unwrap();
        }
        let (core, mut wake_rx) = core_with_rig(&rig);

        core.run_tick().await;

        assert_eq!(core.tick_failures.load(Ordering::SeqCst), 0);
        assert!(wake_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn balance_outage_restricts_this_tick_only() {
        let rig = TestRig::new();
        rig.credits.set_failing(true);
        let (core, _wake_rx) = core_with_rig(&rig);

        core.run_tick().await;
        {
            let db = rig.ctx.db.lock().unwrap();
            assert_eq!(
                db.get_kv(CURRENT_TIER_KEY).unwrap().as_deref(),
                Some("dead")
            );
        }
        // The outage is not a tick failure.
        assert_eq!(core.tick_failures.load(Ordering::SeqCst), 0);

        rig.credits.set_failing(false);
        rig.credits.set_balance(500);
        core.run_tick().await;
        let db = rig.ctx.db.lock().unwrap();
        assert_eq!(
            db.get_kv(CURRENT_TIER_KEY).unwrap().as_deref(),
            Some("normal")
        );
    }

    // ─── Daemon control surface ──────────────────────────────────

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let rig = TestRig::new();
        let (wake, _wake_rx) = wake_channel();
        let mut daemon = HeartbeatDaemon::new(
            rig.ctx.clone(),
            wake,
            HeartbeatDaemonOptions {
                tick_interval_secs: Some(3600),
                ..Default::default()
            },
        );

        assert!(!daemon.is_running());
        daemon.start();
        assert!(daemon.is_running());
        daemon.start();
        assert!(daemon.is_running());

        daemon.stop();
        assert!(!daemon.is_running());
        daemon.stop();
        assert!(!daemon.is_running());
    }

    #[tokio::test]
    async fn force_run_bypasses_the_schedule() {
        let rig = TestRig::new();
        {
            let db = rig.ctx.db.lock().unwrap();
            // Scheduled far in the future and just ran: not due.
            db.upsert_heartbeat_entry(&entry(
                "health",
                "0 0 0 1 1 *",
                "health_check",
                Some("2026-01-01T00:00:00Z"),
            ))
            .unwrap();
        }
        let (wake, _wake_rx) = wake_channel();
        let daemon = HeartbeatDaemon::new(rig.ctx.clone(), wake, HeartbeatDaemonOptions::default());

        let result = daemon.force_run("health").await.unwrap();
        assert!(!result.should_wake);
        assert_eq!(rig.sandbox.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn force_run_of_unknown_entry_errors() {
        let rig = TestRig::new();
        let (wake, _wake_rx) = wake_channel();
        let daemon = HeartbeatDaemon::new(rig.ctx.clone(), wake, HeartbeatDaemonOptions::default());

        assert!(daemon.force_run("nonexistent").await.is_err());
    }
}
