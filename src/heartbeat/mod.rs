//! Heartbeat Module
//!
//! Periodic task execution daemon for the agent. Runs scheduled checks,
//! pings, and maintenance tasks on cron schedules, escalating through
//! the wake channel when something needs the reasoning loop.

pub mod config;
pub mod daemon;
pub mod tasks;
pub mod wake;

pub use config::{
    load_heartbeat_config, modify_heartbeat, save_heartbeat_config, sync_heartbeat_to_db,
    write_default_heartbeat_config, DEFAULT_HEARTBEAT_CONFIG,
};
pub use daemon::{
    is_due, HeartbeatDaemon, HeartbeatDaemonOptions, TASK_FAILURE_WAKE_THRESHOLD,
    TICK_FAILURE_STOP_THRESHOLD, TICK_INTERVAL_SECS, VERBOSE_TICK_INTERVAL_SECS,
};
pub use tasks::{run_task, validate_entries, HeartbeatTaskResult, TaskContext, TaskId};
pub use wake::{wake_channel, WakeReceiver, WakeSender, WAKE_CHANNEL_CAPACITY};
