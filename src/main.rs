//! Vigil Runtime
//!
//! Entry point for the agent's operational core. Wires up the database,
//! the collaborator clients, and the heartbeat daemon, then waits on the
//! wake channel so the reasoning loop (or an operator watching the logs)
//! knows when something needs attention.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio::signal;
use tracing::{info, warn};

use vigil::config::{load_config, resolve_path};
use vigil::control::{ControlHttpClient, InferenceHttpClient};
use vigil::heartbeat::{
    load_heartbeat_config, sync_heartbeat_to_db, validate_entries, wake_channel,
    write_default_heartbeat_config, HeartbeatDaemon, HeartbeatDaemonOptions, TaskContext,
};
use vigil::self_mod::audit_log::generate_audit_report;
use vigil::self_mod::upstream::GitSourceControl;
use vigil::social::RelayClient;
use vigil::state::{shared, Database, SharedDatabase};
use vigil::survival::CURRENT_TIER_KEY;
use vigil::types::{AgentConfig, AgentIdentity, MessagingClient};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Vigil -- operational core for a self-funding agent
#[derive(Parser, Debug)]
#[command(
    name = "vigil",
    version = VERSION,
    about = "Operational core for a self-funding agent",
    long_about = "Heartbeat scheduler, survival tier engine, and self-modification guard. To exist, the agent must pay for its compute."
)]
struct Cli {
    /// Start the daemon and run until interrupted
    #[arg(long)]
    run: bool,

    /// Show current agent status
    #[arg(long)]
    status: bool,

    /// Run one named heartbeat task immediately, bypassing its schedule
    #[arg(long, value_name = "TASK")]
    force_run: Option<String>,

    /// Print the self-modification audit report
    #[arg(long)]
    audit: bool,

    /// Debug logging and a faster tick interval
    #[arg(long, short)]
    verbose: bool,
}

// ---- Wiring -----------------------------------------------------------------

struct Runtime {
    config: AgentConfig,
    db: SharedDatabase,
    ctx: TaskContext,
}

/// Open the database, sync the heartbeat schedule, and build the task
/// context over the real collaborator clients.
fn build_runtime() -> Result<Runtime> {
    let config = load_config().context(
        "Agent is not configured. Create ~/.vigil/vigil.json first (see README).",
    )?;

    let db_path = resolve_path(&config.db_path);
    let db = shared(Database::open(&db_path)?);

    let heartbeat_path = PathBuf::from(resolve_path(&config.heartbeat_config_path));
    write_default_heartbeat_config(&heartbeat_path)?;
    let heartbeat_config = load_heartbeat_config(&heartbeat_path)?;
    for warning in validate_entries(&heartbeat_config.entries) {
        warn!("{warning}");
    }
    {
        let db = db.lock().unwrap();
        sync_heartbeat_to_db(&heartbeat_config, &db)?;
    }

    let identity = AgentIdentity {
        name: config.name.clone(),
        address: config.wallet_address.clone(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let control = Arc::new(ControlHttpClient::new(
        config.control_api_url.clone(),
        config.control_api_key.clone(),
        config.sandbox_id.clone(),
    ));

    let inference = Arc::new(InferenceHttpClient::new(
        config.control_api_url.clone(),
        config.control_api_key.clone(),
        config.inference_model.clone(),
        config.max_tokens_per_turn,
    ));

    let messaging = config.relay_url.clone().map(|url| {
        Arc::new(RelayClient::new(url, config.wallet_address.clone())) as Arc<dyn MessagingClient>
    });

    let repo_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let source_control = Arc::new(GitSourceControl::new(repo_dir));

    let ctx = TaskContext {
        identity,
        version: config.version.clone(),
        db: db.clone(),
        credits: control.clone(),
        chain: control.clone(),
        inference,
        messaging,
        source_control,
        sandbox: control,
        started_at: Instant::now(),
    };

    Ok(Runtime { config, db, ctx })
}

// ---- Run --------------------------------------------------------------------

/// Start the daemon and consume wake requests until interrupted.
async fn run(verbose: bool) -> Result<()> {
    let runtime = build_runtime()?;
    info!(
        "Vigil v{VERSION} starting as '{}' ({})",
        runtime.config.name, runtime.config.wallet_address
    );

    let (wake_tx, mut wake_rx) = wake_channel();
    let mut daemon = HeartbeatDaemon::new(
        runtime.ctx,
        wake_tx,
        HeartbeatDaemonOptions {
            verbose,
            ..Default::default()
        },
    );
    daemon.start();

    let shutdown = async {
        let ctrl_c = signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to register SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("Failed to register Ctrl+C handler");
            info!("Received shutdown signal");
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            reason = wake_rx.recv() => {
                match reason {
                    Some(reason) => {
                        info!("Wake requested: {reason}");
                        let db = runtime.db.lock().unwrap();
                        if let Err(e) = db.set_kv("last_wake_reason", &reason) {
                            warn!("Failed to persist wake reason: {e:#}");
                        }
                    }
                    // All senders gone; the daemon has fully stopped.
                    None => break,
                }
            }
        }

        if !daemon.is_running() {
            warn!("Heartbeat daemon is no longer running; exiting");
            break;
        }
    }

    daemon.stop();
    Ok(())
}

// ---- Status -----------------------------------------------------------------

/// Display the current agent status from config and persisted state.
fn show_status() {
    let Some(config) = load_config() else {
        println!("Agent is not configured. Create ~/.vigil/vigil.json first.");
        return;
    };

    let db_path = resolve_path(&config.db_path);
    let tier = Database::open(&db_path)
        .ok()
        .and_then(|db| db.get_kv(CURRENT_TIER_KEY).ok().flatten())
        .unwrap_or_else(|| "unknown".to_string());

    let tier_colored = match tier.as_str() {
        "normal" => tier.green(),
        "low_compute" => tier.yellow(),
        "critical" | "dead" => tier.red(),
        _ => tier.normal(),
    };

    println!("{}", "=== VIGIL STATUS ===".bold());
    println!("Name:     {}", config.name);
    println!("Address:  {}", config.wallet_address);
    println!("Sandbox:  {}", config.sandbox_id);
    println!("DB Path:  {db_path}");
    println!("Model:    {}", config.inference_model);
    println!("Version:  {}", config.version);
    println!("Tier:     {tier_colored}");
    println!("{}", "====================".bold());
}

// ---- Entry Point ------------------------------------------------------------

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    if cli.status {
        show_status();
        return;
    }

    if cli.audit {
        let result = build_runtime().and_then(|runtime| {
            let db = runtime.db.lock().unwrap();
            generate_audit_report(&db)
        });
        match result {
            Ok(report) => println!("{report}"),
            Err(e) => {
                eprintln!("Audit report failed: {e:#}");
                std::process::exit(1);
            }
        }
        return;
    }

    if let Some(task_name) = cli.force_run {
        let result = async {
            let runtime = build_runtime()?;
            let (wake_tx, _wake_rx) = wake_channel();
            let daemon =
                HeartbeatDaemon::new(runtime.ctx, wake_tx, HeartbeatDaemonOptions::default());
            daemon.force_run(&task_name).await
        }
        .await;

        match result {
            Ok(outcome) => {
                println!(
                    "{}: {}",
                    if outcome.should_wake {
                        "WAKE".yellow().bold().to_string()
                    } else {
                        "OK".green().to_string()
                    },
                    outcome.message.as_deref().unwrap_or("(no message)")
                );
            }
            Err(e) => {
                eprintln!("Force run failed: {e:#}");
                std::process::exit(1);
            }
        }
        return;
    }

    if cli.run {
        if let Err(e) = run(cli.verbose).await {
            eprintln!("Fatal: {e:#}");
            std::process::exit(1);
        }
        return;
    }

    println!("Run \"vigil --help\" for usage information.");
    println!("Run \"vigil --run\" to start the agent core.");
}
