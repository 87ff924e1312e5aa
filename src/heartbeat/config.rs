//! Heartbeat Configuration
//!
//! YAML-based configuration for heartbeat entries. Provides default
//! entries for the built-in maintenance tasks and supports loading and
//! saving from disk with sync into the agent's SQLite schedule table.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use cron::Schedule;
use tracing::{debug, info, warn};
use yaml_rust2::{Yaml, YamlLoader};

use crate::self_mod::audit_log::{log_modification, LogOptions};
use crate::state::Database;
use crate::types::{HeartbeatConfig, HeartbeatEntry, ModificationType};

/// Default heartbeat configuration covering every built-in task.
pub const DEFAULT_HEARTBEAT_CONFIG: &str = r#"entries:
  - name: heartbeat_ping
    schedule: "0 */5 * * * *"
    task: heartbeat_ping
    enabled: true
  - name: check_credits
    schedule: "0 */15 * * * *"
    task: check_credits
    enabled: true
  - name: check_usdc_balance
    schedule: "0 */30 * * * *"
    task: check_usdc_balance
    enabled: true
  - name: check_social_inbox
    schedule: "0 */10 * * * *"
    task: check_social_inbox
    enabled: true
  - name: check_for_updates
    schedule: "0 0 */6 * * *"
    task: check_for_updates
    enabled: true
  - name: health_check
    schedule: "0 0 * * * *"
    task: health_check
    enabled: true
"#;

/// Parse a YAML document into a `HeartbeatConfig`.
fn parse_yaml_config(docs: &[Yaml]) -> Result<HeartbeatConfig> {
    let doc = docs.first().context("Empty YAML document")?;

    let entries_yaml = doc["entries"]
        .as_vec()
        .context("Missing or invalid 'entries' key in heartbeat config")?;

    let mut entries = Vec::with_capacity(entries_yaml.len());

    for item in entries_yaml {
        let name = item["name"]
            .as_str()
            .context("Missing 'name' in heartbeat entry")?
            .to_string();

        let schedule = item["schedule"]
            .as_str()
            .context("Missing 'schedule' in heartbeat entry")?
            .to_string();

        let task = item["task"]
            .as_str()
            .context("Missing 'task' in heartbeat entry")?
            .to_string();

        let enabled = item["enabled"].as_bool().unwrap_or(true);

        entries.push(HeartbeatEntry {
            name,
            schedule,
            task,
            enabled,
            last_run: None,
        });
    }

    Ok(HeartbeatConfig { entries })
}

/// Load heartbeat configuration from a YAML file at the given path.
///
/// Falls back to the default configuration if the file does not exist.
pub fn load_heartbeat_config(config_path: &Path) -> Result<HeartbeatConfig> {
    if !config_path.exists() {
        info!(
            "Heartbeat config not found at {}, using defaults",
            config_path.display()
        );
        let docs = YamlLoader::load_from_str(DEFAULT_HEARTBEAT_CONFIG)
            .context("Failed to parse default heartbeat config")?;
        return parse_yaml_config(&docs);
    }

    let contents = fs::read_to_string(config_path).with_context(|| {
        format!(
            "Failed to read heartbeat config from {}",
            config_path.display()
        )
    })?;

    let docs = YamlLoader::load_from_str(&contents)
        .with_context(|| format!("Failed to parse YAML from {}", config_path.display()))?;

    let config = parse_yaml_config(&docs)?;
    debug!(
        "Loaded {} heartbeat entries from {}",
        config.entries.len(),
        config_path.display()
    );
    Ok(config)
}

/// Save heartbeat configuration to a YAML file at the given path.
pub fn save_heartbeat_config(config: &HeartbeatConfig, config_path: &Path) -> Result<()> {
    let mut yaml_str = String::from("entries:\n");

    for entry in &config.entries {
        yaml_str.push_str(&format!("  - name: {}\n", entry.name));
        yaml_str.push_str(&format!("    schedule: \"{}\"\n", entry.schedule));
        yaml_str.push_str(&format!("    task: {}\n", entry.task));
        yaml_str.push_str(&format!("    enabled: {}\n", entry.enabled));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "Failed to create parent directory for {}",
                config_path.display()
            )
        })?;
    }

    fs::write(config_path, &yaml_str).with_context(|| {
        format!(
            "Failed to write heartbeat config to {}",
            config_path.display()
        )
    })?;

    info!("Saved heartbeat config to {}", config_path.display());
    Ok(())
}

/// Write the default heartbeat configuration to a file.
///
/// Will not overwrite an existing file.
pub fn write_default_heartbeat_config(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        warn!(
            "Heartbeat config already exists at {}, not overwriting",
            config_path.display()
        );
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "Failed to create parent directory for {}",
                config_path.display()
            )
        })?;
    }

    fs::write(config_path, DEFAULT_HEARTBEAT_CONFIG).with_context(|| {
        format!(
            "Failed to write default heartbeat config to {}",
            config_path.display()
        )
    })?;

    info!("Wrote default heartbeat config to {}", config_path.display());
    Ok(())
}

/// Synchronize heartbeat configuration entries into the database.
///
/// Inserts or updates each entry in the `heartbeat_entries` table.
/// Existing `last_run` values survive the sync.
pub fn sync_heartbeat_to_db(config: &HeartbeatConfig, db: &Database) -> Result<()> {
    for entry in &config.entries {
        db.upsert_heartbeat_entry(entry).with_context(|| {
            format!("Failed to sync heartbeat entry '{}' to database", entry.name)
        })?;
    }

    info!(
        "Synced {} heartbeat entries to database",
        config.entries.len()
    );
    Ok(())
}

/// Change an existing heartbeat entry's schedule and/or enabled flag.
///
/// The change is audit-logged as a heartbeat modification whether it
/// enables, disables, or reschedules. Disabling is how entries are
/// "removed"; nothing is ever deleted from the schedule table.
pub fn modify_heartbeat(
    db: &Database,
    name: &str,
    new_schedule: Option<&str>,
    enabled: Option<bool>,
    reason: &str,
) -> Result<HeartbeatEntry> {
    let mut entry = db
        .get_heartbeat_entries()?
        .into_iter()
        .find(|e| e.name == name)
        .with_context(|| format!("no heartbeat entry named '{name}'"))?;

    if let Some(schedule) = new_schedule {
        schedule
            .parse::<Schedule>()
            .with_context(|| format!("invalid cron schedule '{schedule}'"))?;
        entry.schedule = schedule.to_string();
    }
    if let Some(enabled) = enabled {
        entry.enabled = enabled;
    }

    db.upsert_heartbeat_entry(&entry)?;

    log_modification(
        db,
        ModificationType::HeartbeatChange,
        &format!(
            "Heartbeat '{}' updated (schedule: {}, enabled: {}): {reason}",
            entry.name, entry.schedule, entry.enabled
        ),
        LogOptions {
            reversible: true,
            ..Default::default()
        },
    )
    .context("failed to audit-log heartbeat change")?;

    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::tasks::{validate_entries, TaskId};

    fn default_entries() -> HeartbeatConfig {
        let docs = YamlLoader::load_from_str(DEFAULT_HEARTBEAT_CONFIG).unwrap();
        parse_yaml_config(&docs).unwrap()
    }

    #[test]
    fn default_config_covers_every_builtin_task() {
        let config = default_entries();
        assert_eq!(config.entries.len(), TaskId::ALL.len());
        assert!(validate_entries(&config.entries).is_empty());
        for entry in &config.entries {
            entry
                .schedule
                .parse::<Schedule>()
                .unwrap_or_else(|e| panic!("bad default schedule for {}: {e}", entry.name));
        }
    }

    #[test]
    fn config_survives_a_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.yml");

        let mut config = default_entries();
        config.entries[0].enabled = false;
        save_heartbeat_config(&config, &path).unwrap();

        let reloaded = load_heartbeat_config(&path).unwrap();
        assert_eq!(reloaded.entries.len(), config.entries.len());
        assert!(!reloaded.entries[0].enabled);
        assert_eq!(reloaded.entries[0].schedule, config.entries[0].schedule);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_heartbeat_config(&dir.path().join("absent.yml")).unwrap();
        assert_eq!(config.entries.len(), TaskId::ALL.len());
    }

    #[test]
    fn modify_heartbeat_disables_and_audits() {
        let db = Database::open_in_memory().unwrap();
        sync_heartbeat_to_db(&default_entries(), &db).unwrap();

        let entry =
            modify_heartbeat(&db, "health_check", None, Some(false), "too noisy").unwrap();
        assert!(!entry.enabled);

        let stored = db
            .get_heartbeat_entries()
            .unwrap()
            .into_iter()
            .find(|e| e.name == "health_check")
            .unwrap();
        assert!(!stored.enabled);

        let mods = db.get_recent_modifications(5).unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].mod_type, ModificationType::HeartbeatChange);
        assert!(mods[0].description.contains("health_check"));
    }

    #[test]
    fn modify_heartbeat_rejects_bad_schedules() {
        let db = Database::open_in_memory().unwrap();
        sync_heartbeat_to_db(&default_entries(), &db).unwrap();

        let result = modify_heartbeat(&db, "health_check", Some("whenever"), None, "test");
        assert!(result.is_err());
        // Nothing was logged for the rejected change.
        assert!(db.get_recent_modifications(5).unwrap().is_empty());
    }
}
