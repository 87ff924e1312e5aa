//! Agent Configuration
//!
//! Loads and saves the agent's configuration from `~/.vigil/vigil.json`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::types::{default_config, AgentConfig};

/// Config file name within the agent directory.
const CONFIG_FILENAME: &str = "vigil.json";

/// Returns the agent's state directory: `~/.vigil`.
pub fn get_agent_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".vigil")
}

/// Returns the full path to the agent config file.
pub fn get_config_path() -> PathBuf {
    get_agent_dir().join(CONFIG_FILENAME)
}

/// Load the agent config from the default location.
///
/// Returns `None` if the config file does not exist or cannot be parsed.
pub fn load_config() -> Option<AgentConfig> {
    load_config_from(&get_config_path())
}

/// Load the agent config from an explicit path, merging defaults for
/// any unset operational fields.
pub fn load_config_from(config_path: &Path) -> Option<AgentConfig> {
    if !config_path.exists() {
        return None;
    }

    let contents = fs::read_to_string(config_path).ok()?;
    let mut config: AgentConfig = serde_json::from_str(&contents).ok()?;

    let defaults = default_config();

    if config.control_api_url.is_empty() {
        config.control_api_url = defaults.control_api_url;
    }
    if config.inference_model.is_empty() {
        config.inference_model = defaults.inference_model;
    }
    if config.max_tokens_per_turn == 0 {
        config.max_tokens_per_turn = defaults.max_tokens_per_turn;
    }
    if config.heartbeat_config_path.is_empty() {
        config.heartbeat_config_path = defaults.heartbeat_config_path;
    }
    if config.db_path.is_empty() {
        config.db_path = defaults.db_path;
    }
    if config.version.is_empty() {
        config.version = defaults.version;
    }

    Some(config)
}

/// Save the agent config to the default location.
pub fn save_config(config: &AgentConfig) -> Result<()> {
    save_config_to(&get_agent_dir(), config)
}

/// Save the agent config into `dir`.
///
/// Creates the directory with mode 0o700 if needed. The config file is
/// written with mode 0o600 since it carries the API key.
pub fn save_config_to(dir: &Path, config: &AgentConfig) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).context("Failed to create agent directory")?;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }

    let config_path = dir.join(CONFIG_FILENAME);
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&config_path, &json).context("Failed to write config file")?;
    fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

/// Resolve a path that may start with `~` to an absolute path.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_expands_tilde() {
        let resolved = resolve_path("~/some/path");
        assert!(!resolved.starts_with('~'));
        assert!(resolved.ends_with("some/path"));
    }

    #[test]
    fn resolve_path_leaves_absolute_paths_alone() {
        let path = "/absolute/path/to/file";
        assert_eq!(resolve_path(path), path);
    }

    #[test]
    fn config_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = default_config();
        config.name = "test-agent".to_string();
        config.wallet_address = "0xABCD".to_string();
        config.control_api_key = "key-test".to_string();

        save_config_to(dir.path(), &config).unwrap();

        let loaded = load_config_from(&dir.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(loaded.name, "test-agent");
        assert_eq!(loaded.wallet_address, "0xABCD");
        assert_eq!(loaded.control_api_key, "key-test");
        assert_eq!(loaded.inference_model, "gpt-4o");
    }

    #[test]
    fn missing_operational_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(
            &path,
            r#"{
                "name": "sparse",
                "walletAddress": "0x1",
                "controlApiUrl": "",
                "controlApiKey": "k",
                "sandboxId": "sb-1",
                "inferenceModel": "",
                "maxTokensPerTurn": 0,
                "heartbeatConfigPath": "",
                "dbPath": "",
                "logLevel": "info",
                "version": ""
            }"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.control_api_url, "https://api.conway.tech");
        assert_eq!(config.inference_model, "gpt-4o");
        assert_eq!(config.max_tokens_per_turn, 4096);
        assert_eq!(config.db_path, "~/.vigil/state.db");
    }

    #[test]
    fn unparseable_config_is_none_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "not json at all").unwrap();
        assert!(load_config_from(&path).is_none());
    }
}
