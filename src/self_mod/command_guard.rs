//! Command Guard
//!
//! Fixed table of forbidden shell-command patterns, checked before any
//! command reaches the sandbox. Defense-in-depth, not a sandboxing
//! guarantee: the table is compiled into the binary and is not reachable
//! through the tool surface it restricts, so the agent cannot edit its
//! own leash.

use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use tracing::warn;

use crate::types::{ExecResult, SandboxClient};

use super::GuardError;

/// Source patterns for the guard. Order matters only for the reported
/// reason; any match blocks.
static FORBIDDEN_COMMAND_PATTERNS: &[&str] = &[
    // Self-destruction
    r"rm\s+(-[rf]+\s+)?\S*\.vigil",
    r"rm\s+(-[rf]+\s+)?\S*state\.db",
    r"rm\s+(-[rf]+\s+)?\S*wallet\.json",
    r"rm\s+(-[rf]+\s+)?\S*identity\.json",
    r"rm\s+(-[rf]+\s+)?\S*vigil\.json",
    r"rm\s+(-[rf]+\s+)?\S*heartbeat\.yml",
    // Process killing
    r"kill\s+.*vigil",
    r"pkill\s+.*vigil",
    r"systemctl\s+(stop|disable)\s+vigil",
    // Database destruction
    r"(?i)DROP\s+TABLE",
    r"(?i)DELETE\s+FROM\s+(kv|heartbeat_entries|modifications|mode_transitions|inbox_messages|schema_version)",
    r"(?i)TRUNCATE",
    // Safety infrastructure modification via shell
    r"sed\s+.*self_mod/code",
    r"sed\s+.*self_mod/audit_log",
    r"sed\s+.*self_mod/command_guard",
    r">\s*\S*self_mod/code",
    r">\s*\S*self_mod/audit_log",
    r">\s*\S*self_mod/command_guard",
    // Credential harvesting
    r"cat\s+\S*\.ssh",
    r"cat\s+\S*\.gnupg",
    r"cat\s+\S*\.env",
    r"cat\s+\S*wallet\.json",
];

/// Compile the pattern table once. The source array is `static`, so the
/// compiled set cannot drift from what shipped.
fn compiled_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        FORBIDDEN_COMMAND_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("forbidden-command pattern must compile"))
            .collect()
    })
}

/// Check a command against the forbidden table.
///
/// Returns the structured rejection on a match; the command must not be
/// executed.
pub fn check_command(command: &str) -> std::result::Result<(), GuardError> {
    for pattern in compiled_patterns() {
        if pattern.is_match(command) {
            return Err(GuardError::CommandBlocked(format!(
                "matches self-harm pattern: {}",
                pattern.as_str()
            )));
        }
    }
    Ok(())
}

/// Run a command through the guard, then through the sandbox.
pub async fn guarded_exec(
    sandbox: &dyn SandboxClient,
    command: &str,
    timeout_ms: Option<u64>,
) -> Result<ExecResult> {
    if let Err(e) = check_command(command) {
        warn!("Blocked command: {command}");
        return Err(e.into());
    }
    sandbox.exec(command, timeout_ms).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MockSandboxClient;

    #[test]
    fn self_destruction_commands_are_blocked() {
        for cmd in [
            "rm -rf ~/.vigil",
            "rm /data/state.db",
            "rm -f ~/.vigil/wallet.json",
            "rm heartbeat.yml",
        ] {
            assert!(check_command(cmd).is_err(), "{cmd} should be blocked");
        }
    }

    #[test]
    fn process_and_database_attacks_are_blocked() {
        for cmd in [
            "pkill -9 vigil",
            "systemctl stop vigil",
            "sqlite3 state.db 'DROP TABLE modifications'",
            "sqlite3 state.db \"delete from kv\"",
        ] {
            assert!(check_command(cmd).is_err(), "{cmd} should be blocked");
        }
    }

    #[test]
    fn guard_sources_cannot_be_rewritten_via_shell() {
        for cmd in [
            "sed -i 's/blocked/allowed/' src/self_mod/command_guard.rs",
            "echo '' > src/self_mod/audit_log.rs",
            "cat /dev/null > src/self_mod/code.rs",
        ] {
            assert!(check_command(cmd).is_err(), "{cmd} should be blocked");
        }
    }

    #[test]
    fn credential_reads_are_blocked() {
        assert!(check_command("cat ~/.ssh/id_ed25519").is_err());
        assert!(check_command("cat .env").is_err());
        assert!(check_command("cat ~/.vigil/wallet.json").is_err());
    }

    #[test]
    fn ordinary_commands_pass() {
        for cmd in [
            "ls -la",
            "echo ok",
            "cargo build --release",
            "git status",
            "rm /tmp/scratch.txt",
        ] {
            assert!(check_command(cmd).is_ok(), "{cmd} should be allowed");
        }
    }

    #[tokio::test]
    async fn guarded_exec_never_reaches_the_sandbox_when_blocked() {
        let sandbox = MockSandboxClient::new();
        let result = guarded_exec(sandbox.as_ref(), "rm -rf ~/.vigil", None).await;
        assert!(result.is_err());
        assert!(sandbox.commands.lock().unwrap().is_empty());

        let result = guarded_exec(sandbox.as_ref(), "echo ok", None).await;
        assert!(result.is_ok());
        assert_eq!(sandbox.commands.lock().unwrap().len(), 1);
    }
}
