//! Self-Modification Engine
//!
//! Rate-limited file editing with path validation and diff generation.
//! Protected files and directories cannot be modified regardless of the
//! content being written: a "safe-looking" edit to a protected file is
//! still an edit to a protected file. All edits are logged to the audit
//! trail, failed writes included.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::warn;

use crate::state::{Database, SharedDatabase};
use crate::types::{ModificationType, SandboxClient};

use super::audit_log::{log_modification, LogOptions};
use super::GuardError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// File names the agent must never modify, matched against the final
/// path component.
pub static PROTECTED_FILES: &[&str] = &[
    "wallet.json",
    "identity.json",
    "vigil.json",
    "state.db",
    ".env",
    ".env.local",
];

/// Path fragments that are off-limits regardless of file name: the
/// guard and audit sources themselves, and the wallet directory.
pub static PROTECTED_PATH_PATTERNS: &[&str] = &[
    "self_mod/code",
    "self_mod/audit_log",
    "self_mod/command_guard",
    ".vigil/wallet",
];

/// Directory patterns no modification may target.
pub static BLOCKED_DIRECTORY_PATTERNS: &[&str] =
    &[".git", "/target/", "/etc", "/usr", "/var", "/sys", "/proc"];

/// Maximum number of file modifications allowed per rolling hour.
pub const MAX_MODIFICATIONS_PER_HOUR: u32 = 20;

/// Maximum allowed size (bytes) for a single file write.
pub const MAX_MODIFICATION_SIZE: usize = 100_000;

/// Maximum diff string length stored in the audit log.
pub const MAX_DIFF_SIZE: usize = 10_000;

/// Check names, in the fixed order checks run and are reported.
pub const CHECK_PROTECTED_PATH: &str = "protected_path";
pub const CHECK_CONTENT_SIZE: &str = "content_size";
pub const CHECK_RATE_LIMIT: &str = "rate_limit";

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// One validation check's outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationCheck {
    pub name: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Full validation outcome. Every check is reported whether or not an
/// earlier one failed, so one response shows the whole picture.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub checks: Vec<ModificationCheck>,
}

/// Outcome of a successful `edit_file` call.
#[derive(Debug)]
pub struct EditResult {
    pub file_path: String,
    pub diff: String,
    pub modification_id: String,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Path checks
// ---------------------------------------------------------------------------

/// Returns `true` when `file_path`'s final component matches any entry
/// in [`PROTECTED_FILES`].
pub fn is_protected_file(file_path: &str) -> bool {
    let file_name = match std::path::Path::new(file_path).file_name() {
        Some(n) => n.to_string_lossy(),
        None => return false,
    };

    PROTECTED_FILES.iter().any(|&p| file_name == p)
}

/// Why a path is off-limits, if it is.
fn protected_path_violation(file_path: &str) -> Option<String> {
    if is_protected_file(file_path) {
        return Some(format!("'{file_path}' is a protected file"));
    }

    for pattern in PROTECTED_PATH_PATTERNS {
        if file_path.contains(pattern) {
            return Some(format!("'{file_path}' matches protected pattern '{pattern}'"));
        }
    }

    for pattern in BLOCKED_DIRECTORY_PATTERNS {
        if file_path.contains(pattern) {
            return Some(format!("'{file_path}' is inside blocked directory '{pattern}'"));
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Run all pre-flight checks for a proposed modification.
///
/// Checks run in a fixed order -- protected path, content size, rate
/// limit -- and all are reported regardless of early failure. The
/// protected-path check is content-blind by design.
pub fn validate_modification(
    db: &Database,
    file_path: &str,
    content_size: usize,
) -> ValidationReport {
    let mut checks = Vec::with_capacity(3);

    let path_violation = protected_path_violation(file_path);
    checks.push(ModificationCheck {
        name: CHECK_PROTECTED_PATH,
        passed: path_violation.is_none(),
        detail: path_violation,
    });

    let size_violation = if content_size == 0 {
        Some("zero-byte content (truncated generation?)".to_string())
    } else if content_size > MAX_MODIFICATION_SIZE {
        Some(format!(
            "{content_size} bytes exceeds the {MAX_MODIFICATION_SIZE} byte limit"
        ))
    } else {
        None
    };
    checks.push(ModificationCheck {
        name: CHECK_CONTENT_SIZE,
        passed: size_violation.is_none(),
        detail: size_violation,
    });

    let cutoff = (Utc::now() - Duration::hours(1)).to_rfc3339();
    let rate_check = match db.count_modifications_since(&cutoff) {
        Ok(count) if count < MAX_MODIFICATIONS_PER_HOUR => ModificationCheck {
            name: CHECK_RATE_LIMIT,
            passed: true,
            detail: Some(format!("{count} modification(s) in the last hour")),
        },
        Ok(count) => ModificationCheck {
            name: CHECK_RATE_LIMIT,
            passed: false,
            detail: Some(format!(
                "{count} modifications in the last hour (max {MAX_MODIFICATIONS_PER_HOUR})"
            )),
        },
        // An unreadable ledger fails closed: we cannot prove we are
        // under the limit.
        Err(e) => ModificationCheck {
            name: CHECK_RATE_LIMIT,
            passed: false,
            detail: Some(format!("could not count recent modifications: {e:#}")),
        },
    };
    checks.push(rate_check);

    let reason = checks
        .iter()
        .find(|c| !c.passed)
        .map(|c| format!("{}: {}", c.name, c.detail.as_deref().unwrap_or("failed")));

    ValidationReport {
        allowed: reason.is_none(),
        reason,
        checks,
    }
}

// ---------------------------------------------------------------------------
// File editing
// ---------------------------------------------------------------------------

/// Edit (or create) a file through the sandbox collaborator.
///
/// The proposal is validated first; a rejection surfaces as a
/// [`GuardError::ModificationRejected`] carrying the full report. Once
/// validation passes, the audit entry is appended whether or not the
/// write itself succeeds, with the outcome reflected in the entry's
/// description -- an audit trail that only records successes is not
/// trustworthy.
pub async fn edit_file(
    sandbox: &dyn SandboxClient,
    db: &SharedDatabase,
    file_path: &str,
    new_content: &str,
    description: &str,
) -> Result<EditResult> {
    let report = {
        let db = db.lock().unwrap();
        validate_modification(&db, file_path, new_content.len())
    };

    if !report.allowed {
        let reason = report
            .reason
            .clone()
            .unwrap_or_else(|| "validation failed".to_string());
        warn!("Rejected modification of {file_path}: {reason}");
        return Err(GuardError::ModificationRejected { reason, report }.into());
    }

    // Old content feeds the diff; a file that does not exist yet diffs
    // against empty.
    let old_content = sandbox.read_file(file_path).await.unwrap_or_default();

    let write_result = sandbox.write_file(file_path, new_content).await;

    let diff = generate_simple_diff(&old_content, new_content);
    let truncated_diff = if diff.len() > MAX_DIFF_SIZE {
        format!("{}...[truncated]", &diff[..MAX_DIFF_SIZE])
    } else {
        diff
    };

    let outcome_description = match &write_result {
        Ok(()) => description.to_string(),
        Err(e) => format!("{description} (write failed: {e:#})"),
    };

    let entry = {
        let db = db.lock().unwrap();
        log_modification(
            &db,
            ModificationType::CodeEdit,
            &outcome_description,
            LogOptions {
                file_path: Some(file_path.to_string()),
                diff: Some(truncated_diff.clone()),
                reversible: true,
            },
        )
    }
    .context("audit append failed for file edit")?;

    write_result.with_context(|| format!("failed to write {file_path}"))?;

    Ok(EditResult {
        file_path: file_path.to_string(),
        diff: truncated_diff,
        modification_id: entry.id,
        timestamp: entry.timestamp,
    })
}

// ---------------------------------------------------------------------------
// Diff generation
// ---------------------------------------------------------------------------

/// Produce a simple line-by-line diff between `old` and `new`.
///
/// Intentionally lightweight; equal lines are skipped.
pub fn generate_simple_diff(old: &str, new: &str) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let mut diff = String::new();
    let max = old_lines.len().max(new_lines.len());

    for i in 0..max {
        let old_line = old_lines.get(i).copied();
        let new_line = new_lines.get(i).copied();

        match (old_line, new_line) {
            (Some(o), Some(n)) if o != n => {
                diff.push_str(&format!("-{o}\n"));
                diff.push_str(&format!("+{n}\n"));
            }
            (Some(o), None) => {
                diff.push_str(&format!("-{o}\n"));
            }
            (None, Some(n)) => {
                diff.push_str(&format!("+{n}\n"));
            }
            _ => {}
        }
    }

    if diff.is_empty() {
        "(no changes)".to_string()
    } else {
        diff
    }
}
