//! Self-Modification Audit Log
//!
//! Append-only ledger of every change the agent makes to itself.
//! Provides logging, querying, and report-generation facilities. The
//! append operation lives here and nowhere else; every other component
//! only reads.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;

use crate::state::Database;
use crate::types::{ModificationEntry, ModificationType};

/// Entries rendered by [`generate_audit_report`].
const REPORT_ENTRY_LIMIT: u32 = 50;

/// Optional fields when creating a new log entry.
#[derive(Debug, Default)]
pub struct LogOptions {
    pub file_path: Option<String>,
    pub diff: Option<String>,
    pub reversible: bool,
}

/// Record a modification in the audit log.
///
/// Ids are UUIDv7: globally unique and monotonically sortable, so the
/// ledger has a total order even within one timestamp. A failed append
/// propagates -- the audit trail is the system of record, and losing a
/// record must be at least as loud as the modification it described.
pub fn log_modification(
    db: &Database,
    mod_type: ModificationType,
    description: &str,
    options: LogOptions,
) -> Result<ModificationEntry> {
    let entry = ModificationEntry {
        id: Uuid::now_v7().to_string(),
        timestamp: Utc::now().to_rfc3339(),
        mod_type,
        description: description.to_string(),
        file_path: options.file_path,
        diff: options.diff,
        reversible: options.reversible,
    };

    db.insert_modification(&entry)
        .context("Failed to append audit log entry")?;

    Ok(entry)
}

/// Retrieve the most recent `limit` modification entries, newest first.
pub fn get_recent_modifications(db: &Database, limit: u32) -> Result<Vec<ModificationEntry>> {
    db.get_recent_modifications(i64::from(limit))
        .context("Failed to read audit log")
}

/// Generate a human-readable audit report summarising recent activity.
///
/// The report is a deterministic rendering of the most recent entries:
/// same ledger contents, same report.
pub fn generate_audit_report(db: &Database) -> Result<String> {
    let entries = get_recent_modifications(db, REPORT_ENTRY_LIMIT)?;

    if entries.is_empty() {
        return Ok("No modifications recorded.".to_string());
    }

    let mut report = String::from("=== Self-Modification Audit Report ===\n\n");
    report.push_str(&format!("Entries shown: {}\n\n", entries.len()));

    let mut type_counts: BTreeMap<&'static str, u32> = BTreeMap::new();
    for entry in &entries {
        *type_counts.entry(entry.mod_type.as_str()).or_insert(0) += 1;
    }

    report.push_str("Breakdown by type:\n");
    for (mod_type, count) in &type_counts {
        report.push_str(&format!("  {mod_type}: {count}\n"));
    }
    report.push('\n');

    report.push_str("Recent entries:\n");
    for entry in &entries {
        report.push_str(&format!(
            "  [{}] {} - {}\n",
            entry.timestamp,
            entry.mod_type.as_str(),
            entry.description,
        ));
        if let Some(ref path) = entry.file_path {
            report.push_str(&format!("    file: {path}\n"));
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_options_default_is_irreversible_and_empty() {
        let opts = LogOptions::default();
        assert!(opts.file_path.is_none());
        assert!(opts.diff.is_none());
        assert!(!opts.reversible);
    }

    #[test]
    fn logged_entry_roundtrips_byte_identical_fields() {
        let db = Database::open_in_memory().unwrap();
        let logged = log_modification(
            &db,
            ModificationType::PromptChange,
            "tightened the system prompt",
            LogOptions {
                file_path: Some("prompt.md".into()),
                diff: Some("-old\n+new\n".into()),
                reversible: true,
            },
        )
        .unwrap();

        let read = get_recent_modifications(&db, 10).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].id, logged.id);
        assert_eq!(read[0].description, "tightened the system prompt");
        assert_eq!(read[0].mod_type, ModificationType::PromptChange);
        assert!(read[0].reversible);
    }

    #[test]
    fn entry_ids_sort_in_append_order() {
        let db = Database::open_in_memory().unwrap();
        let ids: Vec<String> = (0..5)
            .map(|i| {
                log_modification(
                    &db,
                    ModificationType::CodeEdit,
                    &format!("edit {i}"),
                    LogOptions::default(),
                )
                .unwrap()
                .id
            })
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn report_is_deterministic_for_the_same_ledger() {
        let db = Database::open_in_memory().unwrap();
        for (i, mod_type) in [
            ModificationType::CodeEdit,
            ModificationType::ToolInstall,
            ModificationType::CodeEdit,
        ]
        .iter()
        .enumerate()
        {
            log_modification(&db, *mod_type, &format!("change {i}"), LogOptions::default())
                .unwrap();
        }

        let first = generate_audit_report(&db).unwrap();
        let second = generate_audit_report(&db).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("code_edit: 2"));
        assert!(first.contains("tool_install: 1"));
    }

    #[test]
    fn empty_ledger_reports_as_such() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(
            generate_audit_report(&db).unwrap(),
            "No modifications recorded."
        );
    }
}
