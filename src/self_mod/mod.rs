//! Self-Modification Module
//!
//! The policy layer deciding whether a proposed change to the agent's
//! own files or command surface is allowed, and the append-only audit
//! ledger recording every modification regardless of outcome. The agent
//! being restricted is also the one issuing commands, so everything here
//! is fixed at compile time and unreachable through the tool surface it
//! guards.

pub mod audit_log;
pub mod code;
pub mod command_guard;
pub mod upstream;

use code::ValidationReport;

/// A policy violation. Rejected synchronously with a structured reason;
/// never silently ignored and never retried.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("modification rejected: {reason}")]
    ModificationRejected {
        reason: String,
        report: ValidationReport,
    },

    #[error("command blocked: {0}")]
    CommandBlocked(String),
}
