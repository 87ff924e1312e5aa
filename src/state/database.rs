//! Agent Database
//!
//! SQLite-backed persistent state for the agent core.
//! Uses rusqlite for synchronous, single-process access.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;

use crate::types::{
    HeartbeatEntry, InboxMessage, ModeTransition, ModificationEntry, ModificationType,
    SurvivalTier,
};

use super::schema::{CREATE_TABLES, SCHEMA_VERSION};

/// The agent's SQLite database handle.
///
/// Holds the heartbeat schedule, the self-modification audit trail,
/// survival tier transition history, the inbox seen-set, and the
/// JSON-valued kv store for task snapshots.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `db_path` and apply the schema.
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create db directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database: {db_path}"))?;

        // WAL mode for better concurrent read performance.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::init(conn)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .context("failed to create tables")?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            params![SCHEMA_VERSION],
        )
        .context("failed to record schema version")?;
        Ok(Self { conn })
    }

    // ─── Key-Value Store ─────────────────────────────────────────

    pub fn get_kv(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(result)
    }

    pub fn set_kv(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_kv(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    // ─── Heartbeat ───────────────────────────────────────────────

    pub fn get_heartbeat_entries(&self) -> Result<Vec<HeartbeatEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, schedule, task, enabled, last_run FROM heartbeat_entries ORDER BY name",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(HeartbeatEntry {
                    name: row.get(0)?,
                    schedule: row.get(1)?,
                    task: row.get(2)?,
                    enabled: row.get::<_, i32>(3)? != 0,
                    last_run: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn upsert_heartbeat_entry(&self, entry: &HeartbeatEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO heartbeat_entries (name, schedule, task, enabled, last_run, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'), datetime('now'))
             ON CONFLICT(name) DO UPDATE SET
               schedule = excluded.schedule,
               task = excluded.task,
               enabled = excluded.enabled,
               last_run = COALESCE(excluded.last_run, heartbeat_entries.last_run),
               updated_at = excluded.updated_at",
            params![
                entry.name,
                entry.schedule,
                entry.task,
                entry.enabled as i32,
                entry.last_run,
            ],
        )?;
        Ok(())
    }

    pub fn update_heartbeat_last_run(&self, name: &str, timestamp: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE heartbeat_entries SET last_run = ?1, updated_at = datetime('now') WHERE name = ?2",
            params![timestamp, name],
        )?;
        Ok(())
    }

    /// Entries are disabled rather than deleted so the schedule keeps its
    /// audit continuity.
    pub fn set_heartbeat_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE heartbeat_entries SET enabled = ?1, updated_at = datetime('now') WHERE name = ?2",
            params![enabled as i32, name],
        )?;
        Ok(())
    }

    // ─── Modifications (append-only) ─────────────────────────────

    pub fn insert_modification(&self, modification: &ModificationEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO modifications (id, timestamp, type, description, file_path, diff, reversible)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                modification.id,
                modification.timestamp,
                modification.mod_type.as_str(),
                modification.description,
                modification.file_path,
                modification.diff,
                modification.reversible as i32,
            ],
        )?;
        Ok(())
    }

    /// Most recent `limit` modification entries, newest first. Entry ids
    /// are time-sortable, so the id is the tiebreaker within a timestamp.
    pub fn get_recent_modifications(&self, limit: i64) -> Result<Vec<ModificationEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, type, description, file_path, diff, reversible
             FROM modifications ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let mods = stmt
            .query_map(params![limit], |row| {
                let mod_type_str: String = row.get(2)?;
                Ok(ModificationEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    mod_type: ModificationType::from_marker(&mod_type_str)
                        .unwrap_or(ModificationType::CodeEdit),
                    description: row.get(3)?,
                    file_path: row.get(4)?,
                    diff: row.get(5)?,
                    reversible: row.get::<_, i32>(6)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(mods)
    }

    /// Count modifications recorded at or after the RFC 3339 `cutoff`.
    /// Drives the trailing-window rate limit.
    pub fn count_modifications_since(&self, cutoff: &str) -> Result<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM modifications WHERE timestamp >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    // ─── Mode Transitions ────────────────────────────────────────

    pub fn insert_mode_transition(&self, transition: &ModeTransition) -> Result<()> {
        self.conn.execute(
            "INSERT INTO mode_transitions (id, from_tier, to_tier, credits_cents, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                transition.id,
                transition.from_tier.as_str(),
                transition.to_tier.as_str(),
                transition.credits_cents,
                transition.transitioned_at,
            ],
        )?;
        Ok(())
    }

    /// Evict the oldest transitions so at most `keep` remain. Eviction is
    /// FIFO by insertion order (rowid), which is monotonic.
    pub fn prune_mode_transitions(&self, keep: u32) -> Result<()> {
        self.conn.execute(
            "DELETE FROM mode_transitions WHERE rowid NOT IN
               (SELECT rowid FROM mode_transitions ORDER BY rowid DESC LIMIT ?1)",
            params![keep],
        )?;
        Ok(())
    }

    /// Transitions newest first, up to `limit`.
    pub fn get_mode_transitions(&self, limit: i64) -> Result<Vec<ModeTransition>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, from_tier, to_tier, credits_cents, created_at
             FROM mode_transitions ORDER BY rowid DESC LIMIT ?1",
        )?;
        let transitions = stmt
            .query_map(params![limit], |row| {
                let from_str: String = row.get(1)?;
                let to_str: String = row.get(2)?;
                Ok(ModeTransition {
                    id: row.get(0)?,
                    from_tier: SurvivalTier::from_marker(&from_str).unwrap_or(SurvivalTier::Dead),
                    to_tier: SurvivalTier::from_marker(&to_str).unwrap_or(SurvivalTier::Dead),
                    credits_cents: row.get(3)?,
                    transitioned_at: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(transitions)
    }

    pub fn count_mode_transitions(&self) -> Result<u32> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM mode_transitions", [], |row| row.get(0))?;
        Ok(count as u32)
    }

    // ─── Inbox Messages ──────────────────────────────────────────

    /// Insert a message, deduplicating by message id. Returns `true` when
    /// the message was new, `false` when it had been seen before.
    pub fn insert_inbox_message(&self, msg: &InboxMessage) -> Result<bool> {
        let received_at = if msg.created_at.is_empty() {
            chrono::Utc::now().to_rfc3339()
        } else {
            msg.created_at.clone()
        };

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO inbox_messages (id, from_address, content, received_at, reply_to)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![msg.id, msg.from, msg.content, received_at, msg.reply_to],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_unprocessed_inbox_messages(&self, limit: i64) -> Result<Vec<InboxMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, from_address, content, received_at, reply_to
             FROM inbox_messages WHERE processed_at IS NULL ORDER BY received_at ASC LIMIT ?1",
        )?;
        let messages = stmt
            .query_map(params![limit], |row| {
                Ok(InboxMessage {
                    id: row.get(0)?,
                    from: row.get(1)?,
                    to: String::new(),
                    content: row.get(2)?,
                    created_at: row.get(3)?,
                    reply_to: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub fn mark_inbox_message_processed(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE inbox_messages SET processed_at = datetime('now') WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Run arbitrary SQL. Test-only: used to simulate storage damage.
    #[cfg(test)]
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // ─── Close ───────────────────────────────────────────────────

    /// Explicitly close the connection. Dropping the `Database` also
    /// closes it; this variant surfaces close errors.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| anyhow::anyhow!("failed to close database: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModificationType;

    fn test_entry(id: &str, ts: &str) -> ModificationEntry {
        ModificationEntry {
            id: id.to_string(),
            timestamp: ts.to_string(),
            mod_type: ModificationType::CodeEdit,
            description: format!("edit {id}"),
            file_path: None,
            diff: None,
            reversible: true,
        }
    }

    #[test]
    fn kv_roundtrip_and_delete() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_kv("missing").unwrap().is_none());

        db.set_kv("cursor", "abc").unwrap();
        assert_eq!(db.get_kv("cursor").unwrap().as_deref(), Some("abc"));

        db.set_kv("cursor", "def").unwrap();
        assert_eq!(db.get_kv("cursor").unwrap().as_deref(), Some("def"));

        db.delete_kv("cursor").unwrap();
        assert!(db.get_kv("cursor").unwrap().is_none());
    }

    #[test]
    fn heartbeat_upsert_preserves_last_run() {
        let db = Database::open_in_memory().unwrap();
        let mut entry = HeartbeatEntry {
            name: "ping".to_string(),
            schedule: "0 * * * * *".to_string(),
            task: "heartbeat_ping".to_string(),
            enabled: true,
            last_run: None,
        };
        db.upsert_heartbeat_entry(&entry).unwrap();
        db.update_heartbeat_last_run("ping", "2026-01-01T00:00:00Z")
            .unwrap();

        // Re-sync from config with no last_run; the stored one must survive.
        entry.schedule = "0 */5 * * * *".to_string();
        db.upsert_heartbeat_entry(&entry).unwrap();

        let entries = db.get_heartbeat_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].schedule, "0 */5 * * * *");
        assert_eq!(entries[0].last_run.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn modification_roundtrip_is_faithful() {
        let db = Database::open_in_memory().unwrap();
        let entry = ModificationEntry {
            id: "01890000-0000-7000-8000-000000000001".to_string(),
            timestamp: "2026-01-02T03:04:05Z".to_string(),
            mod_type: ModificationType::HeartbeatChange,
            description: "disabled check_for_updates".to_string(),
            file_path: Some("heartbeat.yml".to_string()),
            diff: Some("-enabled: true\n+enabled: false\n".to_string()),
            reversible: true,
        };
        db.insert_modification(&entry).unwrap();

        let read = db.get_recent_modifications(10).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].description, entry.description);
        assert_eq!(read[0].mod_type, entry.mod_type);
        assert_eq!(read[0].reversible, entry.reversible);
        assert_eq!(read[0].diff, entry.diff);
    }

    #[test]
    fn modification_retention_honors_limit_not_deletion() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..60 {
            db.insert_modification(&test_entry(
                &format!("id-{i:03}"),
                &format!("2026-01-01T00:00:{:02}Z", i % 60),
            ))
            .unwrap();
        }
        // A bounded read returns the newest, but nothing is ever deleted.
        assert_eq!(db.get_recent_modifications(50).unwrap().len(), 50);
        assert_eq!(db.get_recent_modifications(100).unwrap().len(), 60);
    }

    #[test]
    fn inbox_insert_deduplicates_by_id() {
        let db = Database::open_in_memory().unwrap();
        let msg = InboxMessage {
            id: "m-1".to_string(),
            from: "0xabc".to_string(),
            to: "0xdef".to_string(),
            content: "hello".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            reply_to: None,
        };
        assert!(db.insert_inbox_message(&msg).unwrap());
        assert!(!db.insert_inbox_message(&msg).unwrap());
        assert_eq!(db.get_unprocessed_inbox_messages(10).unwrap().len(), 1);

        db.mark_inbox_message_processed("m-1").unwrap();
        assert!(db.get_unprocessed_inbox_messages(10).unwrap().is_empty());
    }
}
