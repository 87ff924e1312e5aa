//! Agent State Module
//!
//! SQLite-backed persistent state. The database is the single-writer
//! resource shared by the heartbeat daemon and whichever task it is
//! currently running.

mod database;
mod schema;

use std::sync::{Arc, Mutex};

pub use database::Database;
pub use schema::{CREATE_TABLES, SCHEMA_VERSION};

/// The shared single-writer handle handed to the daemon and tasks.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Wrap a freshly opened database in the shared handle.
pub fn shared(db: Database) -> SharedDatabase {
    Arc::new(Mutex::new(db))
}
