//! Persistent storage using redb.
//!
//! This module provides ACID-compliant storage for:
//! - Message records, indexed by conversation and by time
//! - Conversation metadata (kind, members, key version, last-record summary)
//! - Per-conversation sync watermarks
//! - Session credentials (one blob per owning identity)
//! - Alias maps (one blob per owning identity)
//!
//! Every public operation runs inside a single redb transaction, so callers
//! never observe a half-applied write. redb serializes write transactions,
//! which makes concurrent writes to the same key last-writer-wins.

use crate::error::MailError;
use parking_lot::RwLock;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

// Submodules
mod aliases;
mod conversations;
mod records;
mod sessions;

use aliases::ALIASES_TABLE;
use conversations::{CONVERSATIONS_TABLE, WATERMARKS_TABLE};
use records::{RECORDS_BY_CONVERSATION, RECORDS_BY_TIME, RECORDS_TABLE};
use sessions::SESSIONS_TABLE;

pub use records::UpsertOutcome;

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> Result<Self, MailError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RECORDS_TABLE)?;
            let _ = write_txn.open_table(RECORDS_BY_CONVERSATION)?;
            let _ = write_txn.open_table(RECORDS_BY_TIME)?;
            let _ = write_txn.open_table(CONVERSATIONS_TABLE)?;
            let _ = write_txn.open_table(WATERMARKS_TABLE)?;
            let _ = write_txn.open_table(SESSIONS_TABLE)?;
            let _ = write_txn.open_table(ALIASES_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Get a reference to the shared database handle
    pub fn db_handle(&self) -> Arc<RwLock<Database>> {
        self.db.clone()
    }
}
