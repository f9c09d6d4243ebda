//! Session Storage - persisted session credentials
//!
//! One opaque blob per owning identity. The session layer owns the encoding;
//! this table only guarantees that a save is atomic and that a delete is final.

use redb::TableDefinition;

use crate::error::MailError;

use super::Storage;

/// Table for session credentials (key: owner address, value: serialized credential)
pub(crate) const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

impl Storage {
    /// Save the credential blob for `owner`, replacing any previous one
    pub fn save_session(&self, owner: &str, blob: &[u8]) -> Result<(), MailError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            table.insert(owner, blob)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the credential blob for `owner`
    pub fn load_session(&self, owner: &str) -> Result<Option<Vec<u8>>, MailError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;

        Ok(table.get(owner)?.map(|v| v.value().to_vec()))
    }

    /// Delete the credential blob for `owner`.
    ///
    /// Returns `Ok(())` even if no session was stored.
    pub fn delete_session(&self, owner: &str) -> Result<(), MailError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            table.remove(owner)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
