//! Alias Storage - address book maps
//!
//! Each owning identity has its own address -> display-name map, stored as a
//! single JSON object so a whole directory is loaded and saved atomically.

use std::collections::BTreeMap;

use redb::TableDefinition;

use crate::error::MailError;

use super::Storage;

/// Table for alias maps (key: owner address, value: JSON object)
pub(crate) const ALIASES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("aliases");

impl Storage {
    /// Replace the whole alias map of `owner`
    pub fn save_aliases(
        &self,
        owner: &str,
        aliases: &BTreeMap<String, String>,
    ) -> Result<(), MailError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(ALIASES_TABLE)?;
            let data = serde_json::to_vec(aliases)?;
            table.insert(owner, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the alias map of `owner`, empty if none was saved
    pub fn load_aliases(&self, owner: &str) -> Result<BTreeMap<String, String>, MailError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(ALIASES_TABLE)?;

        match table.get(owner)? {
            Some(data) => Ok(serde_json::from_slice(data.value())?),
            None => Ok(BTreeMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_alias_maps_are_per_owner() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.redb")).unwrap();

        let mut map = BTreeMap::new();
        map.insert("0xfriend".to_string(), "Alice".to_string());
        storage.save_aliases("0xme", &map).unwrap();

        assert_eq!(storage.load_aliases("0xme").unwrap(), map);
        assert!(storage.load_aliases("0xother").unwrap().is_empty());
    }
}
