//! Record Storage - the local mirror of ledger messages
//!
//! Records live in one primary table keyed by record id, plus two index
//! tables maintained in the same transaction:
//! - by conversation: `(conversation_id, timestamp, record_id)`
//! - by time: `(timestamp, record_id) -> conversation_id`

use std::collections::BTreeSet;

use redb::{ReadableTable, Table, TableDefinition};

use crate::error::MailError;
use crate::types::{ConversationId, Conversation, Record, RecordId};

use super::conversations::{CONVERSATIONS_TABLE, WATERMARKS_TABLE};
use super::Storage;

/// Primary record table (key: record id, value: postcard-encoded Record)
pub(crate) const RECORDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Conversation index (key: (conversation id, timestamp, record id))
pub(crate) const RECORDS_BY_CONVERSATION: TableDefinition<(&str, i64, &str), ()> =
    TableDefinition::new("records_by_conversation");

/// Time index (key: (timestamp, record id), value: conversation id)
pub(crate) const RECORDS_BY_TIME: TableDefinition<(i64, &str), &str> =
    TableDefinition::new("records_by_time");

/// What an upsert did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The record was not present before
    Inserted,
    /// The record existed and its stored form changed
    Updated,
    /// The stored form is identical; nothing was written
    Unchanged,
}

impl UpsertOutcome {
    pub fn is_change(&self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

fn decode_record(bytes: &[u8]) -> Result<Record, MailError> {
    postcard::from_bytes(bytes).map_err(|e| MailError::Serialization(e.to_string()))
}

fn index_record(
    by_conversation: &mut Table<(&'static str, i64, &'static str), ()>,
    by_time: &mut Table<(i64, &'static str), &'static str>,
    record: &Record,
) -> Result<(), MailError> {
    by_conversation.insert(
        (
            record.conversation_id.as_str(),
            record.timestamp,
            record.id.as_str(),
        ),
        (),
    )?;
    by_time.insert(
        (record.timestamp, record.id.as_str()),
        record.conversation_id.as_str(),
    )?;
    Ok(())
}

fn unindex_record(
    by_conversation: &mut Table<(&'static str, i64, &'static str), ()>,
    by_time: &mut Table<(i64, &'static str), &'static str>,
    record: &Record,
) -> Result<(), MailError> {
    by_conversation.remove((
        record.conversation_id.as_str(),
        record.timestamp,
        record.id.as_str(),
    ))?;
    by_time.remove((record.timestamp, record.id.as_str()))?;
    Ok(())
}

/// Record ids of one conversation in ascending `(timestamp, id)` order
fn conversation_record_ids<T>(index: &T, conversation_id: &str) -> Result<Vec<String>, MailError>
where
    T: ReadableTable<(&'static str, i64, &'static str), ()>,
{
    let mut ids = Vec::new();
    for entry in index.range((conversation_id, i64::MIN, "")..)? {
        let (key, _) = entry?;
        let (conversation, _, record_id) = key.value();
        if conversation != conversation_id {
            break;
        }
        ids.push(record_id.to_string());
    }
    Ok(ids)
}

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Record Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert or overwrite a record by id.
    ///
    /// Local-only state of an existing copy (first observation time, read
    /// flag, a good cached payload) is preserved, so upserting the same record
    /// twice leaves the store exactly as a single upsert did. If the
    /// conversation is registered, its last-record summary is refreshed in the
    /// same transaction.
    pub fn upsert_record(&self, record: &Record) -> Result<UpsertOutcome, MailError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let outcome;
        {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let mut by_conversation = write_txn.open_table(RECORDS_BY_CONVERSATION)?;
            let mut by_time = write_txn.open_table(RECORDS_BY_TIME)?;

            let existing = match records.get(record.id.as_str())? {
                Some(v) => Some(decode_record(v.value())?),
                None => None,
            };

            let mut merged = record.clone();
            outcome = match &existing {
                Some(existing) => {
                    merged.merge_local_state(existing);
                    if &merged == existing {
                        UpsertOutcome::Unchanged
                    } else {
                        unindex_record(&mut by_conversation, &mut by_time, existing)?;
                        UpsertOutcome::Updated
                    }
                }
                None => UpsertOutcome::Inserted,
            };

            if outcome.is_change() {
                let serialized = postcard::to_allocvec(&merged)
                    .map_err(|e| MailError::Serialization(e.to_string()))?;
                records.insert(merged.id.as_str(), serialized.as_slice())?;
                index_record(&mut by_conversation, &mut by_time, &merged)?;

                let mut conversations = write_txn.open_table(CONVERSATIONS_TABLE)?;
                let registered = match conversations.get(merged.conversation_id.as_str())? {
                    Some(v) => Some(serde_json::from_slice::<Conversation>(v.value())?),
                    None => None,
                };
                if let Some(mut conversation) = registered {
                    conversation.observe(&merged);
                    let data = serde_json::to_vec(&conversation)?;
                    conversations.insert(conversation.id.as_str(), data.as_slice())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Load a single record by id.
    ///
    /// Returns `None` if no record with the given id exists.
    pub fn get_record(&self, id: &RecordId) -> Result<Option<Record>, MailError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        match table.get(id.as_str())? {
            Some(v) => Ok(Some(decode_record(v.value())?)),
            None => Ok(None),
        }
    }

    /// Delete a record and its index entries.
    ///
    /// Returns the removed record, or `None` if it did not exist.
    pub fn remove_record(&self, id: &RecordId) -> Result<Option<Record>, MailError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let removed;
        {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let mut by_conversation = write_txn.open_table(RECORDS_BY_CONVERSATION)?;
            let mut by_time = write_txn.open_table(RECORDS_BY_TIME)?;

            removed = match records.remove(id.as_str())? {
                Some(v) => Some(decode_record(v.value())?),
                None => None,
            };

            if let Some(record) = &removed {
                unindex_record(&mut by_conversation, &mut by_time, record)?;

                let mut conversations = write_txn.open_table(CONVERSATIONS_TABLE)?;
                let registered = match conversations.get(record.conversation_id.as_str())? {
                    Some(v) => Some(serde_json::from_slice::<Conversation>(v.value())?),
                    None => None,
                };
                if let Some(mut conversation) = registered {
                    let points_at_removed = conversation
                        .last_record
                        .as_ref()
                        .map(|s| s.record_id == record.id)
                        .unwrap_or(false);
                    if points_at_removed {
                        conversation.last_record = None;
                        let ids =
                            conversation_record_ids(&by_conversation, conversation.id.as_str())?;
                        if let Some(newest_id) = ids.last() {
                            if let Some(v) = records.get(newest_id.as_str())? {
                                conversation.observe(&decode_record(v.value())?);
                            }
                        }
                        let data = serde_json::to_vec(&conversation)?;
                        conversations.insert(conversation.id.as_str(), data.as_slice())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    /// List a conversation's records, newest first.
    ///
    /// Ordering is by descending remote timestamp; equal timestamps are
    /// ordered by descending record id, so the order is stable no matter in
    /// which order the records arrived.
    pub fn list_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Record>, MailError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let index = read_txn.open_table(RECORDS_BY_CONVERSATION)?;
        let records = read_txn.open_table(RECORDS_TABLE)?;

        let ids = conversation_record_ids(&index, conversation_id.as_str())?;
        let mut result = Vec::with_capacity(ids.len());
        for id in ids.iter().rev() {
            if let Some(v) = records.get(id.as_str())? {
                result.push(decode_record(v.value())?);
            }
        }
        Ok(result)
    }

    /// List every conversation id that has at least one record or was
    /// explicitly registered (e.g. a new contact with no history yet).
    pub fn list_conversations(&self) -> Result<Vec<ConversationId>, MailError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let index = read_txn.open_table(RECORDS_BY_CONVERSATION)?;
        let conversations = read_txn.open_table(CONVERSATIONS_TABLE)?;

        let mut ids = BTreeSet::new();
        for entry in conversations.iter()? {
            let (key, _) = entry?;
            ids.insert(key.value().to_string());
        }
        for entry in index.iter()? {
            let (key, _) = entry?;
            let (conversation, _, _) = key.value();
            ids.insert(conversation.to_string());
        }

        Ok(ids.into_iter().map(ConversationId::new).collect())
    }

    /// Mark a record as read.
    ///
    /// Returns `false` if the record does not exist.
    pub fn mark_read(&self, id: &RecordId) -> Result<bool, MailError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let found;
        {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let existing = match records.get(id.as_str())? {
                Some(v) => Some(decode_record(v.value())?),
                None => None,
            };
            found = existing.is_some();
            if let Some(mut record) = existing {
                if !record.is_read {
                    record.is_read = true;
                    let serialized = postcard::to_allocvec(&record)
                        .map_err(|e| MailError::Serialization(e.to_string()))?;
                    records.insert(id.as_str(), serialized.as_slice())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(found)
    }

    /// Mark every record of a conversation as read, returning how many flipped
    pub fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<usize, MailError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let mut flipped = 0;
        {
            let index = write_txn.open_table(RECORDS_BY_CONVERSATION)?;
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            for id in conversation_record_ids(&index, conversation_id.as_str())? {
                let existing = match records.get(id.as_str())? {
                    Some(v) => Some(decode_record(v.value())?),
                    None => None,
                };
                if let Some(mut record) = existing.filter(|r| !r.is_read) {
                    record.is_read = true;
                    let serialized = postcard::to_allocvec(&record)
                        .map_err(|e| MailError::Serialization(e.to_string()))?;
                    records.insert(id.as_str(), serialized.as_slice())?;
                    flipped += 1;
                }
            }
        }
        write_txn.commit()?;
        Ok(flipped)
    }

    /// Most recent records across all conversations, newest first
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Record>, MailError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let by_time = read_txn.open_table(RECORDS_BY_TIME)?;
        let records = read_txn.open_table(RECORDS_TABLE)?;

        let mut result = Vec::new();
        for entry in by_time.iter()?.rev().take(limit) {
            let (key, _) = entry?;
            let (_, record_id) = key.value();
            if let Some(v) = records.get(record_id)? {
                result.push(decode_record(v.value())?);
            }
        }
        Ok(result)
    }

    /// Number of unread records in a conversation
    pub fn unread_count(&self, conversation_id: &ConversationId) -> Result<usize, MailError> {
        Ok(self
            .list_by_conversation(conversation_id)?
            .iter()
            .filter(|r| !r.is_read)
            .count())
    }

    /// Remove every record and index entry. Conversations and watermarks stay.
    pub fn clear_records(&self) -> Result<(), MailError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            write_txn.delete_table(RECORDS_TABLE)?;
            write_txn.delete_table(RECORDS_BY_CONVERSATION)?;
            write_txn.delete_table(RECORDS_BY_TIME)?;
            let _ = write_txn.open_table(RECORDS_TABLE)?;
            let _ = write_txn.open_table(RECORDS_BY_CONVERSATION)?;
            let _ = write_txn.open_table(RECORDS_BY_TIME)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Drop a conversation with its metadata, watermark and records.
    ///
    /// Returns the number of records removed.
    pub fn forget_conversation(&self, id: &ConversationId) -> Result<usize, MailError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let removed;
        {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let mut by_conversation = write_txn.open_table(RECORDS_BY_CONVERSATION)?;
            let mut by_time = write_txn.open_table(RECORDS_BY_TIME)?;

            let ids = conversation_record_ids(&by_conversation, id.as_str())?;
            removed = ids.len();
            for record_id in ids {
                let record = match records.remove(record_id.as_str())? {
                    Some(v) => decode_record(v.value())?,
                    None => continue,
                };
                unindex_record(&mut by_conversation, &mut by_time, &record)?;
            }

            let mut conversations = write_txn.open_table(CONVERSATIONS_TABLE)?;
            conversations.remove(id.as_str())?;
            let mut watermarks = write_txn.open_table(WATERMARKS_TABLE)?;
            watermarks.remove(id.as_str())?;
        }
        write_txn.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationKind, DecryptedPayload};
    use tempfile::tempdir;

    fn create_test_storage() -> (Storage, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.redb")).unwrap();
        (storage, dir)
    }

    fn record(id: &str, conversation: &str, timestamp: i64) -> Record {
        Record {
            id: RecordId::new(id),
            conversation_id: ConversationId::new(conversation),
            sender: "0xsender".to_string(),
            timestamp,
            ciphertext: id.as_bytes().to_vec(),
            key_version: 0,
            attachments: Vec::new(),
            payload: Some(DecryptedPayload::text(format!("text of {}", id))),
            is_read: false,
            digest: None,
            observed_at: 1,
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (storage, _dir) = create_test_storage();
        let r = record("r1", "c1", 100);

        assert_eq!(storage.upsert_record(&r).unwrap(), UpsertOutcome::Inserted);
        let after_first = storage.list_by_conversation(&r.conversation_id).unwrap();

        assert_eq!(storage.upsert_record(&r).unwrap(), UpsertOutcome::Unchanged);
        let after_second = storage.list_by_conversation(&r.conversation_id).unwrap();

        assert_eq!(after_first, after_second);
        assert_eq!(storage.list_recent(10).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_preserves_read_flag() {
        let (storage, _dir) = create_test_storage();
        let r = record("r1", "c1", 100);
        storage.upsert_record(&r).unwrap();
        assert!(storage.mark_read(&r.id).unwrap());

        // Re-pulled copy arrives unread; local flag wins
        assert_eq!(storage.upsert_record(&r).unwrap(), UpsertOutcome::Unchanged);
        assert!(storage.get_record(&r.id).unwrap().unwrap().is_read);
    }

    #[test]
    fn test_list_by_conversation_newest_first_with_tie_break() {
        let (storage, _dir) = create_test_storage();
        for r in [
            record("b", "c1", 200),
            record("a", "c1", 300),
            record("d", "c1", 200),
            record("c", "c1", 100),
            record("x", "c2", 999),
        ] {
            storage.upsert_record(&r).unwrap();
        }

        let ids: Vec<String> = storage
            .list_by_conversation(&ConversationId::new("c1"))
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "d", "b", "c"]);
    }

    #[test]
    fn test_timestamp_change_reindexes() {
        let (storage, _dir) = create_test_storage();
        let mut r = record("r1", "c1", 100);
        storage.upsert_record(&r).unwrap();
        storage.upsert_record(&record("r2", "c1", 150)).unwrap();

        r.timestamp = 200;
        assert_eq!(storage.upsert_record(&r).unwrap(), UpsertOutcome::Updated);

        let list = storage.list_by_conversation(&r.conversation_id).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id.as_str(), "r1");
    }

    #[test]
    fn test_remove_record() {
        let (storage, _dir) = create_test_storage();
        let r = record("r1", "c1", 100);
        storage.upsert_record(&r).unwrap();

        let removed = storage.remove_record(&r.id).unwrap();
        assert_eq!(removed.map(|r| r.id), Some(RecordId::new("r1")));
        assert!(storage.get_record(&r.id).unwrap().is_none());
        assert!(storage.list_conversations().unwrap().is_empty());
        assert!(storage.list_recent(5).unwrap().is_empty());

        assert!(storage.remove_record(&r.id).unwrap().is_none());
    }

    #[test]
    fn test_mark_read_missing_record() {
        let (storage, _dir) = create_test_storage();
        assert!(!storage.mark_read(&RecordId::new("nope")).unwrap());
    }

    #[test]
    fn test_list_conversations_includes_registered_empty() {
        let (storage, _dir) = create_test_storage();
        storage.upsert_record(&record("r1", "c-with-history", 100)).unwrap();
        let friend = Conversation::new(
            ConversationId::new("c-new-friend"),
            ConversationKind::Direct,
            vec!["0xme".to_string(), "0xfriend".to_string()],
            0,
        )
        .unwrap();
        storage.register_conversation(&friend).unwrap();

        let ids = storage.list_conversations().unwrap();
        assert_eq!(
            ids,
            vec![
                ConversationId::new("c-new-friend"),
                ConversationId::new("c-with-history")
            ]
        );
        assert!(storage
            .list_by_conversation(&ConversationId::new("c-new-friend"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_summary_tracks_newest_and_survives_removal() {
        let (storage, _dir) = create_test_storage();
        let convo = Conversation::new(
            ConversationId::new("c1"),
            ConversationKind::Group,
            vec!["0xa".into(), "0xb".into(), "0xc".into()],
            0,
        )
        .unwrap();
        storage.register_conversation(&convo).unwrap();
        storage.upsert_record(&record("old", "c1", 100)).unwrap();
        storage.upsert_record(&record("new", "c1", 200)).unwrap();

        let loaded = storage.load_conversation(&convo.id).unwrap().unwrap();
        assert_eq!(loaded.last_record.unwrap().record_id.as_str(), "new");

        storage.remove_record(&RecordId::new("new")).unwrap();
        let loaded = storage.load_conversation(&convo.id).unwrap().unwrap();
        assert_eq!(loaded.last_record.unwrap().record_id.as_str(), "old");
    }

    #[test]
    fn test_mark_conversation_read_and_unread_count() {
        let (storage, _dir) = create_test_storage();
        storage.upsert_record(&record("r1", "c1", 100)).unwrap();
        storage.upsert_record(&record("r2", "c1", 200)).unwrap();
        let cid = ConversationId::new("c1");

        assert_eq!(storage.unread_count(&cid).unwrap(), 2);
        assert_eq!(storage.mark_conversation_read(&cid).unwrap(), 2);
        assert_eq!(storage.unread_count(&cid).unwrap(), 0);
        assert_eq!(storage.mark_conversation_read(&cid).unwrap(), 0);
    }

    #[test]
    fn test_clear_records() {
        let (storage, _dir) = create_test_storage();
        storage.upsert_record(&record("r1", "c1", 100)).unwrap();
        storage.clear_records().unwrap();
        assert!(storage.list_recent(10).unwrap().is_empty());
        assert!(storage.get_record(&RecordId::new("r1")).unwrap().is_none());
    }

    #[test]
    fn test_forget_conversation_leaves_others() {
        let (storage, _dir) = create_test_storage();
        let gone = ConversationId::new("c-gone");
        let kept = ConversationId::new("c-kept");
        let convo = Conversation::new(
            gone.clone(),
            ConversationKind::Direct,
            vec!["0xme".to_string(), "0xfriend".to_string()],
            0,
        )
        .unwrap();
        storage.register_conversation(&convo).unwrap();
        storage.save_watermark(&gone, 7).unwrap();
        storage.upsert_record(&record("r1", "c-gone", 100)).unwrap();
        storage.upsert_record(&record("r2", "c-gone", 200)).unwrap();
        storage.upsert_record(&record("r3", "c-kept", 150)).unwrap();

        assert_eq!(storage.forget_conversation(&gone).unwrap(), 2);

        assert_eq!(storage.list_conversations().unwrap(), vec![kept.clone()]);
        assert!(storage.load_conversation(&gone).unwrap().is_none());
        assert_eq!(storage.load_watermark(&gone).unwrap(), None);
        assert!(storage.get_record(&RecordId::new("r1")).unwrap().is_none());
        let recent: Vec<RecordId> = storage.list_recent(10).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(recent, vec![RecordId::new("r3")]);

        assert_eq!(storage.forget_conversation(&gone).unwrap(), 0);
    }
}
