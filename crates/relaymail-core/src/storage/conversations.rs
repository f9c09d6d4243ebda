//! Conversation Storage - metadata and sync watermarks
//!
//! Conversation metadata is stored as JSON so the persisted kind, member list
//! and last-record summary stay readable by external tooling. Watermarks are
//! plain `u64` cursors, one per conversation.

use redb::{ReadableTable, TableDefinition};

use crate::error::MailError;
use crate::types::{Conversation, ConversationId, ConversationSummary};

use super::Storage;

/// Table for conversation metadata (key: conversation id, value: JSON Conversation)
pub(crate) const CONVERSATIONS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("conversations");

/// Table for sync cursors (key: conversation id, value: watermark)
pub(crate) const WATERMARKS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("watermarks");

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Conversation Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Register or update conversation metadata.
    ///
    /// An existing last-record summary is kept when the incoming metadata has
    /// none, so refreshing membership never hides the newest message.
    pub fn register_conversation(&self, conversation: &Conversation) -> Result<(), MailError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(CONVERSATIONS_TABLE)?;
            let existing = match table.get(conversation.id.as_str())? {
                Some(v) => Some(serde_json::from_slice::<Conversation>(v.value())?),
                None => None,
            };

            let mut merged = conversation.clone();
            if let Some(existing) = existing {
                if merged.last_record.is_none() {
                    merged.last_record = existing.last_record;
                }
                merged.updated_at = merged.updated_at.max(existing.updated_at);
            }

            let data = serde_json::to_vec(&merged)?;
            table.insert(merged.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load conversation metadata.
    ///
    /// Returns `None` for conversations that were never registered, even when
    /// records for them exist.
    pub fn load_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, MailError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(CONVERSATIONS_TABLE)?;

        if let Some(data) = table.get(id.as_str())? {
            Ok(Some(serde_json::from_slice(data.value())?))
        } else {
            Ok(None)
        }
    }

    /// All registered conversations, most recently updated first
    pub fn list_registered_conversations(&self) -> Result<Vec<Conversation>, MailError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(CONVERSATIONS_TABLE)?;

        let mut conversations = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            conversations.push(serde_json::from_slice::<Conversation>(value.value())?);
        }
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        Ok(conversations)
    }

    /// Every known conversation with its records and unread count.
    ///
    /// Sorted by recency (newest activity first); conversations without
    /// records sort by their metadata update time.
    pub fn list_conversation_summaries(&self) -> Result<Vec<ConversationSummary>, MailError> {
        let mut summaries = Vec::new();
        for id in self.list_conversations()? {
            let conversation = self.load_conversation(&id)?;
            let records = self.list_by_conversation(&id)?;
            let unread = records.iter().filter(|r| !r.is_read).count();
            let last_activity = records
                .first()
                .map(|r| r.timestamp)
                .or_else(|| conversation.as_ref().map(|c| c.updated_at))
                .unwrap_or(0);
            summaries.push(ConversationSummary {
                id,
                conversation,
                records,
                unread,
                last_activity,
            });
        }
        summaries.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(summaries)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Watermark Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Persist the sync cursor for a conversation.
    ///
    /// The stored value never moves backwards; a lower watermark is ignored.
    pub fn save_watermark(&self, id: &ConversationId, watermark: u64) -> Result<(), MailError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(WATERMARKS_TABLE)?;
            let current = table.get(id.as_str())?.map(|v| v.value()).unwrap_or(0);
            if watermark > current {
                table.insert(id.as_str(), watermark)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the sync cursor, `None` before the first successful pull
    pub fn load_watermark(&self, id: &ConversationId) -> Result<Option<u64>, MailError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(WATERMARKS_TABLE)?;

        Ok(table.get(id.as_str())?.map(|v| v.value()))
    }
}
