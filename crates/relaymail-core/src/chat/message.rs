//! Chat message types for display
//!
//! This module provides the [`ChatMessage`] struct which represents a stored
//! record with its sender resolved for rendering.

use serde::{Deserialize, Serialize};

use crate::aliases::AliasMap;
use crate::types::{shorten_address, Record, RecordId};

/// A decrypted chat message ready for display.
///
/// # Example
///
/// ```ignore
/// let message = ChatMessage::from_record(&record, &owner, &aliases);
/// println!("{} ({}): {}", message.display_sender(), message.relative_time(), message.content);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: RecordId,
    /// Sender address
    pub sender: String,
    /// Sender's alias (if known from the address book)
    pub sender_name: Option<String>,
    /// Message text, or the decryption-failure sentinel
    pub content: String,
    /// File names of attachments
    pub attachments: Vec<String>,
    /// Unix timestamp in milliseconds when the message was created
    pub timestamp: i64,
    /// Whether this message was sent by us
    pub is_mine: bool,
    pub is_read: bool,
    /// Sent locally and not yet confirmed by a pull
    pub is_pending: bool,
}

impl ChatMessage {
    /// Build the display form of `record` as seen by `owner`
    pub fn from_record(record: &Record, owner: &str, aliases: &AliasMap) -> Self {
        let mut attachments: Vec<String> = record
            .attachments
            .iter()
            .map(|a| a.file_name.clone())
            .collect();
        if attachments.is_empty() {
            if let Some(file) = record.payload.as_ref().and_then(|p| p.file.as_ref()) {
                attachments.push(file.name.clone());
            }
        }

        Self {
            id: record.id.clone(),
            sender: record.sender.clone(),
            sender_name: aliases.get(&record.sender.to_ascii_lowercase()).cloned(),
            content: record.text().to_string(),
            attachments,
            timestamp: record.timestamp,
            is_mine: record.is_from(owner),
            is_read: record.is_read,
            is_pending: record.id.is_pending(),
        }
    }

    /// Get the display name for the sender.
    ///
    /// Returns "You" for our own messages, the alias if known, otherwise the
    /// shortened address.
    pub fn display_sender(&self) -> String {
        if self.is_mine {
            return "You".to_string();
        }
        match self.sender_name {
            Some(ref name) => name.clone(),
            None => shorten_address(&self.sender),
        }
    }

    /// Format the timestamp relative to now.
    ///
    /// Returns strings like "Just now", "5m ago", "2h ago", "Yesterday", etc.
    pub fn relative_time(&self) -> String {
        relative_time(self.timestamp, chrono::Utc::now().timestamp_millis())
    }
}

/// Relative description of `timestamp` as seen at `now` (both unix ms)
pub fn relative_time(timestamp: i64, now: i64) -> String {
    let diff_secs = (now - timestamp) / 1000;

    if diff_secs < 60 {
        "Just now".to_string()
    } else if diff_secs < 3600 {
        format!("{}m ago", diff_secs / 60)
    } else if diff_secs < 86400 {
        format!("{}h ago", diff_secs / 3600)
    } else if diff_secs < 172800 {
        "Yesterday".to_string()
    } else {
        format!("{}d ago", diff_secs / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttachmentRef, ConversationId, DecryptedPayload};

    const ME: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
    const ALICE: &str = "0xaaaa00000000000000000000000000000000000000000000000000000000aaaa";

    fn record(id: &str, sender: &str) -> Record {
        Record {
            id: RecordId::new(id),
            conversation_id: ConversationId::new("0xc"),
            sender: sender.to_string(),
            timestamp: 1_705_123_456_789,
            ciphertext: vec![1],
            key_version: 1,
            attachments: Vec::new(),
            payload: Some(DecryptedPayload::text("Hello, world!")),
            is_read: false,
            digest: None,
            observed_at: 0,
        }
    }

    #[test]
    fn test_from_record_resolves_alias() {
        let mut aliases = AliasMap::new();
        aliases.insert(ALICE.to_string(), "Alice".to_string());

        let msg = ChatMessage::from_record(&record("0x01", ALICE), ME, &aliases);

        assert_eq!(msg.content, "Hello, world!");
        assert_eq!(msg.sender_name.as_deref(), Some("Alice"));
        assert_eq!(msg.display_sender(), "Alice");
        assert!(!msg.is_mine);
        assert!(!msg.is_pending);
    }

    #[test]
    fn test_display_sender_falls_back_to_short_address() {
        let msg = ChatMessage::from_record(&record("0x01", ALICE), ME, &AliasMap::new());
        assert_eq!(msg.display_sender(), "0xaaaa...aaaa");
    }

    #[test]
    fn test_own_pending_message() {
        let msg = ChatMessage::from_record(&record(RecordId::pending("d2").as_str(), ME), ME, &AliasMap::new());
        assert!(msg.is_mine);
        assert!(msg.is_pending);
        assert_eq!(msg.display_sender(), "You");
    }

    #[test]
    fn test_attachment_names() {
        let mut r = record("0x01", ALICE);
        r.attachments.push(AttachmentRef {
            blob_id: "blob".to_string(),
            file_name: "photo.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 10,
        });
        let msg = ChatMessage::from_record(&r, ME, &AliasMap::new());
        assert_eq!(msg.attachments, vec!["photo.png".to_string()]);
    }

    #[test]
    fn test_relative_time() {
        let now = 1_000_000_000_000;
        assert_eq!(relative_time(now - 30_000, now), "Just now");
        assert_eq!(relative_time(now - 5 * 60_000, now), "5m ago");
        assert_eq!(relative_time(now - 2 * 3_600_000, now), "2h ago");
        assert_eq!(relative_time(now - 25 * 3_600_000, now), "Yesterday");
        assert_eq!(relative_time(now - 3 * 86_400_000, now), "3d ago");
    }
}
