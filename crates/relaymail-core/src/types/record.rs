//! Message records as mirrored from the ledger
//!
//! A [`Record`] is the local copy of one encrypted message. The ciphertext is
//! authoritative; the [`DecryptedPayload`] is derived once and cached next to
//! it so the conversation view never has to decrypt twice.

use serde::{Deserialize, Serialize};

use super::{ConversationId, RecordId};

/// Text stored in place of a payload that could not be decrypted
pub const DECRYPTION_FAILED_TEXT: &str = "[Decryption Failed]";

/// Metadata of a file attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Decrypted message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedPayload {
    pub text: String,
    pub file: Option<FileMeta>,
    /// Set only on the sentinel; a message whose text happens to match
    /// [`DECRYPTION_FAILED_TEXT`] is still a real payload
    #[serde(default)]
    pub failed: bool,
}

impl DecryptedPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file: None,
            failed: false,
        }
    }

    /// The sentinel payload for a record whose ciphertext could not be opened
    pub fn decryption_failed() -> Self {
        Self {
            failed: true,
            ..Self::text(DECRYPTION_FAILED_TEXT)
        }
    }

    pub fn is_decryption_failure(&self) -> bool {
        self.failed
    }
}

/// Reference to an attachment held in blob storage.
///
/// Content is fetched on demand through [`crate::ledger::BlobReader`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub blob_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// A file picked for sending, before it is sealed and uploaded
#[derive(Clone, PartialEq, Eq)]
pub struct OutgoingAttachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl OutgoingAttachment {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn meta(&self) -> FileMeta {
        FileMeta {
            name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.data.len() as u64,
        }
    }
}

impl std::fmt::Debug for OutgoingAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingAttachment")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Ledger-assigned id, stable across re-sync
    pub id: RecordId,
    pub conversation_id: ConversationId,
    /// Sender address
    pub sender: String,
    /// Remote-assigned creation time (unix ms)
    pub timestamp: i64,
    /// Opaque encrypted payload
    pub ciphertext: Vec<u8>,
    /// Encryption key version the ciphertext was sealed under
    pub key_version: u64,
    pub attachments: Vec<AttachmentRef>,
    /// Derived payload, `None` until decryption was attempted
    pub payload: Option<DecryptedPayload>,
    pub is_read: bool,
    /// Digest of the transaction that produced this record, when known
    pub digest: Option<String>,
    /// Local time (unix ms) this record was first observed; never synced
    pub observed_at: i64,
}

impl Record {
    /// Display text; empty until a payload is attached
    pub fn text(&self) -> &str {
        self.payload.as_ref().map(|p| p.text.as_str()).unwrap_or("")
    }

    /// True when a usable (non-sentinel) payload is cached
    pub fn has_payload(&self) -> bool {
        self.payload
            .as_ref()
            .map(|p| !p.is_decryption_failure())
            .unwrap_or(false)
    }

    pub fn is_from(&self, address: &str) -> bool {
        self.sender == address
    }

    /// Fold locally-owned state of an already-stored copy into `self`.
    ///
    /// `observed_at` keeps its first value, the read flag never flips back,
    /// and a good cached payload is not replaced by a missing or sentinel one
    /// for the same ciphertext.
    pub fn merge_local_state(&mut self, existing: &Record) {
        self.observed_at = existing.observed_at;
        self.is_read = self.is_read || existing.is_read;
        if self.digest.is_none() {
            self.digest = existing.digest.clone();
        }
        let incoming_usable = self
            .payload
            .as_ref()
            .map(|p| !p.is_decryption_failure())
            .unwrap_or(false);
        if !incoming_usable
            && existing.ciphertext == self.ciphertext
            && (existing.has_payload() || self.payload.is_none())
        {
            self.payload = existing.payload.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(payload: Option<DecryptedPayload>) -> Record {
        Record {
            id: RecordId::new("0x01"),
            conversation_id: ConversationId::new("0xc1"),
            sender: "0xa".to_string(),
            timestamp: 1_700_000_000_000,
            ciphertext: vec![1, 2, 3],
            key_version: 0,
            attachments: Vec::new(),
            payload,
            is_read: false,
            digest: None,
            observed_at: 5,
        }
    }

    #[test]
    fn test_sentinel_payload() {
        let p = DecryptedPayload::decryption_failed();
        assert!(p.is_decryption_failure());
        assert_eq!(p.text, "[Decryption Failed]");
        assert!(!DecryptedPayload::text("hi").is_decryption_failure());
    }

    #[test]
    fn test_message_quoting_sentinel_text_is_real() {
        let quoted = DecryptedPayload::text(DECRYPTION_FAILED_TEXT);
        assert!(!quoted.is_decryption_failure());
        assert_ne!(quoted, DecryptedPayload::decryption_failed());

        let existing = record(Some(quoted));
        assert!(existing.has_payload());
        let mut incoming = record(Some(DecryptedPayload::decryption_failed()));
        incoming.merge_local_state(&existing);
        assert!(incoming.has_payload());
        assert_eq!(incoming.text(), DECRYPTION_FAILED_TEXT);
    }

    #[test]
    fn test_merge_keeps_first_observed_and_read_flag() {
        let mut existing = record(Some(DecryptedPayload::text("hello")));
        existing.is_read = true;
        let mut incoming = record(None);
        incoming.observed_at = 99;

        incoming.merge_local_state(&existing);

        assert_eq!(incoming.observed_at, 5);
        assert!(incoming.is_read);
        assert_eq!(incoming.text(), "hello");
    }

    #[test]
    fn test_merge_does_not_downgrade_payload() {
        let existing = record(Some(DecryptedPayload::text("hello")));
        let mut incoming = record(Some(DecryptedPayload::decryption_failed()));

        incoming.merge_local_state(&existing);
        assert_eq!(incoming.text(), "hello");
    }

    #[test]
    fn test_merge_replaces_sentinel_with_real_payload() {
        let existing = record(Some(DecryptedPayload::decryption_failed()));
        let mut incoming = record(Some(DecryptedPayload::text("now readable")));

        incoming.merge_local_state(&existing);
        assert_eq!(incoming.text(), "now readable");
        assert!(incoming.has_payload());
    }
}
