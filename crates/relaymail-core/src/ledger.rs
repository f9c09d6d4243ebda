//! Ledger-side collaborators
//!
//! The ledger client, the encryption library and the blob store are external.
//! These traits are the only surface the sync engine and messenger rely on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MailResult;
use crate::session::SessionCredential;
use crate::types::{
    AttachmentRef, Conversation, ConversationId, DecryptedPayload, OutgoingAttachment, Record,
    RecordId,
};

/// A record as the ledger reports it, before local decryption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RecordId,
    pub conversation_id: ConversationId,
    pub sender: String,
    pub timestamp: i64,
    pub ciphertext: Vec<u8>,
    pub key_version: u64,
    pub attachments: Vec<AttachmentRef>,
    /// Digest of the transaction that created the record
    pub digest: Option<String>,
}

impl RemoteRecord {
    /// Local record carrying `payload`, first observed at `observed_at`.
    ///
    /// Records sent by `owner` are stored as already read.
    pub fn into_record(self, payload: DecryptedPayload, owner: &str, observed_at: i64) -> Record {
        let is_read = self.sender == owner;
        Record {
            id: self.id,
            conversation_id: self.conversation_id,
            sender: self.sender,
            timestamp: self.timestamp,
            ciphertext: self.ciphertext,
            key_version: self.key_version,
            attachments: self.attachments,
            payload: Some(payload),
            is_read,
            digest: self.digest,
            observed_at,
        }
    }
}

/// Changes to one conversation since a watermark
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteDelta {
    /// New or updated records, in any order
    pub records: Vec<RemoteRecord>,
    /// Records removed on the ledger
    pub deleted: Vec<RecordId>,
    /// Watermark to resume from next time
    pub watermark: u64,
}

/// Effects of an executed transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionEffects {
    pub digest: String,
    /// Conversations created by the transaction
    pub created_conversations: Vec<ConversationId>,
}

/// Read access to the authoritative ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Conversations `owner` is a member of, with current members and key version
    async fn memberships(&self, owner: &str) -> MailResult<Vec<Conversation>>;

    /// Records of `conversation_id` after `watermark` (`None` means from the start)
    async fn fetch_since(
        &self,
        conversation_id: &ConversationId,
        watermark: Option<u64>,
    ) -> MailResult<RemoteDelta>;

    /// Wait until `digest` is final and report its effects
    async fn wait_for_transaction(&self, digest: &str) -> MailResult<TransactionEffects>;
}

/// Opens record ciphertexts with the session credential
#[async_trait]
pub trait RecordDecryptor: Send + Sync {
    /// Decrypt one record.
    ///
    /// Returns `MailError::DecryptionFailed` for a record that cannot be opened.
    async fn decrypt(
        &self,
        credential: &SessionCredential,
        conversation: &Conversation,
        record: &RemoteRecord,
    ) -> MailResult<DecryptedPayload>;
}

/// Fetches attachment content from blob storage
#[async_trait]
pub trait BlobReader: Send + Sync {
    async fn read_blob(&self, blob_id: &str) -> MailResult<Vec<u8>>;
}

/// A message encrypted for a conversation, ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub ciphertext: Vec<u8>,
    /// Key version the ciphertext was sealed under
    pub key_version: u64,
    /// Uploaded, encrypted attachments
    pub attachments: Vec<AttachmentRef>,
}

/// Encrypts outgoing content with a conversation's key
#[async_trait]
pub trait PayloadSealer: Send + Sync {
    /// Generate a fresh conversation key, returned wrapped (encrypted) for
    /// storage on the ledger.
    async fn new_conversation_key(&self, credential: &SessionCredential) -> MailResult<Vec<u8>>;

    /// Encrypt `payload` under the conversation's current key, uploading
    /// `attachment` to blob storage when present.
    async fn seal(
        &self,
        credential: &SessionCredential,
        conversation: &Conversation,
        payload: &DecryptedPayload,
        attachment: Option<&OutgoingAttachment>,
    ) -> MailResult<SealedMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_records_are_read() {
        let remote = RemoteRecord {
            id: RecordId::new("r1"),
            conversation_id: ConversationId::new("c1"),
            sender: "0xme".to_string(),
            timestamp: 10,
            ciphertext: vec![1],
            key_version: 0,
            attachments: Vec::new(),
            digest: Some("d2".to_string()),
        };

        let mine = remote.clone().into_record(DecryptedPayload::text("hi"), "0xme", 99);
        assert!(mine.is_read);
        assert_eq!(mine.observed_at, 99);
        assert_eq!(mine.digest.as_deref(), Some("d2"));

        let theirs = remote.into_record(DecryptedPayload::text("hi"), "0xother", 99);
        assert!(!theirs.is_read);
    }
}
