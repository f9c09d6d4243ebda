//! Write side: creating conversations, adding members, sending messages
//!
//! Every write is a draft operation relayed through the sponsor, so the user
//! only ever signs and never pays. After a successful write the sync engine
//! is nudged so the ledger's view replaces the optimistic one.
//!
//! ```text
//! send_message ─▶ capability ─▶ session ─▶ seal ─▶ relay ─▶ optimistic record ─▶ nudge
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::capability::CapabilityCache;
use crate::context::ClientContext;
use crate::error::{MailError, MailResult};
use crate::ledger::PayloadSealer;
use crate::signer::TransactionSigner;
use crate::sponsor::{CallArg, DraftOperation, MoveCall, SponsorRelay};
use crate::storage::Storage;
use crate::sync::SyncEngine;
use crate::types::{
    is_valid_address, Conversation, ConversationId, ConversationKind, DecryptedPayload,
    OutgoingAttachment, Record, RecordId,
};

/// Key version of a conversation right after its first key is attached
const INITIAL_KEY_VERSION: u64 = 1;

/// Text and attachment being composed.
///
/// Survives a failed send untouched; a successful send clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeDraft {
    pub text: String,
    pub attachment: Option<OutgoingAttachment>,
}

impl ComposeDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: OutgoingAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Nothing to send: blank text and no attachment
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachment.is_none()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.attachment = None;
    }
}

fn normalize_members(addresses: &[String]) -> MailResult<Vec<String>> {
    addresses
        .iter()
        .map(|address| {
            let address = address.trim();
            if is_valid_address(address) {
                Ok(address.to_ascii_lowercase())
            } else {
                Err(MailError::InvalidInput(format!(
                    "'{}' is not a valid address",
                    address
                )))
            }
        })
        .collect()
}

/// Authoring facade for one client context
pub struct Messenger {
    engine: SyncEngine,
    capabilities: CapabilityCache,
    relay: SponsorRelay,
    sealer: Arc<dyn PayloadSealer>,
    signer: Arc<dyn TransactionSigner>,
    package_id: String,
}

impl Messenger {
    pub fn new(
        engine: SyncEngine,
        capabilities: CapabilityCache,
        relay: SponsorRelay,
        sealer: Arc<dyn PayloadSealer>,
        signer: Arc<dyn TransactionSigner>,
        package_id: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            capabilities,
            relay,
            sealer,
            signer,
            package_id: package_id.into(),
        }
    }

    fn ctx(&self) -> &ClientContext {
        self.engine.context()
    }

    fn storage(&self) -> &Storage {
        self.engine.storage()
    }

    fn target(&self, function: &str) -> String {
        format!("{}::{}", self.package_id, function)
    }

    fn draft(&self) -> DraftOperation {
        DraftOperation::new(self.ctx().identity(), self.ctx().network())
    }

    fn load_conversation(&self, conversation_id: &ConversationId) -> MailResult<Conversation> {
        self.storage()
            .load_conversation(conversation_id)?
            .ok_or_else(|| MailError::ConversationNotFound(conversation_id.to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Conversations
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a conversation with `members` (the owner is added implicitly).
    ///
    /// Runs two relayed writes: one creating the channel and handing out the
    /// capabilities, one attaching the first encryption key. The kind is
    /// stored as given and never re-derived from the member count.
    ///
    /// # Errors
    ///
    /// - `MailError::InvalidInput` for malformed addresses, a direct
    ///   conversation with other than one counterpart, or no counterpart at all
    /// - `MailError::AuthorizationDenied` if no session can be established
    /// - any relay error; nothing is registered locally in that case
    pub async fn create_conversation(
        &self,
        members: &[String],
        kind: ConversationKind,
    ) -> MailResult<Conversation> {
        self.ctx().ensure_active()?;
        let owner = self.ctx().identity().to_string();
        let mut invited: Vec<String> = Vec::new();
        for member in normalize_members(members)? {
            if member != owner && !invited.contains(&member) {
                invited.push(member);
            }
        }
        if invited.is_empty() {
            return Err(MailError::InvalidInput(
                "a conversation needs at least one other member".to_string(),
            ));
        }
        if kind == ConversationKind::Direct && invited.len() != 1 {
            return Err(MailError::InvalidInput(format!(
                "a direct conversation has exactly one counterpart, got {}",
                invited.len()
            )));
        }

        let mut all_members = vec![owner.clone()];
        all_members.extend(invited.iter().cloned());

        let credential = self.engine.session().ensure_session().await?;

        let create = self
            .draft()
            .with_call(MoveCall::new(self.target("config::none"), Vec::new()))
            .with_call(MoveCall::new(
                self.target("channel::new"),
                vec![CallArg::Addresses(all_members.clone())],
            ))
            .with_call(MoveCall::new(self.target("channel::share"), Vec::new()))
            .with_call(MoveCall::new(
                self.target("creator_cap::transfer_to_sender"),
                vec![CallArg::Address(owner.clone())],
            ))
            .with_call(MoveCall::new(
                self.target("member_cap::transfer_member_caps"),
                vec![CallArg::Addresses(all_members.clone())],
            ));
        let digest = self.relay.relay(&create, self.signer.as_ref()).await?;
        let effects = self.engine.ledger().wait_for_transaction(&digest).await?;
        let conversation_id = effects.created_conversations.into_iter().next().ok_or_else(|| {
            MailError::NetworkUnavailable(format!("transaction {} created no conversation", digest))
        })?;
        debug!(conversation_id = %conversation_id, digest = %digest, "Conversation created");

        // Fresh membership: the cap did not exist when anything was cached
        self.capabilities.invalidate(&conversation_id);
        let token = self.capabilities.resolve(&conversation_id).await?;
        let creator_cap = token.creator_cap_id.clone().ok_or_else(|| {
            MailError::AuthorizationDenied(format!(
                "no creator capability for new conversation {}",
                conversation_id
            ))
        })?;

        let key = self.sealer.new_conversation_key(&credential).await?;
        let attach_key = self.draft().with_call(MoveCall::new(
            self.target("channel::add_encrypted_key"),
            vec![
                CallArg::Object(conversation_id.to_string()),
                CallArg::Object(creator_cap),
                CallArg::Bytes(key),
            ],
        ));
        let digest = self.relay.relay(&attach_key, self.signer.as_ref()).await?;
        self.engine.ledger().wait_for_transaction(&digest).await?;

        let conversation = Conversation::new(conversation_id, kind, all_members, INITIAL_KEY_VERSION)?;
        self.engine.register_local_conversation(&conversation)?;
        self.engine.nudge();
        info!(
            conversation_id = %conversation.id,
            kind = %conversation.kind,
            members = conversation.members.len(),
            "Conversation ready"
        );
        Ok(conversation)
    }

    /// Add `members` to a conversation the owner created.
    ///
    /// The conversation keeps its kind. Returns the final digest.
    ///
    /// # Errors
    ///
    /// - `MailError::ConversationNotFound` for an unknown conversation
    /// - `MailError::NotAMember` if the owner holds no capability
    /// - `MailError::AuthorizationDenied` if the owner is a member but not the creator
    pub async fn add_members(
        &self,
        conversation_id: &ConversationId,
        members: &[String],
    ) -> MailResult<String> {
        self.ctx().ensure_active()?;
        let mut conversation = self.load_conversation(conversation_id)?;
        let new_members: Vec<String> = normalize_members(members)?
            .into_iter()
            .filter(|m| !conversation.has_member(m))
            .collect();
        if new_members.is_empty() {
            return Err(MailError::InvalidInput(
                "no new members to add".to_string(),
            ));
        }

        let token = self.capabilities.resolve(conversation_id).await?;
        let creator_cap = token.creator_cap_id.clone().ok_or_else(|| {
            MailError::AuthorizationDenied(format!(
                "only the creator of {} can add members",
                conversation_id
            ))
        })?;

        let draft = self.draft().with_call(MoveCall::new(
            self.target("channel::add_members"),
            vec![
                CallArg::Object(conversation_id.to_string()),
                CallArg::Object(token.member_cap_id.clone()),
                CallArg::Object(creator_cap),
                CallArg::Addresses(new_members.clone()),
            ],
        ));
        let digest = self.relay.relay(&draft, self.signer.as_ref()).await?;
        self.engine.ledger().wait_for_transaction(&digest).await?;

        conversation.add_members(new_members.iter().cloned());
        conversation.updated_at = self.engine.now_ms();
        self.engine.register_local_conversation(&conversation)?;
        self.engine.nudge();
        info!(
            conversation_id = %conversation_id,
            added = new_members.len(),
            digest = %digest,
            "Members added"
        );
        Ok(digest)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Messages
    // ═══════════════════════════════════════════════════════════════════════

    /// Send the composed message.
    ///
    /// On success the draft is cleared and an optimistic record keyed by the
    /// final digest is stored; it is replaced once the ledger's copy is
    /// pulled. On failure the draft is left as it was.
    ///
    /// # Errors
    ///
    /// - `MailError::InvalidInput` for an empty draft
    /// - `MailError::ConversationNotFound` for an unknown conversation
    /// - `MailError::NotAMember` if the owner holds no capability
    /// - `MailError::AuthorizationDenied` if no session can be established
    /// - any relay error
    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        draft: &mut ComposeDraft,
    ) -> MailResult<Record> {
        if draft.is_empty() {
            return Err(MailError::InvalidInput("nothing to send".to_string()));
        }
        self.ctx().ensure_active()?;

        match self.send_inner(conversation_id, draft).await {
            Ok(record) => {
                draft.clear();
                self.engine.nudge();
                Ok(record)
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Send failed, draft kept");
                Err(e)
            }
        }
    }

    async fn send_inner(
        &self,
        conversation_id: &ConversationId,
        draft: &ComposeDraft,
    ) -> MailResult<Record> {
        let conversation = self.load_conversation(conversation_id)?;
        let token = self.capabilities.resolve(conversation_id).await?;
        let credential = self.engine.session().ensure_session().await?;

        let payload = DecryptedPayload {
            text: draft.text.clone(),
            file: draft.attachment.as_ref().map(OutgoingAttachment::meta),
            failed: false,
        };
        let sealed = self
            .sealer
            .seal(&credential, &conversation, &payload, draft.attachment.as_ref())
            .await?;

        let mut operation = self.draft();
        for attachment in &sealed.attachments {
            operation.push_call(MoveCall::new(
                self.target("attachment::new"),
                vec![
                    CallArg::Bytes(attachment.blob_id.as_bytes().to_vec()),
                    CallArg::Bytes(attachment.file_name.as_bytes().to_vec()),
                    CallArg::Bytes(attachment.mime_type.as_bytes().to_vec()),
                    CallArg::U64(attachment.size),
                ],
            ));
        }
        operation.push_call(MoveCall::new(
            self.target("channel::send_message"),
            vec![
                CallArg::Object(conversation_id.to_string()),
                CallArg::Object(token.member_cap_id.clone()),
                CallArg::Bytes(sealed.ciphertext.clone()),
                CallArg::U64(sealed.key_version),
            ],
        ));

        let digest = self.relay.relay(&operation, self.signer.as_ref()).await?;

        let now = self.engine.now_ms();
        let record = Record {
            id: RecordId::pending(&digest),
            conversation_id: conversation_id.clone(),
            sender: self.ctx().identity().to_string(),
            timestamp: now,
            ciphertext: sealed.ciphertext,
            key_version: sealed.key_version,
            attachments: sealed.attachments,
            payload: Some(payload),
            is_read: true,
            digest: Some(digest.clone()),
            observed_at: now,
        };
        self.engine.record_local(&record)?;
        info!(conversation_id = %conversation_id, digest = %digest, "Message sent");
        Ok(record)
    }
}
