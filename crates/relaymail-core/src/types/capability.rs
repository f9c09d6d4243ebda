//! Membership capabilities
//!
//! Authoring writes in a conversation requires proving membership. The ledger
//! models that proof as owned capability objects; locally we only need their
//! object ids, which [`CapabilityToken`] carries.

use serde::{Deserialize, Serialize};

use crate::types::ConversationId;

/// Proof that `owner` is a member of `conversation_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub conversation_id: ConversationId,
    /// Address the capability belongs to
    pub owner: String,
    /// Object id of the member capability
    pub member_cap_id: String,
    /// Object id of the creator capability, present only for the conversation's creator
    pub creator_cap_id: Option<String>,
}

impl CapabilityToken {
    pub fn new(
        conversation_id: ConversationId,
        owner: impl Into<String>,
        member_cap_id: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            owner: owner.into(),
            member_cap_id: member_cap_id.into(),
            creator_cap_id: None,
        }
    }

    pub fn with_creator_cap(mut self, creator_cap_id: impl Into<String>) -> Self {
        self.creator_cap_id = Some(creator_cap_id.into());
        self
    }

    /// Whether this token grants admin rights (adding members)
    pub fn can_manage_members(&self) -> bool {
        self.creator_cap_id.is_some()
    }
}
