//! Chat views
//!
//! This module turns stored conversations and records into display-ready
//! values, resolving addresses against the owner's alias directory.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Chat Layer (this module)                                       │
//! │  - ChatMessage: display-ready record                            │
//! │  - ConversationView: conversation with counterpart resolved     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Storage Layer                                                  │
//! │  - Records indexed by conversation and time                     │
//! │  - Registered conversations and per-owner aliases               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Sync Layer                                                     │
//! │  - SyncEngine pulls ledger deltas into storage                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let aliases = directory.list();
//! for view in load_conversation_views(&storage, ctx.identity(), &aliases)? {
//!     println!("{}: {} messages", view.display_name(), view.len());
//! }
//! ```

mod conversation;
mod message;

pub use conversation::ConversationView;
pub use message::{relative_time, ChatMessage};

use crate::aliases::AliasMap;
use crate::error::MailResult;
use crate::storage::Storage;
use crate::types::ConversationId;

/// Views of every known conversation, most recently active first
pub fn load_conversation_views(
    storage: &Storage,
    owner: &str,
    aliases: &AliasMap,
) -> MailResult<Vec<ConversationView>> {
    Ok(storage
        .list_conversation_summaries()?
        .iter()
        .map(|summary| ConversationView::from_summary(summary, owner, aliases))
        .collect())
}

/// Messages of one conversation, newest first
pub fn load_messages(
    storage: &Storage,
    conversation_id: &ConversationId,
    owner: &str,
    aliases: &AliasMap,
) -> MailResult<Vec<ChatMessage>> {
    Ok(storage
        .list_by_conversation(conversation_id)?
        .iter()
        .map(|record| ChatMessage::from_record(record, owner, aliases))
        .collect())
}
