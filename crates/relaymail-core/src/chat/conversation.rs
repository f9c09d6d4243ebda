//! Conversation view for chat listings
//!
//! A [`ConversationView`] is a stored conversation with its counterpart
//! resolved against the owner's address book, ready for a list or a thread.

use super::message::ChatMessage;
use crate::aliases::AliasMap;
use crate::types::{shorten_address, ConversationId, ConversationKind, ConversationSummary};

/// Characters of the newest message shown in a listing
const PREVIEW_CHARS: usize = 60;

/// A conversation as shown to the owner.
///
/// # Example
///
/// ```ignore
/// let aliases = directory.list();
/// for summary in storage.list_conversation_summaries()? {
///     let view = ConversationView::from_summary(&summary, &owner, &aliases);
///     println!("{} ({} unread): {}", view.display_name(), view.unread, view.preview().unwrap_or_default());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ConversationView {
    pub id: ConversationId,
    /// `None` when only records are known locally
    pub kind: Option<ConversationKind>,
    /// Counterpart of a direct conversation
    pub counterpart: Option<String>,
    /// Counterpart's alias (if known)
    pub counterpart_name: Option<String>,
    pub member_count: usize,
    /// Messages, newest first
    messages: Vec<ChatMessage>,
    pub unread: usize,
    /// Last message timestamp (for sorting conversations)
    pub last_activity: i64,
}

impl ConversationView {
    /// Build the view of `summary` as seen by `owner`
    pub fn from_summary(summary: &ConversationSummary, owner: &str, aliases: &AliasMap) -> Self {
        let conversation = summary.conversation.as_ref();
        let counterpart = conversation
            .and_then(|c| c.counterpart(owner))
            .map(str::to_string);
        let counterpart_name = counterpart
            .as_ref()
            .and_then(|c| aliases.get(&c.to_ascii_lowercase()).cloned());

        Self {
            id: summary.id.clone(),
            kind: conversation.map(|c| c.kind),
            counterpart,
            counterpart_name,
            member_count: conversation.map(|c| c.members.len()).unwrap_or(0),
            messages: summary
                .records
                .iter()
                .map(|r| ChatMessage::from_record(r, owner, aliases))
                .collect(),
            unread: summary.unread,
            last_activity: summary.last_activity,
        }
    }

    /// Get all messages, newest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_group(&self) -> bool {
        self.kind == Some(ConversationKind::Group)
    }

    /// Get the most recent message, if any.
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.first()
    }

    /// Newest message text, truncated for a listing
    pub fn preview(&self) -> Option<String> {
        self.last_message().map(|m| {
            if m.content.chars().count() > PREVIEW_CHARS {
                let cut: String = m.content.chars().take(PREVIEW_CHARS).collect();
                format!("{}...", cut)
            } else {
                m.content.clone()
            }
        })
    }

    /// Get the display name for this conversation.
    ///
    /// Direct conversations show the counterpart's alias or short address,
    /// groups show their size.
    pub fn display_name(&self) -> String {
        if self.is_group() {
            return format!("Group ({} members)", self.member_count);
        }
        match (&self.counterpart_name, &self.counterpart) {
            (Some(name), _) => name.clone(),
            (None, Some(address)) => shorten_address(address),
            (None, None) => self.id.short(),
        }
    }
}
