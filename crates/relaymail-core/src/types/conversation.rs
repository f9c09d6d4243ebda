//! Conversation metadata

use serde::{Deserialize, Serialize};

use super::{ConversationId, Record, RecordId};
use crate::error::{MailError, MailResult};

/// Whether a conversation is a two-party channel or a group.
///
/// Persisted when the conversation is created or first registered and never
/// re-derived from the member list, so a direct channel that later gains a
/// member stays a direct channel until it is explicitly re-registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl std::fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationKind::Direct => write!(f, "direct"),
            ConversationKind::Group => write!(f, "group"),
        }
    }
}

/// Cached summary of the newest record in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub record_id: RecordId,
    pub sender: String,
    pub preview: String,
    pub timestamp: i64,
}

impl RecordSummary {
    const PREVIEW_CHARS: usize = 80;

    pub fn from_record(record: &Record) -> Self {
        Self {
            record_id: record.id.clone(),
            sender: record.sender.clone(),
            preview: record.text().chars().take(Self::PREVIEW_CHARS).collect(),
            timestamp: record.timestamp,
        }
    }
}

/// A channel between two or more members sharing one encryption key history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    /// Member addresses, deduplicated, in join order
    pub members: Vec<String>,
    /// Current encryption key version
    pub key_version: u64,
    pub last_record: Option<RecordSummary>,
    /// Unix ms of the last change, used for recency ordering
    pub updated_at: i64,
}

impl Conversation {
    /// Create conversation metadata.
    ///
    /// # Errors
    ///
    /// Returns `MailError::InvalidInput` unless there are at least two distinct members.
    pub fn new(
        id: ConversationId,
        kind: ConversationKind,
        members: Vec<String>,
        key_version: u64,
    ) -> MailResult<Self> {
        let members = dedupe_members(members);
        if members.len() < 2 {
            return Err(MailError::InvalidInput(format!(
                "conversation {} needs at least two members, got {}",
                id,
                members.len()
            )));
        }
        Ok(Self {
            id,
            kind,
            members,
            key_version,
            last_record: None,
            updated_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }

    pub fn has_member(&self, address: &str) -> bool {
        self.members.iter().any(|m| m == address)
    }

    /// The other party of a direct conversation
    pub fn counterpart(&self, owner: &str) -> Option<&str> {
        if self.is_group() {
            return None;
        }
        self.members.iter().map(String::as_str).find(|m| *m != owner)
    }

    /// Add members, keeping the persisted kind untouched
    pub fn add_members(&mut self, addresses: impl IntoIterator<Item = String>) {
        let mut members = std::mem::take(&mut self.members);
        members.extend(addresses);
        self.members = dedupe_members(members);
    }

    /// Record `record` as the newest message if it is newer than the cached one
    pub fn observe(&mut self, record: &Record) {
        let newer = self
            .last_record
            .as_ref()
            .map(|s| (record.timestamp, &record.id) > (s.timestamp, &s.record_id))
            .unwrap_or(true);
        if newer {
            self.last_record = Some(RecordSummary::from_record(record));
            self.updated_at = self.updated_at.max(record.timestamp);
        }
    }
}

/// A conversation together with its local records, as listed to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: ConversationId,
    /// Registered metadata; `None` when only records are known locally
    pub conversation: Option<Conversation>,
    /// Records, newest first
    pub records: Vec<Record>,
    pub unread: usize,
    /// Newest record timestamp, or the metadata update time for empty conversations
    pub last_activity: i64,
}

fn dedupe_members(members: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    members
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty() && seen.insert(m.clone()))
        .collect()
}
