//! Sync event types and status tracking
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncStatus: engine-wide pull state                             │
//! │  ├── Idle: waiting for the next trigger                         │
//! │  ├── Pulling: a pull is running                                 │
//! │  └── Error: the last pull failed                                │
//! │                                                                 │
//! │  SyncEvent: notifications about local view changes              │
//! │  ├── RecordsChanged: records of a conversation changed          │
//! │  ├── ConversationsChanged: new conversations became known       │
//! │  ├── ConversationsRemoved: memberships the ledger dropped       │
//! │  ├── PullCompleted: a pull finished, with the resulting version │
//! │  ├── StatusChanged: SyncStatus transition                       │
//! │  └── SyncError: a pull failed                                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::types::ConversationId;

/// State of the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// Waiting for the next timer tick, push signal or nudge
    #[default]
    Idle,
    /// A pull is running
    Pulling,
    /// The last pull failed
    Error(String),
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "Idle"),
            SyncStatus::Pulling => write!(f, "Pulling"),
            SyncStatus::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Counts of what a pull (or local write) did to one conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
}

impl ChangeCounts {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn absorb(&mut self, other: ChangeCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.removed += other.removed;
    }
}

/// Events emitted by the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Records of a conversation were inserted, updated or removed
    RecordsChanged {
        conversation_id: ConversationId,
        changes: ChangeCounts,
    },
    /// Conversations became known locally (new membership or local creation)
    ConversationsChanged { added: Vec<ConversationId> },
    /// Conversations were dropped locally after leaving the membership list
    ConversationsRemoved { removed: Vec<ConversationId> },
    /// A pull finished
    PullCompleted {
        /// Version after the pull
        version: u64,
        /// Total record changes applied
        changes: usize,
    },
    /// Engine status changed
    StatusChanged(SyncStatus),
    /// A pull failed
    SyncError {
        conversation_id: Option<ConversationId>,
        message: String,
    },
}

impl SyncEvent {
    /// The conversation this event concerns, if any
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            SyncEvent::RecordsChanged {
                conversation_id, ..
            } => Some(conversation_id),
            SyncEvent::SyncError {
                conversation_id, ..
            } => conversation_id.as_ref(),
            _ => None,
        }
    }
}
