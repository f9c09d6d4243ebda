//! Ledger synchronization
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncEngine                                                     │
//! │  ├── pull(): memberships + per-conversation deltas              │
//! │  ├── watermarks: persisted per conversation                     │
//! │  ├── version: AtomicU64 mirrored into a watch channel           │
//! │  ├── event_tx: broadcast::Sender<SyncEvent>                     │
//! │  └── poll loop: timer + realtime signals + nudges               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let engine = SyncEngine::builder(ctx, storage, ledger, decryptor, session)
//!     .event_source(push)
//!     .build();
//!
//! let mut version = engine.subscribe();
//! engine.start();
//!
//! while version.changed().await.is_ok() {
//!     for summary in engine.storage().list_conversation_summaries()? {
//!         println!("{}: {} unread", summary.id, summary.unread);
//!     }
//! }
//! ```

mod engine;
mod events;

pub use engine::{PullReport, SyncEngine, SyncEngineBuilder, DEFAULT_POLL_INTERVAL};
pub use events::{ChangeCounts, SyncEvent, SyncStatus};
