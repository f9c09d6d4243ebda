//! relaymail Core Library
//!
//! Encrypted messaging over an append-only ledger, with fee-sponsored writes.
//!
//! ## Overview
//!
//! relaymail keeps a durable local view of every conversation the owning
//! identity belongs to, pulled from the ledger and decrypted with a time-boxed
//! session credential. Writes (creating conversations, adding members,
//! sending messages) are relayed through a sponsor that pays the fees, so the
//! user only ever signs.
//!
//! ## Core Principles
//!
//! - **Local-first reads**: views render from the local store; sync merges in the background
//! - **Idempotent merge**: records are keyed by a stable id, re-syncing never duplicates
//! - **Fail closed**: anything the sponsor would not pay for is rejected before it leaves
//!
//! ## Quick Start
//!
//! ```ignore
//! use relaymail_core::{ClientContext, Network, Storage, SyncEngine};
//!
//! let ctx = ClientContext::new(address, Network::Testnet)?;
//! let storage = Storage::new(MailConfig::database_path(&data_dir))?;
//! let session = Arc::new(SessionManager::new(
//!     ctx.clone(), storage.clone(), wallet.clone(), Arc::new(SystemClock),
//!     vec![config.messaging_package.clone()], config.session_ttl_minutes,
//! ));
//! session.restore().await?;
//!
//! let engine = SyncEngine::builder(ctx.clone(), storage.clone(), ledger, decryptor, session)
//!     .poll_interval(config.poll_interval())
//!     .build();
//! engine.pull().await?;
//! engine.start();
//!
//! for summary in storage.list_conversation_summaries()? {
//!     println!("{}: {} unread", summary.id, summary.unread);
//! }
//! ```

pub mod aliases;
pub mod capability;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod messenger;
pub mod realtime;
pub mod session;
pub mod signer;
pub mod sponsor;
pub mod storage;
pub mod sync;
pub mod types;

// Re-exports
pub use aliases::{AliasDirectory, AliasMap};
pub use capability::{CapabilityCache, MembershipLookup};
pub use chat::{ChatMessage, ConversationView};
pub use config::MailConfig;
pub use context::ClientContext;
pub use error::{MailError, MailResult};
pub use ledger::{
    BlobReader, LedgerClient, PayloadSealer, RecordDecryptor, RemoteDelta, RemoteRecord,
    SealedMessage, TransactionEffects,
};
pub use messenger::{ComposeDraft, Messenger};
pub use realtime::{EventSource, RealtimeEvent, RealtimeSubscription};
pub use session::{Clock, SessionCredential, SessionManager, SessionState, SystemClock};
pub use signer::{PersonalMessageSigner, SignerError, TransactionSigner};
pub use sponsor::{DraftOperation, HttpSponsorService, SponsorPolicy, SponsorRelay, SponsorService};
pub use storage::{Storage, UpsertOutcome};
pub use sync::{PullReport, SyncEngine, SyncEvent, SyncStatus};
pub use types::*;
