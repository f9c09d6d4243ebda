//! Client context
//!
//! A [`ClientContext`] names who is acting (the owning identity) and where
//! (the network). Every component receives one at construction. Contexts are
//! never mutated: switching identity or network means building a new context
//! with [`ClientContext::successor`], which cancels all work tied to the old
//! one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::error::{MailError, MailResult};
use crate::types::{is_valid_address, Network};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Owning identity and network for one logged-in session of the client
#[derive(Clone)]
pub struct ClientContext {
    identity: String,
    network: Network,
    generation: u64,
    cancel: CancellationToken,
}

impl ClientContext {
    /// Create a context for `identity` on `network`.
    ///
    /// # Errors
    ///
    /// Returns `MailError::InvalidInput` if `identity` is not a ledger address.
    pub fn new(identity: impl Into<String>, network: Network) -> MailResult<Self> {
        let identity = identity.into().trim().to_string();
        if !is_valid_address(&identity) {
            return Err(MailError::InvalidInput(format!(
                "'{}' is not a valid address",
                identity
            )));
        }
        Ok(Self {
            identity,
            network,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
        })
    }

    /// Build the context that replaces this one and cancel this one.
    ///
    /// Background loops and in-flight lookups bound to the old context stop at
    /// their next suspension point.
    pub fn successor(&self, identity: impl Into<String>, network: Network) -> MailResult<Self> {
        let next = Self::new(identity, network)?;
        tracing::info!(
            old_generation = self.generation,
            new_generation = next.generation,
            "Client context swapped"
        );
        self.cancel.cancel();
        Ok(next)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Monotonic id distinguishing this context from every earlier one
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when this context is swapped out
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fail with `MailError::Cancelled` once this context has been replaced
    pub fn ensure_active(&self) -> MailResult<()> {
        if self.is_cancelled() {
            return Err(MailError::Cancelled(format!(
                "context generation {} was replaced",
                self.generation
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("identity", &self.identity)
            .field("network", &self.network)
            .field("generation", &self.generation)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
