//! Membership capability cache
//!
//! Authoring in a conversation requires the owner's capability token. Looking
//! it up means a ledger round-trip, so tokens are cached per
//! `(owner, conversation)`. Concurrent resolves for the same key share one
//! in-flight lookup. Failed lookups are never cached: a "not a member" answer
//! may stop being true as soon as someone adds us.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::context::ClientContext;
use crate::error::{MailError, MailResult};
use crate::types::{CapabilityToken, ConversationId};

/// Finds the capability objects an owner holds for a conversation
#[async_trait]
pub trait MembershipLookup: Send + Sync {
    /// Look up `owner`'s capability for `conversation_id`; `None` if not a member
    async fn lookup(
        &self,
        conversation_id: &ConversationId,
        owner: &str,
    ) -> MailResult<Option<CapabilityToken>>;
}

type CacheKey = (String, ConversationId);
type LookupFuture = Shared<BoxFuture<'static, MailResult<CapabilityToken>>>;

struct InFlight {
    id: u64,
    future: LookupFuture,
}

#[derive(Default)]
struct CacheState {
    tokens: HashMap<CacheKey, CapabilityToken>,
    in_flight: HashMap<CacheKey, InFlight>,
    next_flight: u64,
}

/// Single-flight cache of capability tokens for one client context
#[derive(Clone)]
pub struct CapabilityCache {
    ctx: ClientContext,
    lookup: Arc<dyn MembershipLookup>,
    state: Arc<Mutex<CacheState>>,
}

impl CapabilityCache {
    pub fn new(ctx: ClientContext, lookup: Arc<dyn MembershipLookup>) -> Self {
        Self {
            ctx,
            lookup,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    fn key(&self, conversation_id: &ConversationId) -> CacheKey {
        (self.ctx.identity().to_string(), conversation_id.clone())
    }

    /// Return the cached token or perform (or join) the lookup.
    ///
    /// # Errors
    ///
    /// - `MailError::NotAMember` if the owner holds no capability
    /// - `MailError::Cancelled` if the context was swapped out mid-lookup
    /// - whatever the lookup itself failed with
    pub async fn resolve(&self, conversation_id: &ConversationId) -> MailResult<CapabilityToken> {
        self.ctx.ensure_active()?;
        let key = self.key(conversation_id);

        let (flight_id, future) = {
            let mut state = self.state.lock();
            if let Some(token) = state.tokens.get(&key) {
                return Ok(token.clone());
            }
            match state.in_flight.get(&key) {
                Some(flight) => {
                    debug!(conversation_id = %conversation_id, "Joining in-flight capability lookup");
                    (flight.id, flight.future.clone())
                }
                None => {
                    state.next_flight += 1;
                    let id = state.next_flight;
                    let future = self.start_lookup(conversation_id.clone());
                    state.in_flight.insert(
                        key.clone(),
                        InFlight {
                            id,
                            future: future.clone(),
                        },
                    );
                    (id, future)
                }
            }
        };

        let result = future.await;

        let mut state = self.state.lock();
        let owns_flight = state
            .in_flight
            .get(&key)
            .map(|flight| flight.id == flight_id)
            .unwrap_or(false);
        if owns_flight {
            state.in_flight.remove(&key);
            if let Ok(token) = &result {
                state.tokens.insert(key, token.clone());
            }
        }
        result
    }

    fn start_lookup(&self, conversation_id: ConversationId) -> LookupFuture {
        let lookup = self.lookup.clone();
        let owner = self.ctx.identity().to_string();
        let cancel = self.ctx.cancellation();

        async move {
            debug!(conversation_id = %conversation_id, owner = %owner, "Looking up capability");
            tokio::select! {
                _ = cancel.cancelled() => Err(MailError::Cancelled(format!(
                    "capability lookup for {} abandoned",
                    conversation_id
                ))),
                found = lookup.lookup(&conversation_id, &owner) => match found {
                    Ok(Some(token)) => Ok(token),
                    Ok(None) => Err(MailError::NotAMember(conversation_id.to_string())),
                    Err(e) => Err(e),
                },
            }
        }
        .boxed()
        .shared()
    }

    /// Seed the cache with a token learned elsewhere (e.g. conversation creation)
    pub fn insert(&self, token: CapabilityToken) {
        let key = (token.owner.clone(), token.conversation_id.clone());
        self.state.lock().tokens.insert(key, token);
    }

    /// Cached token without performing a lookup
    pub fn cached(&self, conversation_id: &ConversationId) -> Option<CapabilityToken> {
        self.state.lock().tokens.get(&self.key(conversation_id)).cloned()
    }

    /// Drop the cached token for a conversation.
    ///
    /// A lookup already in flight still answers its waiters but its result
    /// is not cached.
    pub fn invalidate(&self, conversation_id: &ConversationId) {
        let key = self.key(conversation_id);
        let mut state = self.state.lock();
        state.tokens.remove(&key);
        state.in_flight.remove(&key);
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let dropped = state.tokens.len();
        state.tokens.clear();
        state.in_flight.clear();
        info!(dropped, "Capability cache cleared");
    }

    pub fn len(&self) -> usize {
        self.state.lock().tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
