//! Realtime push channel
//!
//! The ledger can push "message added" events. They only carry enough to know
//! *that* something changed, so a subscription just signals the sync engine
//! to pull sooner than its timer would. Events for other conversations and
//! repeated deliveries of the same event are dropped.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::ClientContext;
use crate::error::MailResult;
use crate::types::ConversationId;

/// Payload fields the conversation id may be published under
const CONVERSATION_FIELDS: &[&str] = &["channelId", "channel", "channel_Id", "channel_object_id"];

/// How many recent event ids are remembered for de-duplication
const SEEN_CAPACITY: usize = 1024;

/// One pushed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Unique id of the event (e.g. transaction digest plus sequence)
    pub id: String,
    /// Event body as published by the ledger
    pub payload: serde_json::Value,
}

impl RealtimeEvent {
    /// Conversation the event refers to, if the payload names one
    pub fn conversation_id(&self) -> Option<&str> {
        CONVERSATION_FIELDS
            .iter()
            .find_map(|field| self.payload.get(*field).and_then(|v| v.as_str()))
            .filter(|id| !id.is_empty())
    }
}

/// Source of pushed events
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a stream of events; the stream ends when the receiver is dropped
    async fn open(&self) -> MailResult<mpsc::Receiver<RealtimeEvent>>;
}

/// Bounded memory of recently seen event ids
struct SeenEvents {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenEvents {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    /// Remember `id`; returns false if it was already seen
    fn insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

/// An open push subscription for one conversation.
///
/// Dropping the subscription releases it.
pub struct RealtimeSubscription {
    conversation_id: ConversationId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RealtimeSubscription {
    /// Subscribe to events of `conversation_id`, calling `on_signal` for each new one.
    ///
    /// The subscription also ends when `ctx` is swapped out.
    pub async fn subscribe<F>(
        source: &dyn EventSource,
        ctx: &ClientContext,
        conversation_id: ConversationId,
        on_signal: F,
    ) -> MailResult<Self>
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        ctx.ensure_active()?;
        let mut events = source.open().await?;
        let cancel = ctx.cancellation().child_token();
        let task_cancel = cancel.clone();
        let target = conversation_id.clone();

        info!(conversation_id = %conversation_id, "Realtime subscription opened");
        let task = tokio::spawn(async move {
            let mut seen = SeenEvents::new();
            loop {
                let event = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                if event.conversation_id() != Some(target.as_str()) {
                    debug!(event_id = %event.id, "Ignoring event for another conversation");
                    continue;
                }
                if !seen.insert(&event.id) {
                    debug!(event_id = %event.id, "Ignoring duplicate event");
                    continue;
                }
                on_signal(&event);
            }
            debug!(conversation_id = %target, "Realtime subscription task finished");
        });

        Ok(Self {
            conversation_id,
            cancel,
            task: Some(task),
        })
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// True until unsubscribed, the context is swapped, or the source closed
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .task
                .as_ref()
                .map(|task| !task.is_finished())
                .unwrap_or(false)
    }

    /// Release the subscription
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            info!(conversation_id = %self.conversation_id, "Realtime subscription closed");
        }
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
