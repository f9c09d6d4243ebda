//! Sync engine
//!
//! Pulls record deltas from the ledger, decrypts them with the active session
//! credential and merges them into the local store.
//!
//! ```text
//! timer ─┐
//! push  ─┼─▶ pull() ─▶ memberships ─▶ fetch_since(watermark) ─▶ decrypt ─▶ upsert
//! nudge ─┘                                                                  │
//!                                          version += 1 (if anything changed)
//! ```
//!
//! Pulls are serialized by a lock, so redundant triggers queue up behind the
//! running pull and usually find nothing new.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{ChangeCounts, SyncEvent, SyncStatus};
use crate::context::ClientContext;
use crate::error::{MailError, MailResult};
use crate::ledger::{BlobReader, LedgerClient, RecordDecryptor, RemoteRecord};
use crate::realtime::{EventSource, RealtimeSubscription};
use crate::session::{Clock, SessionCredential, SessionManager, SystemClock};
use crate::storage::{Storage, UpsertOutcome};
use crate::types::{Conversation, ConversationId, DecryptedPayload, Record, RecordId};

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default interval of the background pull loop
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Conversations touched within this window survive a membership list that
/// omits them, since the indexer lags behind freshly created conversations
const MEMBERSHIP_GRACE_MS: i64 = 5 * 60 * 1000;

/// Summary of one pull
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Conversations that were pulled
    pub conversations: usize,
    /// Record changes applied across all conversations
    pub changes: ChangeCounts,
    /// Records stored with the decryption-failure sentinel
    pub decryption_failures: usize,
    /// Version after the pull
    pub version: u64,
}

/// The conversation a caller is currently viewing
#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveConversation {
    id: ConversationId,
    epoch: u64,
}

struct EngineInner {
    ctx: ClientContext,
    storage: Storage,
    ledger: Arc<dyn LedgerClient>,
    decryptor: Arc<dyn RecordDecryptor>,
    session: Arc<SessionManager>,
    blobs: Option<Arc<dyn BlobReader>>,
    events_source: Option<Arc<dyn EventSource>>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,

    version: AtomicU64,
    version_tx: watch::Sender<u64>,
    event_tx: broadcast::Sender<SyncEvent>,
    status: RwLock<SyncStatus>,
    pull_lock: tokio::sync::Mutex<()>,

    active: RwLock<Option<ActiveConversation>>,
    active_epoch: AtomicU64,
    subscription: Mutex<Option<RealtimeSubscription>>,

    nudge: Notify,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for [`SyncEngine`]
pub struct SyncEngineBuilder {
    ctx: ClientContext,
    storage: Storage,
    ledger: Arc<dyn LedgerClient>,
    decryptor: Arc<dyn RecordDecryptor>,
    session: Arc<SessionManager>,
    blobs: Option<Arc<dyn BlobReader>>,
    events_source: Option<Arc<dyn EventSource>>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl SyncEngineBuilder {
    /// Reader used by [`SyncEngine::load_attachment`]
    pub fn blob_reader(mut self, blobs: Arc<dyn BlobReader>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Push source used for the active conversation
    pub fn event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.events_source = Some(source);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn build(self) -> SyncEngine {
        let (version_tx, _) = watch::channel(0);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        SyncEngine {
            inner: Arc::new(EngineInner {
                ctx: self.ctx,
                storage: self.storage,
                ledger: self.ledger,
                decryptor: self.decryptor,
                session: self.session,
                blobs: self.blobs,
                events_source: self.events_source,
                clock: self.clock,
                poll_interval: self.poll_interval,
                version: AtomicU64::new(0),
                version_tx,
                event_tx,
                status: RwLock::new(SyncStatus::Idle),
                pull_lock: tokio::sync::Mutex::new(()),
                active: RwLock::new(None),
                active_epoch: AtomicU64::new(0),
                subscription: Mutex::new(None),
                nudge: Notify::new(),
                poll_task: Mutex::new(None),
            }),
        }
    }
}

/// Keeps the local store in step with the ledger
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn builder(
        ctx: ClientContext,
        storage: Storage,
        ledger: Arc<dyn LedgerClient>,
        decryptor: Arc<dyn RecordDecryptor>,
        session: Arc<SessionManager>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            ctx,
            storage,
            ledger,
            decryptor,
            session,
            blobs: None,
            events_source: None,
            clock: Arc::new(SystemClock),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn context(&self) -> &ClientContext {
        &self.inner.ctx
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.inner.session
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.inner.ledger
    }

    /// Current time of the engine's clock (unix ms)
    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Observation
    // ═══════════════════════════════════════════════════════════════════════

    /// Current version; increases once per batch of local view changes
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Watch the version counter
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version_tx.subscribe()
    }

    /// Receive sync events
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.read().clone()
    }

    fn set_status(&self, status: SyncStatus) {
        let mut current = self.inner.status.write();
        if *current != status {
            *current = status.clone();
            let _ = self.inner.event_tx.send(SyncEvent::StatusChanged(status));
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.inner.event_tx.send(event);
    }

    fn bump_version(&self) -> u64 {
        let version = self.inner.version.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.version_tx.send_replace(version);
        version
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Pulling
    // ═══════════════════════════════════════════════════════════════════════

    /// Pull every known conversation.
    ///
    /// Refreshes the membership list first, so conversations created by
    /// others appear (even before they hold any record). The version
    /// advances once if anything changed.
    ///
    /// # Errors
    ///
    /// - `MailError::AuthorizationDenied` if there is no valid session
    /// - `MailError::Cancelled` if the context was swapped mid-pull
    /// - ledger and storage failures
    pub async fn pull(&self) -> MailResult<PullReport> {
        self.inner.ctx.ensure_active()?;
        let _guard = self.inner.pull_lock.lock().await;
        self.set_status(SyncStatus::Pulling);

        let result = self.pull_all_locked().await;
        self.finish_pull(&result, None);
        result
    }

    /// Pull a single registered conversation.
    ///
    /// # Errors
    ///
    /// Returns `MailError::ConversationNotFound` for a conversation that is
    /// not registered locally, plus everything [`Self::pull`] can return.
    pub async fn pull_conversation(&self, conversation_id: &ConversationId) -> MailResult<PullReport> {
        self.inner.ctx.ensure_active()?;
        let _guard = self.inner.pull_lock.lock().await;
        self.set_status(SyncStatus::Pulling);

        let result = async {
            let credential = self.credential()?;
            let conversation = self
                .inner
                .storage
                .load_conversation(conversation_id)?
                .ok_or_else(|| MailError::ConversationNotFound(conversation_id.to_string()))?;

            let mut report = PullReport {
                conversations: 1,
                ..Default::default()
            };
            self.pull_one(&conversation, &credential, &mut report).await?;
            report.version = self.commit_changes(&report);
            Ok(report)
        }
        .await;

        self.finish_pull(&result, Some(conversation_id));
        result
    }

    fn finish_pull(&self, result: &MailResult<PullReport>, conversation_id: Option<&ConversationId>) {
        match result {
            Ok(report) => {
                self.set_status(SyncStatus::Idle);
                self.emit(SyncEvent::PullCompleted {
                    version: report.version,
                    changes: report.changes.total(),
                });
            }
            Err(e) => {
                self.set_status(SyncStatus::Error(e.to_string()));
                self.emit(SyncEvent::SyncError {
                    conversation_id: conversation_id.cloned(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn credential(&self) -> MailResult<Arc<SessionCredential>> {
        self.inner.session.active_credential().ok_or_else(|| {
            MailError::AuthorizationDenied("no valid session for decryption".to_string())
        })
    }

    async fn pull_all_locked(&self) -> MailResult<PullReport> {
        let credential = self.credential()?;
        let owner = self.inner.ctx.identity();

        let memberships = self.inner.ledger.memberships(owner).await?;
        self.inner.ctx.ensure_active()?;

        let (added, removed) = self.register_memberships(memberships)?;
        let mut changed_conversations = !added.is_empty() || !removed.is_empty();
        if !added.is_empty() {
            info!(count = added.len(), "New conversations discovered");
            self.emit(SyncEvent::ConversationsChanged { added });
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "Conversations left the membership list");
            self.emit(SyncEvent::ConversationsRemoved { removed });
        }

        let conversations = self.inner.storage.list_registered_conversations()?;
        let mut report = PullReport {
            conversations: conversations.len(),
            ..Default::default()
        };
        let mut outcome = Ok(());
        for conversation in &conversations {
            if let Err(e) = self.pull_one(conversation, &credential, &mut report).await {
                outcome = Err(e);
                break;
            }
        }

        // Changes already stored still count when a later conversation failed
        changed_conversations |= !report.changes.is_empty();
        report.version = if changed_conversations {
            self.bump_version()
        } else {
            self.version()
        };
        outcome?;
        debug!(
            conversations = report.conversations,
            changes = report.changes.total(),
            version = report.version,
            "Pull finished"
        );
        Ok(report)
    }

    fn commit_changes(&self, report: &PullReport) -> u64 {
        if report.changes.is_empty() {
            self.version()
        } else {
            self.bump_version()
        }
    }

    /// Register ledger memberships, keeping the kind of known conversations.
    ///
    /// Registered conversations missing from `memberships` are forgotten
    /// unless they were updated within [`MEMBERSHIP_GRACE_MS`].
    /// Returns the ids that were added and the ids that were removed.
    fn register_memberships(
        &self,
        memberships: Vec<Conversation>,
    ) -> MailResult<(Vec<ConversationId>, Vec<ConversationId>)> {
        let listed: HashSet<ConversationId> = memberships.iter().map(|c| c.id.clone()).collect();
        let cutoff = self.now_ms().saturating_sub(MEMBERSHIP_GRACE_MS);
        let mut removed = Vec::new();
        for local in self.inner.storage.list_registered_conversations()? {
            if listed.contains(&local.id) || local.updated_at >= cutoff {
                continue;
            }
            let records = self.inner.storage.forget_conversation(&local.id)?;
            debug!(conversation_id = %local.id, records, "Forgot conversation");
            removed.push(local.id);
        }

        let mut added = Vec::new();
        for mut remote in memberships {
            match self.inner.storage.load_conversation(&remote.id)? {
                Some(local) => {
                    if local.members == remote.members && local.key_version == remote.key_version {
                        continue;
                    }
                    remote.kind = local.kind;
                    remote.last_record = local.last_record;
                    self.inner.storage.register_conversation(&remote)?;
                }
                None => {
                    self.inner.storage.register_conversation(&remote)?;
                    added.push(remote.id);
                }
            }
        }
        Ok((added, removed))
    }

    async fn pull_one(
        &self,
        conversation: &Conversation,
        credential: &SessionCredential,
        report: &mut PullReport,
    ) -> MailResult<()> {
        let storage = &self.inner.storage;
        let watermark = storage.load_watermark(&conversation.id)?;
        let delta = self
            .inner
            .ledger
            .fetch_since(&conversation.id, watermark)
            .await?;
        self.inner.ctx.ensure_active()?;

        let mut changes = ChangeCounts::default();
        for remote in delta.records {
            if remote.conversation_id != conversation.id {
                warn!(
                    record_id = %remote.id,
                    conversation_id = %conversation.id,
                    "Ledger returned a record of another conversation, skipping"
                );
                continue;
            }
            let digest = remote.digest.clone();
            let existing = storage.get_record(&remote.id)?;
            let payload = match existing.as_ref() {
                Some(existing) if existing.has_payload() && existing.ciphertext == remote.ciphertext => {
                    existing.payload.clone().unwrap_or_else(DecryptedPayload::decryption_failed)
                }
                _ => self.decrypt(conversation, credential, &remote).await?,
            };
            if payload.is_decryption_failure() {
                report.decryption_failures += 1;
            }

            let record = remote.into_record(payload, self.inner.ctx.identity(), self.inner.clock.now_ms());
            match storage.upsert_record(&record)? {
                UpsertOutcome::Inserted => changes.inserted += 1,
                UpsertOutcome::Updated => changes.updated += 1,
                UpsertOutcome::Unchanged => {}
            }

            if let Some(digest) = digest {
                if storage.remove_record(&RecordId::pending(&digest))?.is_some() {
                    debug!(digest = %digest, "Confirmed optimistic record");
                    changes.removed += 1;
                }
            }
        }

        for id in delta.deleted {
            if storage.remove_record(&id)?.is_some() {
                changes.removed += 1;
            }
        }

        storage.save_watermark(&conversation.id, delta.watermark)?;

        if !changes.is_empty() {
            debug!(
                conversation_id = %conversation.id,
                inserted = changes.inserted,
                updated = changes.updated,
                removed = changes.removed,
                "Conversation changed"
            );
            self.emit(SyncEvent::RecordsChanged {
                conversation_id: conversation.id.clone(),
                changes,
            });
        }
        report.changes.absorb(changes);
        Ok(())
    }

    /// Decrypt one record, absorbing per-record failures into the sentinel
    async fn decrypt(
        &self,
        conversation: &Conversation,
        credential: &SessionCredential,
        remote: &RemoteRecord,
    ) -> MailResult<DecryptedPayload> {
        if remote.key_version != conversation.key_version {
            warn!(
                record_id = %remote.id,
                record_key_version = remote.key_version,
                conversation_key_version = conversation.key_version,
                "Key version mismatch, storing sentinel"
            );
            return Ok(DecryptedPayload::decryption_failed());
        }
        match self.inner.decryptor.decrypt(credential, conversation, remote).await {
            Ok(payload) => Ok(payload),
            Err(MailError::DecryptionFailed(reason)) => {
                warn!(record_id = %remote.id, reason = %reason, "Decryption failed, storing sentinel");
                Ok(DecryptedPayload::decryption_failed())
            }
            Err(e) => Err(e),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Local changes
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert a locally authored record (optimistic send) and advance the version
    pub fn record_local(&self, record: &Record) -> MailResult<UpsertOutcome> {
        let outcome = self.inner.storage.upsert_record(record)?;
        if outcome.is_change() {
            let changes = ChangeCounts {
                inserted: usize::from(outcome == UpsertOutcome::Inserted),
                updated: usize::from(outcome == UpsertOutcome::Updated),
                removed: 0,
            };
            self.emit(SyncEvent::RecordsChanged {
                conversation_id: record.conversation_id.clone(),
                changes,
            });
            self.bump_version();
        }
        Ok(outcome)
    }

    /// Register (or update) a conversation changed locally and advance the version
    pub fn register_local_conversation(&self, conversation: &Conversation) -> MailResult<()> {
        let is_new = self.inner.storage.load_conversation(&conversation.id)?.is_none();
        self.inner.storage.register_conversation(conversation)?;
        if is_new {
            self.emit(SyncEvent::ConversationsChanged {
                added: vec![conversation.id.clone()],
            });
        }
        self.bump_version();
        Ok(())
    }

    /// Mark every record of a conversation as read
    pub fn mark_conversation_read(&self, conversation_id: &ConversationId) -> MailResult<usize> {
        let flipped = self.inner.storage.mark_conversation_read(conversation_id)?;
        if flipped > 0 {
            self.emit(SyncEvent::RecordsChanged {
                conversation_id: conversation_id.clone(),
                changes: ChangeCounts {
                    updated: flipped,
                    ..Default::default()
                },
            });
            self.bump_version();
        }
        Ok(flipped)
    }

    /// Fetch the content of an attachment of a stored record
    pub async fn load_attachment(&self, record_id: &RecordId, blob_id: &str) -> MailResult<Vec<u8>> {
        let blobs = self
            .inner
            .blobs
            .as_ref()
            .ok_or_else(|| MailError::InvalidInput("no blob reader configured".to_string()))?;
        let record = self
            .inner
            .storage
            .get_record(record_id)?
            .ok_or_else(|| MailError::InvalidInput(format!("unknown record {}", record_id)))?;
        if !record.attachments.iter().any(|a| a.blob_id == blob_id) {
            return Err(MailError::InvalidInput(format!(
                "record {} has no attachment {}",
                record_id, blob_id
            )));
        }
        debug!(record_id = %record_id, blob_id = %blob_id, "Loading attachment");
        blobs.read_blob(blob_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Active conversation
    // ═══════════════════════════════════════════════════════════════════════

    /// Select the conversation being viewed.
    ///
    /// Releases the previous realtime subscription and, when an event source
    /// is configured, opens one for the new conversation that nudges the
    /// engine. Returns the selection epoch.
    pub async fn set_active_conversation(&self, conversation_id: Option<ConversationId>) -> MailResult<u64> {
        let epoch = self.inner.active_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.active.write() = conversation_id.clone().map(|id| ActiveConversation { id, epoch });

        if let Some(previous) = self.inner.subscription.lock().take() {
            previous.unsubscribe();
        }

        if let (Some(id), Some(source)) = (conversation_id, self.inner.events_source.clone()) {
            let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
            let subscription = RealtimeSubscription::subscribe(
                source.as_ref(),
                &self.inner.ctx,
                id,
                move |event| {
                    if let Some(inner) = weak.upgrade() {
                        debug!(event_id = %event.id, "Push signal, nudging sync");
                        inner.nudge.notify_one();
                    }
                },
            )
            .await?;

            // A newer selection may have landed while subscribing
            if self.inner.active_epoch.load(Ordering::SeqCst) == epoch {
                *self.inner.subscription.lock() = Some(subscription);
            } else {
                subscription.unsubscribe();
            }
        }
        Ok(epoch)
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.inner.active.read().as_ref().map(|a| a.id.clone())
    }

    /// True while a realtime subscription for the active conversation is open
    pub fn has_realtime_subscription(&self) -> bool {
        self.inner
            .subscription
            .lock()
            .as_ref()
            .map(|s| s.is_active())
            .unwrap_or(false)
    }

    /// Pull the active conversation and return its records.
    ///
    /// Returns `None` when nothing is selected, or when the selection changed
    /// while the pull was running (the stale result is discarded).
    pub async fn refresh_active(&self) -> MailResult<Option<Vec<Record>>> {
        let Some(active) = self.inner.active.read().clone() else {
            return Ok(None);
        };
        self.pull_conversation(&active.id).await?;

        let still_active = self
            .inner
            .active
            .read()
            .as_ref()
            .map(|a| a.epoch == active.epoch)
            .unwrap_or(false);
        if !still_active {
            debug!(conversation_id = %active.id, "Discarding stale refresh");
            return Ok(None);
        }
        Ok(Some(self.inner.storage.list_by_conversation(&active.id)?))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Background loop
    // ═══════════════════════════════════════════════════════════════════════

    /// Ask the background loop to pull now
    pub fn nudge(&self) {
        self.inner.nudge.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .poll_task
            .lock()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Start the periodic pull loop. Calling it again while running is a no-op.
    ///
    /// The loop pulls on every timer tick, push signal and nudge, and stops
    /// when the context is swapped, the engine is dropped, or [`Self::stop`]
    /// is called.
    pub fn start(&self) {
        let mut task = self.inner.poll_task.lock();
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let cancel = self.inner.ctx.cancellation();
        let period = self.inner.poll_interval;
        info!(interval_secs = period.as_secs(), "Starting sync loop");

        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let Some(inner) = weak.upgrade() else { break };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                    _ = inner.nudge.notified() => {}
                }
                let engine = SyncEngine { inner };
                match engine.pull().await {
                    Ok(_) => {}
                    Err(MailError::Cancelled(_)) => break,
                    Err(e) => warn!(error = %e, "Background pull failed"),
                }
            }
            debug!("Sync loop stopped");
        }));
    }

    /// Stop the periodic pull loop
    pub fn stop(&self) {
        if let Some(task) = self.inner.poll_task.lock().take() {
            task.abort();
            info!("Sync loop stopped");
        }
        if let Some(subscription) = self.inner.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }
}
