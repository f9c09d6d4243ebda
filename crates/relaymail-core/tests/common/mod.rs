//! Shared test doubles for the collaborator traits
//!
//! Each fake records what it was asked to do so tests can assert on the
//! exact sequence of calls.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use relaymail_core::capability::{CapabilityCache, MembershipLookup};
use relaymail_core::ledger::{
    BlobReader, LedgerClient, PayloadSealer, RecordDecryptor, RemoteDelta, RemoteRecord,
    SealedMessage, TransactionEffects,
};
use relaymail_core::messenger::Messenger;
use relaymail_core::realtime::{EventSource, RealtimeEvent};
use relaymail_core::session::{ManualClock, SessionCredential, SessionManager};
use relaymail_core::signer::{PersonalMessageSigner, SignerError, TransactionSigner};
use relaymail_core::sponsor::{
    ExecuteRequest, SponsorPolicy, SponsorRelay, SponsorRequest, SponsorService,
    SponsoredTransaction,
};
use relaymail_core::{
    AttachmentRef, CapabilityToken, ClientContext, Conversation, ConversationId, ConversationKind,
    DecryptedPayload, MailError, MailResult, Network, OutgoingAttachment, RecordId, Storage,
    SyncEngine,
};

pub const ME: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
pub const ALICE: &str = "0xaaaa00000000000000000000000000000000000000000000000000000000aaaa";
pub const BOB: &str = "0xbbbb00000000000000000000000000000000000000000000000000000000bbbb";
pub const PACKAGE: &str = "0x984960ebddd75c15c6d38355ac462621db0ffc7d6647214c802cd3b685e1af3d";

/// Ciphertext prefix the fake decryptor refuses to open
pub const UNREADABLE: &[u8] = b"!unreadable";

pub fn conversation(id: &str, kind: ConversationKind, members: &[&str], key_version: u64) -> Conversation {
    Conversation::new(
        ConversationId::new(id),
        kind,
        members.iter().map(|m| m.to_string()).collect(),
        key_version,
    )
    .unwrap()
}

pub fn remote_record(id: &str, conversation_id: &str, sender: &str, timestamp: i64, text: &str) -> RemoteRecord {
    RemoteRecord {
        id: RecordId::new(id),
        conversation_id: ConversationId::new(conversation_id),
        sender: sender.to_string(),
        timestamp,
        ciphertext: text.as_bytes().to_vec(),
        key_version: 1,
        attachments: Vec::new(),
        digest: None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Ledger
// ═══════════════════════════════════════════════════════════════════════════

/// In-memory ledger: records get a sequence number per conversation
#[derive(Default)]
pub struct FakeLedger {
    memberships: Mutex<Vec<Conversation>>,
    records: Mutex<HashMap<ConversationId, Vec<(u64, RemoteRecord)>>>,
    deleted: Mutex<HashMap<ConversationId, Vec<RecordId>>>,
    effects: Mutex<HashMap<String, TransactionEffects>>,
    pub fetch_calls: AtomicUsize,
    pub membership_calls: AtomicUsize,
    pub offline: AtomicBool,
}

impl FakeLedger {
    pub fn add_membership(&self, conversation: Conversation) {
        let mut memberships = self.memberships.lock();
        memberships.retain(|c| c.id != conversation.id);
        memberships.push(conversation);
    }

    pub fn remove_membership(&self, id: &str) {
        self.memberships.lock().retain(|c| c.id.as_str() != id);
    }

    /// Append a record; returns its sequence number
    pub fn push(&self, record: RemoteRecord) -> u64 {
        let mut records = self.records.lock();
        let list = records.entry(record.conversation_id.clone()).or_default();
        let seq = list.last().map(|(s, _)| s + 1).unwrap_or(1);
        list.push((seq, record));
        seq
    }

    pub fn delete(&self, conversation_id: &ConversationId, id: RecordId) {
        self.deleted
            .lock()
            .entry(conversation_id.clone())
            .or_default()
            .push(id);
    }

    pub fn set_effects(&self, digest: &str, created: &[&str]) {
        self.effects.lock().insert(
            digest.to_string(),
            TransactionEffects {
                digest: digest.to_string(),
                created_conversations: created.iter().map(|c| ConversationId::new(*c)).collect(),
            },
        );
    }

    fn check_online(&self) -> MailResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MailError::NetworkUnavailable("ledger offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn memberships(&self, owner: &str) -> MailResult<Vec<Conversation>> {
        self.check_online()?;
        self.membership_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .memberships
            .lock()
            .iter()
            .filter(|c| c.has_member(owner))
            .cloned()
            .collect())
    }

    async fn fetch_since(
        &self,
        conversation_id: &ConversationId,
        watermark: Option<u64>,
    ) -> MailResult<RemoteDelta> {
        self.check_online()?;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let after = watermark.unwrap_or(0);
        let records = self.records.lock();
        let list = records.get(conversation_id).cloned().unwrap_or_default();
        let latest = list.last().map(|(s, _)| *s).unwrap_or(0).max(after);
        Ok(RemoteDelta {
            records: list
                .into_iter()
                .filter(|(seq, _)| *seq > after)
                .map(|(_, r)| r)
                .collect(),
            deleted: self
                .deleted
                .lock()
                .remove(conversation_id)
                .unwrap_or_default(),
            watermark: latest,
        })
    }

    async fn wait_for_transaction(&self, digest: &str) -> MailResult<TransactionEffects> {
        self.check_online()?;
        Ok(self
            .effects
            .lock()
            .get(digest)
            .cloned()
            .unwrap_or_else(|| TransactionEffects {
                digest: digest.to_string(),
                created_conversations: Vec::new(),
            }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Encryption
// ═══════════════════════════════════════════════════════════════════════════

/// "Decrypts" by reading the ciphertext as UTF-8
#[derive(Default)]
pub struct FakeDecryptor {
    pub calls: AtomicUsize,
}

#[async_trait]
impl RecordDecryptor for FakeDecryptor {
    async fn decrypt(
        &self,
        _credential: &SessionCredential,
        _conversation: &Conversation,
        record: &RemoteRecord,
    ) -> MailResult<DecryptedPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if record.ciphertext.starts_with(UNREADABLE) {
            return Err(MailError::DecryptionFailed("bad key".to_string()));
        }
        String::from_utf8(record.ciphertext.clone())
            .map(DecryptedPayload::text)
            .map_err(|e| MailError::DecryptionFailed(e.to_string()))
    }
}

/// "Seals" by storing the text bytes as they are
#[derive(Default)]
pub struct FakeSealer {
    pub sealed: AtomicUsize,
}

#[async_trait]
impl PayloadSealer for FakeSealer {
    async fn new_conversation_key(&self, _credential: &SessionCredential) -> MailResult<Vec<u8>> {
        Ok(vec![7; 32])
    }

    async fn seal(
        &self,
        _credential: &SessionCredential,
        conversation: &Conversation,
        payload: &DecryptedPayload,
        attachment: Option<&OutgoingAttachment>,
    ) -> MailResult<SealedMessage> {
        self.sealed.fetch_add(1, Ordering::SeqCst);
        Ok(SealedMessage {
            ciphertext: payload.text.as_bytes().to_vec(),
            key_version: conversation.key_version,
            attachments: attachment
                .map(|a| AttachmentRef {
                    blob_id: format!("blob-{}", a.file_name),
                    file_name: a.file_name.clone(),
                    mime_type: a.mime_type.clone(),
                    size: a.data.len() as u64,
                })
                .into_iter()
                .collect(),
        })
    }
}

#[derive(Default)]
pub struct FakeBlobs {
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobReader for FakeBlobs {
    async fn read_blob(&self, blob_id: &str) -> MailResult<Vec<u8>> {
        self.blobs
            .lock()
            .get(blob_id)
            .cloned()
            .ok_or_else(|| MailError::NetworkUnavailable(format!("no blob {}", blob_id)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Wallet
// ═══════════════════════════════════════════════════════════════════════════

/// Wallet that signs everything unless told to decline
#[derive(Default)]
pub struct FakeWallet {
    pub decline: AtomicBool,
    pub personal_signatures: AtomicUsize,
    pub signed_transactions: Mutex<Vec<Vec<u8>>>,
}

impl FakeWallet {
    pub fn signed(&self) -> Vec<Vec<u8>> {
        self.signed_transactions.lock().clone()
    }
}

#[async_trait]
impl PersonalMessageSigner for FakeWallet {
    async fn sign_personal_message(&self, _address: &str, message: &[u8]) -> Result<String, SignerError> {
        if self.decline.load(Ordering::SeqCst) {
            return Err(SignerError::Declined("user rejected".to_string()));
        }
        self.personal_signatures.fetch_add(1, Ordering::SeqCst);
        Ok(format!("personal-sig-{}", hex::encode(blake3::hash(message).as_bytes())))
    }
}

#[async_trait]
impl TransactionSigner for FakeWallet {
    async fn sign_transaction(&self, _address: &str, tx_bytes: &[u8]) -> Result<String, SignerError> {
        if self.decline.load(Ordering::SeqCst) {
            return Err(SignerError::Declined("user rejected".to_string()));
        }
        self.signed_transactions.lock().push(tx_bytes.to_vec());
        Ok(format!("tx-sig-{}", tx_bytes.len()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Sponsor
// ═══════════════════════════════════════════════════════════════════════════

/// Sponsor returning scripted `(bytes, digest)` pairs and final digests
pub struct FakeSponsor {
    responses: Mutex<Vec<(Vec<u8>, String, String)>>,
    pub reject: AtomicBool,
    pub sponsor_requests: Mutex<Vec<SponsorRequest>>,
    pub execute_requests: Mutex<Vec<ExecuteRequest>>,
}

impl FakeSponsor {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            reject: AtomicBool::new(false),
            sponsor_requests: Mutex::new(Vec::new()),
            execute_requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue one transaction: sponsor answers `{bytes, provisional}`, execute answers `final_digest`
    pub fn script(&self, bytes: &[u8], provisional: &str, final_digest: &str) {
        self.responses
            .lock()
            .push((bytes.to_vec(), provisional.to_string(), final_digest.to_string()));
    }
}

#[async_trait]
impl SponsorService for FakeSponsor {
    async fn sponsor(&self, request: &SponsorRequest) -> MailResult<SponsoredTransaction> {
        self.sponsor_requests.lock().push(request.clone());
        if self.reject.load(Ordering::SeqCst) {
            return Err(MailError::SponsorshipRejected("Move call not allowed".to_string()));
        }
        let responses = self.responses.lock();
        let index = self.sponsor_requests.lock().len() - 1;
        let (bytes, digest, _) = responses
            .get(index)
            .cloned()
            .ok_or_else(|| MailError::NetworkUnavailable("no scripted response".to_string()))?;
        Ok(SponsoredTransaction { bytes, digest })
    }

    async fn execute(&self, request: &ExecuteRequest) -> MailResult<String> {
        self.execute_requests.lock().push(request.clone());
        let responses = self.responses.lock();
        responses
            .iter()
            .find(|(_, provisional, _)| *provisional == request.digest)
            .map(|(_, _, final_digest)| final_digest.clone())
            .ok_or_else(|| MailError::SponsorshipRejected("unknown digest".to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Memberships and push events
// ═══════════════════════════════════════════════════════════════════════════

/// Capability lookup backed by a map, with an optional delay
#[derive(Default)]
pub struct FakeMemberships {
    tokens: Mutex<HashMap<ConversationId, CapabilityToken>>,
    pub calls: AtomicUsize,
    pub delay_ms: AtomicUsize,
}

impl FakeMemberships {
    pub fn grant(&self, token: CapabilityToken) {
        self.tokens.lock().insert(token.conversation_id.clone(), token);
    }
}

#[async_trait]
impl MembershipLookup for FakeMemberships {
    async fn lookup(
        &self,
        conversation_id: &ConversationId,
        owner: &str,
    ) -> MailResult<Option<CapabilityToken>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self
            .tokens
            .lock()
            .get(conversation_id)
            .filter(|t| t.owner == owner)
            .cloned())
    }
}

/// Push source whose events are injected by the test
#[derive(Default)]
pub struct FakeEvents {
    sender: Mutex<Option<mpsc::Sender<RealtimeEvent>>>,
    pub opened: AtomicUsize,
}

impl FakeEvents {
    pub async fn emit(&self, id: &str, conversation_id: &str) -> bool {
        let sender = self.sender.lock().clone();
        match sender {
            Some(tx) => tx
                .send(RealtimeEvent {
                    id: id.to_string(),
                    payload: serde_json::json!({ "channelId": conversation_id }),
                })
                .await
                .is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl EventSource for FakeEvents {
    async fn open(&self) -> MailResult<mpsc::Receiver<RealtimeEvent>> {
        let (tx, rx) = mpsc::channel(32);
        *self.sender.lock() = Some(tx);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════════

/// A fully wired client for `ME` on testnet
pub struct TestClient {
    pub dir: TempDir,
    pub ctx: ClientContext,
    pub storage: Storage,
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<FakeLedger>,
    pub decryptor: Arc<FakeDecryptor>,
    pub sealer: Arc<FakeSealer>,
    pub wallet: Arc<FakeWallet>,
    pub sponsor: Arc<FakeSponsor>,
    pub memberships: Arc<FakeMemberships>,
    pub events: Arc<FakeEvents>,
    pub blobs: Arc<FakeBlobs>,
    pub session: Arc<SessionManager>,
    pub engine: SyncEngine,
    pub capabilities: CapabilityCache,
    pub messenger: Messenger,
}

pub fn create_test_client() -> TestClient {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path().join("test.redb")).unwrap();
    let ctx = ClientContext::new(ME, Network::Testnet).unwrap();
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let ledger = Arc::new(FakeLedger::default());
    let decryptor = Arc::new(FakeDecryptor::default());
    let sealer = Arc::new(FakeSealer::default());
    let wallet = Arc::new(FakeWallet::default());
    let sponsor = Arc::new(FakeSponsor::new());
    let memberships = Arc::new(FakeMemberships::default());
    let events = Arc::new(FakeEvents::default());
    let blobs = Arc::new(FakeBlobs::default());

    let session = Arc::new(SessionManager::new(
        ctx.clone(),
        storage.clone(),
        wallet.clone(),
        clock.clone(),
        vec![PACKAGE.to_string()],
        30,
    ));
    let engine = SyncEngine::builder(
        ctx.clone(),
        storage.clone(),
        ledger.clone(),
        decryptor.clone(),
        session.clone(),
    )
    .blob_reader(blobs.clone())
    .event_source(events.clone())
    .clock(clock.clone())
    .poll_interval(Duration::from_secs(3600))
    .build();
    let capabilities = CapabilityCache::new(ctx.clone(), memberships.clone());
    let relay = SponsorRelay::new(ctx.clone(), sponsor.clone(), SponsorPolicy::for_package(PACKAGE));
    let messenger = Messenger::new(
        engine.clone(),
        capabilities.clone(),
        relay,
        sealer.clone(),
        wallet.clone(),
        PACKAGE,
    );

    TestClient {
        dir,
        ctx,
        storage,
        clock,
        ledger,
        decryptor,
        sealer,
        wallet,
        sponsor,
        memberships,
        events,
        blobs,
        session,
        engine,
        capabilities,
        messenger,
    }
}
