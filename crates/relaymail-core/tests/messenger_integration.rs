//! End-to-end tests for sponsored writes
//!
//! Each test wires a full client against in-memory doubles and checks both
//! the relay traffic and what ends up in the local store.

mod common;

use std::sync::atomic::Ordering;

use common::*;
use relaymail_core::{
    CapabilityToken, ComposeDraft, ConversationId, ConversationKind, MailError, OutgoingAttachment,
    RecordId,
};

fn join_direct(client: &TestClient, id: &str) -> ConversationId {
    let convo = conversation(id, ConversationKind::Direct, &[ME, ALICE], 1);
    client.storage.register_conversation(&convo).unwrap();
    client.ledger.add_membership(convo.clone());
    client
        .memberships
        .grant(CapabilityToken::new(convo.id.clone(), ME, "0xmembercap"));
    convo.id
}

#[tokio::test]
async fn test_send_relays_exact_bytes_and_pull_confirms() {
    let client = create_test_client();
    let id = join_direct(&client, "0xc1");
    client.sponsor.script(b"sponsored-tx-X", "d1", "d2");

    let mut draft = ComposeDraft::new("hello alice");
    let sent = client.messenger.send_message(&id, &mut draft).await.unwrap();

    // sponsor {X, d1} -> sign(X) -> execute(d1) -> d2
    assert_eq!(client.wallet.signed(), vec![b"sponsored-tx-X".to_vec()]);
    let executed = client.sponsor.execute_requests.lock().clone();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].digest, "d1");
    assert_eq!(executed[0].signature, format!("tx-sig-{}", b"sponsored-tx-X".len()));

    let request = client.sponsor.sponsor_requests.lock()[0].clone();
    assert_eq!(request.sender, ME);
    assert_eq!(request.allowed_addresses, vec![ME.to_string()]);
    assert!(request
        .allowed_call_targets
        .contains(&format!("{}::channel::send_message", PACKAGE)));

    // Optimistic copy keyed by the final digest, draft cleared
    assert_eq!(sent.id, RecordId::pending("d2"));
    assert!(sent.is_read);
    assert!(draft.is_empty());
    let version_after_send = client.engine.version();
    assert!(version_after_send >= 1);

    // The ledger now carries the message under digest d2
    let mut confirmed = remote_record("0xr1", "0xc1", ME, 1_700_000_000_500, "hello alice");
    confirmed.digest = Some("d2".to_string());
    client.ledger.push(confirmed);

    let report = client.engine.pull().await.unwrap();
    assert_eq!(report.changes.inserted, 1);
    assert_eq!(report.changes.removed, 1);
    assert_eq!(report.version, version_after_send + 1);

    let records = client.storage.list_by_conversation(&id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, RecordId::new("0xr1"));
    assert_eq!(records[0].digest.as_deref(), Some("d2"));
    assert_eq!(records[0].text(), "hello alice");
    assert!(records[0].is_read);
}

#[tokio::test]
async fn test_rejected_sponsorship_keeps_draft_and_never_signs() {
    let client = create_test_client();
    let id = join_direct(&client, "0xc1");
    client.sponsor.reject.store(true, Ordering::SeqCst);

    let attachment = OutgoingAttachment::new("a.txt", "text/plain", b"abc".to_vec());
    let mut draft = ComposeDraft::new("keep me").with_attachment(attachment.clone());
    let err = client.messenger.send_message(&id, &mut draft).await.unwrap_err();

    assert!(matches!(err, MailError::SponsorshipRejected(_)));
    assert_eq!(draft.text, "keep me");
    assert_eq!(draft.attachment, Some(attachment));
    assert!(client.wallet.signed().is_empty());
    assert!(client.sponsor.execute_requests.lock().is_empty());
    assert!(client.storage.list_by_conversation(&id).unwrap().is_empty());
}

#[tokio::test]
async fn test_declined_signature_keeps_draft() {
    let client = create_test_client();
    let id = join_direct(&client, "0xc1");
    client.sponsor.script(b"tx", "d1", "d2");
    // Session first, so only the transaction signature is declined
    client.session.ensure_session().await.unwrap();
    client.wallet.decline.store(true, Ordering::SeqCst);

    let mut draft = ComposeDraft::new("not now");
    let err = client.messenger.send_message(&id, &mut draft).await.unwrap_err();

    assert!(matches!(err, MailError::SignatureDeclined(_)));
    assert_eq!(draft.text, "not now");
    assert!(client.sponsor.execute_requests.lock().is_empty());
}

#[tokio::test]
async fn test_send_requires_membership() {
    let client = create_test_client();
    let convo = conversation("0xc1", ConversationKind::Direct, &[ME, ALICE], 1);
    client.storage.register_conversation(&convo).unwrap();

    let mut draft = ComposeDraft::new("hi");
    let err = client
        .messenger
        .send_message(&convo.id, &mut draft)
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::NotAMember(_)));
    assert!(client.sponsor.sponsor_requests.lock().is_empty());

    // Not cached: granting membership makes the next attempt succeed
    client
        .memberships
        .grant(CapabilityToken::new(convo.id.clone(), ME, "0xcap"));
    client.sponsor.script(b"tx", "d1", "d2");
    client.messenger.send_message(&convo.id, &mut draft).await.unwrap();
    assert!(draft.is_empty());
}

#[tokio::test]
async fn test_send_validates_draft_and_conversation() {
    let client = create_test_client();

    let mut empty = ComposeDraft::new("   ");
    let err = client
        .messenger
        .send_message(&ConversationId::new("0xc1"), &mut empty)
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::InvalidInput(_)));

    let mut draft = ComposeDraft::new("hi");
    let err = client
        .messenger
        .send_message(&ConversationId::new("0xunknown"), &mut draft)
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::ConversationNotFound(_)));
}

#[tokio::test]
async fn test_send_with_attachment() {
    let client = create_test_client();
    let id = join_direct(&client, "0xc1");
    client.sponsor.script(b"tx", "d1", "d2");

    let mut draft = ComposeDraft::new("photo")
        .with_attachment(OutgoingAttachment::new("cat.png", "image/png", vec![0; 16]));
    let sent = client.messenger.send_message(&id, &mut draft).await.unwrap();

    assert_eq!(sent.attachments.len(), 1);
    assert_eq!(sent.attachments[0].blob_id, "blob-cat.png");
    assert_eq!(
        sent.payload.as_ref().and_then(|p| p.file.as_ref()).map(|f| f.size),
        Some(16)
    );
    assert!(draft.attachment.is_none());
}

#[tokio::test]
async fn test_create_direct_conversation() {
    let client = create_test_client();
    client.sponsor.script(b"create-tx", "p1", "f1");
    client.sponsor.script(b"key-tx", "p2", "f2");
    client.ledger.set_effects("f1", &["0xnew"]);
    client.memberships.grant(
        CapabilityToken::new(ConversationId::new("0xnew"), ME, "0xmember").with_creator_cap("0xcreator"),
    );

    let created = client
        .messenger
        .create_conversation(&[ALICE.to_string()], ConversationKind::Direct)
        .await
        .unwrap();

    assert_eq!(created.id, ConversationId::new("0xnew"));
    assert_eq!(created.kind, ConversationKind::Direct);
    assert_eq!(created.members, vec![ME.to_string(), ALICE.to_string()]);
    assert_eq!(client.wallet.signed(), vec![b"create-tx".to_vec(), b"key-tx".to_vec()]);

    let stored = client.storage.load_conversation(&created.id).unwrap().unwrap();
    assert_eq!(stored.kind, ConversationKind::Direct);
    assert!(client
        .storage
        .list_conversations()
        .unwrap()
        .contains(&created.id));
}

#[tokio::test]
async fn test_create_direct_conversation_needs_one_counterpart() {
    let client = create_test_client();

    let err = client
        .messenger
        .create_conversation(&[ALICE.to_string(), BOB.to_string()], ConversationKind::Direct)
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::InvalidInput(_)));

    let err = client
        .messenger
        .create_conversation(&[ME.to_string()], ConversationKind::Group)
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::InvalidInput(_)));
    assert!(client.sponsor.sponsor_requests.lock().is_empty());
}

#[tokio::test]
async fn test_add_members_requires_creator_cap() {
    let client = create_test_client();
    let id = join_direct(&client, "0xc1");

    let err = client
        .messenger
        .add_members(&id, &[BOB.to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::AuthorizationDenied(_)));
    assert!(client.sponsor.sponsor_requests.lock().is_empty());
}

#[tokio::test]
async fn test_add_members_keeps_kind() {
    let client = create_test_client();
    let convo = conversation("0xc1", ConversationKind::Direct, &[ME, ALICE], 1);
    client.storage.register_conversation(&convo).unwrap();
    client.memberships.grant(
        CapabilityToken::new(convo.id.clone(), ME, "0xmember").with_creator_cap("0xcreator"),
    );
    client.sponsor.script(b"add-tx", "p1", "f1");

    let digest = client
        .messenger
        .add_members(&convo.id, &[BOB.to_string(), ALICE.to_string()])
        .await
        .unwrap();

    assert_eq!(digest, "f1");
    let stored = client.storage.load_conversation(&convo.id).unwrap().unwrap();
    assert_eq!(stored.members.len(), 3);
    assert_eq!(stored.kind, ConversationKind::Direct);
}

#[tokio::test]
async fn test_concurrent_sends_share_one_capability_lookup() {
    let client = create_test_client();
    let id = join_direct(&client, "0xc1");
    client.memberships.delay_ms.store(50, Ordering::SeqCst);

    let resolves = (0..8).map(|_| {
        let caps = client.capabilities.clone();
        let id = id.clone();
        tokio::spawn(async move { caps.resolve(&id).await })
    });
    for handle in resolves.collect::<Vec<_>>() {
        assert_eq!(handle.await.unwrap().unwrap().member_cap_id, "0xmembercap");
    }
    assert_eq!(client.memberships.calls.load(Ordering::SeqCst), 1);
}
