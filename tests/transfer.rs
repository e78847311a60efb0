//! Transfer of a customized DID to a new controller with a ticket.

use elastos_did::{Did, Document, DocumentBuilder, Error, PublishOptions, TransferTicket};
use test_utils::{PASSWORD, TestStore, published_did, store_with_identity};

struct Fixture {
    store: TestStore,
    a: Document,
    b: Document,
    d: Document,
    subject: Did,
}

// A 2-of-3 DID controlled by A, B and C, plus an outsider D.
async fn fixture() -> Fixture {
    let (store, identity) = store_with_identity().await;
    let a = published_did(&store, &identity).await;
    let b = published_did(&store, &identity).await;
    let c = published_did(&store, &identity).await;
    let d = published_did(&store, &identity).await;

    let subject = Did::new("transferable").expect("should create DID");
    let controllers = [a.subject().clone(), b.subject().clone(), c.subject().clone()];
    let doc = store
        .new_customized_did(&subject, &controllers, Some(2), a.subject(), PASSWORD)
        .await
        .expect("should create customized DID");
    let doc = store.sign_document(&doc, b.subject(), PASSWORD).await.expect("should countersign");
    store.publish(&doc, PublishOptions::default(), PASSWORD).await.expect("should publish");

    Fixture { store, a, b, d, subject }
}

// The document D will publish after the transfer.
async fn handover(f: &Fixture) -> Document {
    let builder = DocumentBuilder::new_customized(f.subject.clone(), &[f.d.clone()], None)
        .expect("should create builder");
    f.store.seal(&builder, f.d.subject(), PASSWORD).await.expect("should seal")
}

#[tokio::test]
async fn transfer_to_new_controller() {
    let f = fixture().await;

    let ticket = f
        .store
        .create_transfer_ticket(&f.subject, f.a.subject(), f.d.subject(), PASSWORD)
        .await
        .expect("should create ticket");
    let ticket = f.store.sign_transfer_ticket(&ticket, f.b.subject(), PASSWORD).await.expect("should sign ticket");
    assert_eq!(ticket.proofs().len(), 2);

    let resolved = f.store.resolve_did(&f.subject, true).await.expect("should resolve").expect("should exist");
    assert!(ticket.is_valid(&resolved));

    // tickets travel between parties in encoded form
    let ticket = TransferTicket::decode(&ticket.encode().expect("should encode")).expect("should decode");

    let doc = handover(&f).await;
    let options = PublishOptions::default().ticket(ticket.clone());
    f.store.publish(&doc, options, PASSWORD).await.expect("should transfer");

    let resolved = f.store.resolve_did(&f.subject, true).await.expect("should resolve").expect("should exist");
    assert_eq!(resolved.controllers().dids(), [f.d.subject().clone()]);
    assert!(resolved.is_valid());

    // the ticket was bound to the previous transaction
    let err = f.store.publish(&doc, PublishOptions::default().ticket(ticket), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn under_signed_ticket() {
    let f = fixture().await;

    let ticket = f
        .store
        .create_transfer_ticket(&f.subject, f.a.subject(), f.d.subject(), PASSWORD)
        .await
        .expect("should create ticket");
    let err = f.store.sign_transfer_ticket(&ticket, f.a.subject(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::AlreadySigned(did) if &did == f.a.subject()));

    let doc = handover(&f).await;
    let err = f.store.publish(&doc, PublishOptions::default().ticket(ticket), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::Authorization(_)));
}

#[tokio::test]
async fn recipient_must_control_new_document() {
    let f = fixture().await;

    let ticket = f
        .store
        .create_transfer_ticket(&f.subject, f.a.subject(), f.d.subject(), PASSWORD)
        .await
        .expect("should create ticket");
    let ticket = f.store.sign_transfer_ticket(&ticket, f.b.subject(), PASSWORD).await.expect("should sign ticket");

    // a document still controlled by A
    let builder = DocumentBuilder::new_customized(f.subject.clone(), &[f.a.clone()], None)
        .expect("should create builder");
    let doc = f.store.seal(&builder, f.a.subject(), PASSWORD).await.expect("should seal");

    let err = f.store.publish(&doc, PublishOptions::default().ticket(ticket), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn outsider_cannot_issue_ticket() {
    let f = fixture().await;

    let err = f
        .store
        .create_transfer_ticket(&f.subject, f.d.subject(), f.d.subject(), PASSWORD)
        .await
        .expect_err("should fail");
    assert!(matches!(err, Error::Authorization(_)));
}

#[tokio::test]
async fn normal_did_is_not_transferable() {
    let f = fixture().await;
    let resolved = f.store.resolve_did(f.a.subject(), true).await.expect("should resolve").expect("should exist");

    let err = TransferTicket::new(&resolved, f.d.subject().clone()).expect_err("should fail");
    assert!(matches!(err, Error::InvalidArgument(_)));
}
