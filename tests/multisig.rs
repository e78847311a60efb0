//! Multi-controller documents: thresholds, countersigning across stores and
//! publication.

use elastos_did::{Did, Document, DocumentBuilder, Error, PublishOptions};
use test_utils::{PASSWORD, TestStore, backend, published_did, store};

// Two stores sharing one registry, each holding one published controller.
async fn controllers() -> (TestStore, Document, TestStore, Document) {
    let backend = backend();

    let store_a = store(&backend);
    let identity = store_a.create_root_identity(None, PASSWORD).await.expect("should create identity");
    let a = published_did(&store_a, &identity).await;

    let store_b = store(&backend);
    let identity = store_b.create_root_identity(None, PASSWORD).await.expect("should create identity");
    let b = published_did(&store_b, &identity).await;

    (store_a, a, store_b, b)
}

#[tokio::test]
async fn one_of_two() {
    let (store_a, a, _, b) = controllers().await;
    let subject = Did::new("examplecorp").expect("should create DID");
    let controllers = [a.subject().clone(), b.subject().clone()];

    let doc = store_a
        .new_customized_did(&subject, &controllers, Some(1), a.subject(), PASSWORD)
        .await
        .expect("should create customized DID");
    assert_eq!(doc.controller_count(), 2);
    assert_eq!(doc.proofs().len(), 1);
    assert!(doc.is_valid());

    store_a.publish(&doc, PublishOptions::default(), PASSWORD).await.expect("should publish");
    let resolved = store_a.resolve_did(&subject, true).await.expect("should resolve").expect("should exist");
    assert!(resolved.is_valid());
    assert_eq!(resolved.multisig().map(|ms| (ms.m, ms.n)), Some((1, 2)));
}

#[tokio::test]
async fn two_of_two() {
    let (store_a, a, store_b, b) = controllers().await;
    let subject = Did::new("foobar").expect("should create DID");
    let controllers = [a.subject().clone(), b.subject().clone()];

    let doc = store_a
        .new_customized_did(&subject, &controllers, Some(2), a.subject(), PASSWORD)
        .await
        .expect("should create customized DID");
    assert!(!doc.is_valid());
    assert!(!doc.is_qualified());

    let err = store_a.publish(&doc, PublishOptions::default(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::Authorization(_)));

    let err = store_a.sign_document(&doc, a.subject(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::AlreadySigned(did) if &did == a.subject()));

    // hand the draft to B as JSON
    let draft = Document::from_json(&doc.to_json().expect("should serialize")).expect("should parse");
    let signed = store_b.sign_document(&draft, b.subject(), PASSWORD).await.expect("should countersign");
    assert_eq!(signed.proofs().len(), 2);
    assert!(signed.is_valid());

    let err = store_a.sign_document(&signed, a.subject(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::AlreadySealed));

    store_b.publish(&signed, PublishOptions::default(), PASSWORD).await.expect("should publish");
    let resolved = store_a.resolve_did(&subject, true).await.expect("should resolve").expect("should exist");
    assert!(resolved.is_valid());
    assert_eq!(resolved.proofs().len(), 2);
}

#[tokio::test]
async fn update_requires_threshold() {
    let (store_a, a, store_b, b) = controllers().await;
    let subject = Did::new("update2of2").expect("should create DID");
    let controllers = [a.subject().clone(), b.subject().clone()];

    let doc = store_a
        .new_customized_did(&subject, &controllers, Some(2), a.subject(), PASSWORD)
        .await
        .expect("should create customized DID");
    let doc = store_b.sign_document(&doc, b.subject(), PASSWORD).await.expect("should countersign");
    let published = store_b.publish(&doc, PublishOptions::default(), PASSWORD).await.expect("should publish");

    // B edits, A countersigns and publishes
    let mut builder = DocumentBuilder::edit_as(&published, &b).expect("should edit");
    let service_id = subject.url("vault").expect("should build id");
    builder.add_service(&service_id, "CredentialRepositoryService", "https://vault.example.com", None).expect("should add service");
    let edited = store_b.seal(&builder, b.subject(), PASSWORD).await.expect("should seal");

    let err = store_b.publish(&edited, PublishOptions::default(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::Authorization(_)));

    let edited = store_a.sign_document(&edited, a.subject(), PASSWORD).await.expect("should countersign");
    store_a.publish(&edited, PublishOptions::default(), PASSWORD).await.expect("should publish update");

    let resolved = store_b.resolve_did(&subject, true).await.expect("should resolve").expect("should exist");
    assert!(resolved.service(&service_id).is_some());

    let biography = store_b.resolve_did_biography(&subject).await.expect("should resolve biography");
    assert_eq!(biography.transactions.len(), 2);
    assert!(biography.transactions.iter().all(|tx| tx.valid));
}

#[tokio::test]
async fn changed_controllers_conflict() {
    let (store_a, a, _, b) = controllers().await;
    let subject = Did::new("movingtarget").expect("should create DID");

    let doc = store_a
        .new_customized_did(&subject, &[a.subject().clone()], None, a.subject(), PASSWORD)
        .await
        .expect("should create customized DID");
    let published = store_a.publish(&doc, PublishOptions::default(), PASSWORD).await.expect("should publish");

    let mut builder = DocumentBuilder::edit_as(&published, &a).expect("should edit");
    builder.add_controller(&b).expect("should add controller");
    builder.set_multisig(1).expect("should set multisig");
    let edited = store_a.seal(&builder, a.subject(), PASSWORD).await.expect("should seal");

    let err = store_a.publish(&edited, PublishOptions::default(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::Conflict(msg) if msg == "controllers changed"));
}
