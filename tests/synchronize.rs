//! Recovering DIDs from a root identity and reconciling local edits with
//! the registry.

use elastos_did::{ConflictResolver, Did, Document, DocumentBuilder, Error, PublishOptions};
use test_utils::{PASSWORD, TestStore, backend, published_did, store};

const SEED: [u8; 32] = [7; 32];

// Two stores holding the same root identity over one registry.
async fn replicas() -> (TestStore, TestStore, String) {
    let backend = backend();
    let first = store(&backend);
    let identity = first.create_root_identity(Some(SEED), PASSWORD).await.expect("should create identity");
    let second = store(&backend);
    let replica = second.create_root_identity(Some(SEED), PASSWORD).await.expect("should create identity");
    assert_eq!(identity, replica);
    (first, second, identity)
}

// Add a service to the stored copy of `did` and seal it.
async fn edit(store: &TestStore, did: &Did, fragment: &str) -> Document {
    let doc = store.load_document(did).await.expect("should load").expect("should exist");
    let mut builder = DocumentBuilder::edit(&doc);
    let id = did.url(fragment).expect("should build id");
    builder.add_service(&id, "LinkedDomains", "https://example.com", None).expect("should add service");
    let edited = store.seal(&builder, did, PASSWORD).await.expect("should seal");
    store.store_document(&edited).await.expect("should store");
    edited
}

fn has_service(doc: &Document, fragment: &str) -> bool {
    doc.subject().url(fragment).is_ok_and(|id| doc.service(&id).is_some())
}

#[tokio::test]
async fn recover_from_seed() {
    let (first, second, identity) = replicas().await;
    let mut published = vec![];
    for _ in 0..3 {
        published.push(published_did(&first, &identity).await.subject().clone());
    }
    // a gap in the derivation sequence
    first.new_did(&identity, PASSWORD).await.expect("should create DID");
    published.push(published_did(&first, &identity).await.subject().clone());

    let report = second.synchronize(None, PASSWORD).await.expect("should synchronize");
    assert_eq!(report.dids, published);

    for did in &published {
        let doc = second.load_document(did).await.expect("should load").expect("should exist");
        assert_eq!(doc.metadata().root_identity.as_deref(), Some(identity.as_str()));
        assert!(second.default_signer(did, PASSWORD).await.is_ok());
    }

    // derivation resumes after the highest recovered index
    let record = second.root_identity(&identity).await.expect("should load identity");
    assert_eq!(record.index, 5);
    let next = second.new_did(&identity, PASSWORD).await.expect("should create DID");
    assert_eq!(next.metadata().index, Some(5));
}

#[tokio::test]
async fn refresh_unchanged_copy() {
    let (first, second, identity) = replicas().await;
    let did = published_did(&first, &identity).await.subject().clone();
    second.synchronize(None, PASSWORD).await.expect("should synchronize");

    let updated = edit(&first, &did, "home").await;
    first.publish(&updated, PublishOptions::default(), PASSWORD).await.expect("should publish update");

    second.synchronize(None, PASSWORD).await.expect("should synchronize");
    let doc = second.load_document(&did).await.expect("should load").expect("should exist");
    assert!(has_service(&doc, "home"));
    assert_eq!(doc.signature(), updated.signature());
}

#[tokio::test]
async fn keep_local_by_default() {
    let (first, second, identity) = replicas().await;
    let did = published_did(&first, &identity).await.subject().clone();
    second.synchronize(None, PASSWORD).await.expect("should synchronize");

    let remote = edit(&first, &did, "remote").await;
    first.publish(&remote, PublishOptions::default(), PASSWORD).await.expect("should publish update");
    edit(&second, &did, "local").await;

    second.synchronize(None, PASSWORD).await.expect("should synchronize");
    let doc = second.load_document(&did).await.expect("should load").expect("should exist");
    assert!(has_service(&doc, "local"));
    assert!(!has_service(&doc, "remote"));
    assert_eq!(doc.metadata().signature.as_deref(), remote.signature());

    // the kept copy now descends from the registry copy
    second.publish(&doc, PublishOptions::default(), PASSWORD).await.expect("should publish local copy");
    let resolved = second.resolve_did(&did, true).await.expect("should resolve").expect("should exist");
    assert!(has_service(&resolved, "local"));
}

#[tokio::test]
async fn custom_resolver() {
    let (first, second, identity) = replicas().await;
    let did = published_did(&first, &identity).await.subject().clone();
    second.synchronize(None, PASSWORD).await.expect("should synchronize");

    let remote = edit(&first, &did, "remote").await;
    first.publish(&remote, PublishOptions::default(), PASSWORD).await.expect("should publish update");
    edit(&second, &did, "local").await;

    let take_remote: &dyn ConflictResolver = &|_: &Document, remote: &Document| remote.clone();
    second.synchronize(Some(take_remote), PASSWORD).await.expect("should synchronize");

    let doc = second.load_document(&did).await.expect("should load").expect("should exist");
    assert!(has_service(&doc, "remote"));
    assert!(!has_service(&doc, "local"));
    assert_eq!(doc.metadata().root_identity.as_deref(), Some(identity.as_str()));
}

#[tokio::test]
async fn resolver_must_keep_subject() {
    let (first, second, identity) = replicas().await;
    let did = published_did(&first, &identity).await.subject().clone();
    let other = published_did(&first, &identity).await;
    second.synchronize(None, PASSWORD).await.expect("should synchronize");

    let remote = edit(&first, &did, "remote").await;
    first.publish(&remote, PublishOptions::default(), PASSWORD).await.expect("should publish update");
    edit(&second, &did, "local").await;

    let impostor: &dyn ConflictResolver = &move |_: &Document, _: &Document| other.clone();
    let err = second.synchronize(Some(impostor), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn wrong_password() {
    let backend = backend();
    let store = store(&backend);
    store.create_root_identity(None, PASSWORD).await.expect("should create identity");

    let err = store.synchronize(None, "guess").await.expect_err("should fail");
    assert!(matches!(err, Error::WrongPassword));
}
