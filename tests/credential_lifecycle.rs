//! Declaring, revoking and listing credentials on the registry.

use elastos_did::registry::{CredentialStatus, DEFAULT_PAGE_SIZE};
use elastos_did::{CredentialBuilder, Document, Error, VerifiableCredential};
use test_utils::{PASSWORD, TestStore, backend, published_did, store, store_with_identity};

// Issue a credential about `holder` as `issuer` and store it.
async fn issue(store: &TestStore, issuer: &Document, holder: &Document, fragment: &str) -> VerifiableCredential {
    let signer = store.default_signer(issuer.subject(), PASSWORD).await.expect("should unlock issuer key");
    let id = holder.subject().url(fragment).expect("should build id");
    let vc = CredentialBuilder::new(&id, holder.subject())
        .add_type("ProfileCredential")
        .property("name", "John")
        .issue(issuer, &signer)
        .expect("should issue");
    store.store_credential(&vc).await.expect("should store");
    vc
}

#[tokio::test]
async fn declare_and_revoke() {
    let (store, identity) = store_with_identity().await;
    let issuer = published_did(&store, &identity).await;
    let holder = published_did(&store, &identity).await;
    let vc = issue(&store, &issuer, &holder, "profile").await;

    let declared = store.declare_credential(vc.id(), holder.subject(), PASSWORD).await.expect("should declare");
    assert!(declared.metadata().transaction_id.is_some());
    assert!(store.is_declared(vc.id()).await.expect("should resolve"));

    let resolved = store.resolve_credential(vc.id(), None, true).await.expect("should resolve").expect("should exist");
    assert_eq!(resolved.issuer(), issuer.subject());
    assert!(resolved.is_valid(&issuer));

    let err = store.declare_credential(vc.id(), holder.subject(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::CredentialAlreadyExists(_)));
    let bio = store.resolve_credential_biography(vc.id(), None).await.expect("should resolve biography");
    assert_eq!(bio.transactions.len(), 1);
    assert_eq!(bio.status, CredentialStatus::Valid);

    store.revoke_credential(vc.id(), issuer.subject(), PASSWORD).await.expect("should revoke");
    assert!(store.is_revoked(vc.id(), None).await.expect("should resolve"));
    assert!(!store.is_declared(vc.id()).await.expect("should resolve"));
    let resolved = store.resolve_credential(vc.id(), None, true).await.expect("should resolve");
    assert!(resolved.is_none());

    let local = store.load_credential(vc.id()).await.expect("should load").expect("should exist");
    assert!(local.is_revoked());

    // a second revocation is a no-op
    store.revoke_credential(vc.id(), holder.subject(), PASSWORD).await.expect("should succeed");
    let bio = store.resolve_credential_biography(vc.id(), None).await.expect("should resolve biography");
    assert_eq!(bio.status, CredentialStatus::Revoked);
    assert_eq!(bio.transactions.len(), 2);
    assert!(bio.transactions.iter().all(|tx| tx.valid));
}

#[tokio::test]
async fn revoked_before_declaration() {
    let (store, identity) = store_with_identity().await;
    let issuer = published_did(&store, &identity).await;
    let holder = published_did(&store, &identity).await;
    let vc = issue(&store, &issuer, &holder, "membership").await;

    store.revoke_credential(vc.id(), issuer.subject(), PASSWORD).await.expect("should revoke");
    assert!(store.is_revoked(vc.id(), Some(issuer.subject())).await.expect("should resolve"));

    let err = store.declare_credential(vc.id(), holder.subject(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::CredentialRevoked(_)));
}

#[tokio::test]
async fn unrelated_revocation_is_ignored() {
    let backend = backend();

    let holder_store = store(&backend);
    let identity = holder_store.create_root_identity(None, PASSWORD).await.expect("should create identity");
    let holder = published_did(&holder_store, &identity).await;
    let vc = issue(&holder_store, &holder, &holder, "selfie").await;
    assert!(vc.is_self_proclaimed());

    // a stranger who never saw the credential revokes its id
    let stranger_store = store(&backend);
    let identity = stranger_store.create_root_identity(None, PASSWORD).await.expect("should create identity");
    let stranger = published_did(&stranger_store, &identity).await;
    stranger_store.revoke_credential(vc.id(), stranger.subject(), PASSWORD).await.expect("should record");

    assert!(!holder_store.is_revoked(vc.id(), Some(holder.subject())).await.expect("should resolve"));
    holder_store.declare_credential(vc.id(), holder.subject(), PASSWORD).await.expect("should declare");

    let bio = holder_store.resolve_credential_biography(vc.id(), None).await.expect("should resolve biography");
    assert_eq!(bio.status, CredentialStatus::Valid);
    assert_eq!(bio.transactions.len(), 1);
}

#[tokio::test]
async fn unauthorized_revocation() {
    let (store, identity) = store_with_identity().await;
    let issuer = published_did(&store, &identity).await;
    let holder = published_did(&store, &identity).await;
    let stranger = published_did(&store, &identity).await;
    let vc = issue(&store, &issuer, &holder, "passport").await;
    store.declare_credential(vc.id(), holder.subject(), PASSWORD).await.expect("should declare");

    let err = store.revoke_credential(vc.id(), stranger.subject(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::Authorization(_)));

    let err = store.declare_credential(vc.id(), stranger.subject(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::CredentialAlreadyExists(_)));

    // revoking again is only a no-op for an authorized signer
    store.revoke_credential(vc.id(), issuer.subject(), PASSWORD).await.expect("should revoke");
    let err = store.revoke_credential(vc.id(), stranger.subject(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::Authorization(_)));
    assert!(store.resolve_credential(vc.id(), None, true).await.expect("should resolve").is_none());
}

#[tokio::test]
async fn only_subject_declares() {
    let (store, identity) = store_with_identity().await;
    let issuer = published_did(&store, &identity).await;
    let holder = published_did(&store, &identity).await;
    let vc = issue(&store, &issuer, &holder, "degree").await;

    let err = store.declare_credential(vc.id(), issuer.subject(), PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::Authorization(_)));
    assert!(!store.is_declared(vc.id()).await.expect("should resolve"));
}

#[tokio::test]
async fn list_pages() {
    let (store, identity) = store_with_identity().await;
    let holder = published_did(&store, &identity).await;

    let mut ids = vec![];
    for i in 0..271 {
        let vc = issue(&store, &holder, &holder, &format!("cred-{i}")).await;
        store.declare_credential(vc.id(), holder.subject(), PASSWORD).await.expect("should declare");
        ids.push(vc.id().clone());
    }
    ids.reverse();

    let page = store.list_credentials(holder.subject(), 0, 0).await.expect("should list");
    assert_eq!(page.len(), DEFAULT_PAGE_SIZE);
    assert_eq!(page.as_slice(), &ids[..DEFAULT_PAGE_SIZE]);

    let page = store.list_credentials(holder.subject(), 256, 0).await.expect("should list");
    assert_eq!(page.as_slice(), &ids[256..]);

    let page = store.list_credentials(holder.subject(), 300, 100).await.expect("should list");
    assert!(page.is_empty());
}

#[tokio::test]
async fn present_stored_credential() {
    let (store, identity) = store_with_identity().await;
    let issuer = published_did(&store, &identity).await;
    let holder = published_did(&store, &identity).await;
    let vc = issue(&store, &issuer, &holder, "employment").await;

    let vp = store
        .create_presentation(holder.subject(), vec![vc.clone()], "https://verifier.example.com", "4f1d2c", PASSWORD)
        .await
        .expect("should present");
    assert!(vp.is_valid(&holder, &[issuer.clone()], "https://verifier.example.com", "4f1d2c"));

    // a revoked credential no longer presents
    store.revoke_credential(vc.id(), issuer.subject(), PASSWORD).await.expect("should revoke");
    let revoked = store.load_credential(vc.id()).await.expect("should load").expect("should exist");
    let vp = store
        .create_presentation(holder.subject(), vec![revoked], "https://verifier.example.com", "4f1d2c", PASSWORD)
        .await
        .expect("should present");
    assert!(!vp.is_valid(&holder, &[issuer], "https://verifier.example.com", "4f1d2c"));
}
