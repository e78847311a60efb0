//! Moving store contents between stores with encrypted archives.

use elastos_did::{Archive, CredentialBuilder, Error, ExportScope};
use test_utils::{PASSWORD, backend, published_did, store, store_with_identity};

const PASSPHRASE: &str = "correct horse battery staple";

#[tokio::test]
async fn store_round_trip() {
    let (source, identity) = store_with_identity().await;
    let doc = published_did(&source, &identity).await;
    let did = doc.subject().clone();
    source.set_alias(&did, Some("alice".into())).await.expect("should set alias");

    let signer = source.default_signer(&did, PASSWORD).await.expect("should unlock key");
    let id = did.url("email").expect("should build id");
    let vc = CredentialBuilder::new(&id, &did)
        .property("email", "alice@example.com")
        .issue(&doc, &signer)
        .expect("should issue");
    source.store_credential(&vc).await.expect("should store credential");

    let archive = source.export(&ExportScope::Store, PASSPHRASE, PASSWORD).await.expect("should export");
    let json = archive.to_json().expect("should serialize");
    assert!(!json.contains("alice@example.com"));
    let archive = Archive::from_json(&json).expect("should parse");

    // the target store has its own password
    let target = store(source.backend());
    target.import(&archive, PASSPHRASE, "n3w-passw0rd").await.expect("should import");

    assert_eq!(target.default_root_identity().await.expect("should load"), Some(identity.clone()));
    let imported = target.load_document(&did).await.expect("should load").expect("should exist");
    assert_eq!(imported.metadata().alias.as_deref(), Some("alice"));
    assert_eq!(imported.metadata().transaction_id, doc.metadata().transaction_id);
    assert!(target.load_credential(&id).await.expect("should load").is_some());

    assert!(target.default_signer(&did, "n3w-passw0rd").await.is_ok());
    let err = target.default_signer(&did, PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::WrongPassword));

    let next = target.new_did(&identity, "n3w-passw0rd").await.expect("should create DID");
    assert_eq!(next.metadata().index, Some(1));
}

#[tokio::test]
async fn wrong_passphrase_writes_nothing() {
    let (source, identity) = store_with_identity().await;
    published_did(&source, &identity).await;
    let archive = source.export(&ExportScope::Store, PASSPHRASE, PASSWORD).await.expect("should export");

    let target = store(source.backend());
    let err = target.import(&archive, "guess", PASSWORD).await.expect_err("should fail");
    assert!(matches!(err, Error::WrongPassword));

    assert!(target.root_identities().await.expect("should list").is_empty());
    assert!(target.list_dids(&|_| true).await.expect("should list").is_empty());
}

#[tokio::test]
async fn export_requires_store_password() {
    let (source, _) = store_with_identity().await;

    let err = source.export(&ExportScope::Store, PASSPHRASE, "guess").await.expect_err("should fail");
    assert!(matches!(err, Error::WrongPassword));
}

#[tokio::test]
async fn single_did_scope() {
    let (source, identity) = store_with_identity().await;
    let first = published_did(&source, &identity).await;
    let second = published_did(&source, &identity).await;

    let scope = ExportScope::Did(first.subject().clone());
    let archive = source.export(&scope, PASSPHRASE, PASSWORD).await.expect("should export");

    let target = store(&backend());
    target.import(&archive, PASSPHRASE, PASSWORD).await.expect("should import");
    assert!(target.root_identities().await.expect("should list").is_empty());
    assert_eq!(target.list_dids(&|_| true).await.expect("should list"), [first.subject().clone()]);
    assert!(target.load_document(second.subject()).await.expect("should load").is_none());
    assert!(target.default_signer(first.subject(), PASSWORD).await.is_ok());

    let err = source
        .export(&ExportScope::RootIdentity("unknown".into()), PASSPHRASE, PASSWORD)
        .await
        .expect_err("should fail");
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn root_identity_scope() {
    let (source, identity) = store_with_identity().await;
    let kept = published_did(&source, &identity).await;
    let other = source.create_root_identity(None, PASSWORD).await.expect("should create identity");
    let skipped = published_did(&source, &other).await;

    let scope = ExportScope::RootIdentity(identity.clone());
    let archive = source.export(&scope, PASSPHRASE, PASSWORD).await.expect("should export");

    let target = store(&backend());
    target.import(&archive, PASSPHRASE, PASSWORD).await.expect("should import");
    let identities = target.root_identities().await.expect("should list");
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].id, identity);
    assert_eq!(target.list_dids(&|_| true).await.expect("should list"), [kept.subject().clone()]);
    assert!(target.load_document(skipped.subject()).await.expect("should load").is_none());
}
