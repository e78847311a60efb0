//! # DID Store
//!
//! [`DidStore`] is the engine facade. It keeps root identities, encrypted
//! private keys, documents and credentials in a caller-supplied [`Storage`],
//! and drives publication, deactivation, transfer and the credential
//! lifecycle against a shared [`Backend`].
//!
//! Private keys and seeds are sealed under a single store password. The
//! first operation given a password fixes it.

pub mod cipher;
pub mod export;
pub mod memory;
pub mod sync;

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use self::export::{Archive, ExportScope};
pub use self::memory::MemoryStorage;
pub use self::sync::{ConflictResolver, KeepLocal};
use crate::backend::Backend;
use crate::credential::VerifiableCredential;
use crate::did::Did;
use crate::document::{Document, DocumentBuilder, DocumentMetadata};
use crate::identity::{RootIdentity, RootIdentityRecord};
use crate::key::KeyPair;
use crate::presentation::Presentation;
use crate::provider::KeySigner;
use crate::registry::{CredentialBiography, DidBiography, IdChainRequest, Registry};
use crate::ticket::TransferTicket;
use crate::url::DidUrl;
use crate::{Error, Result, tracerr};

const FINGERPRINT: &[u8] = b"elastos-did-store";

/// Filter over document metadata used when listing DIDs.
pub type DidFilter<'a> = dyn Fn(&DocumentMetadata) -> bool + Send + Sync + 'a;

/// [`Storage`] is implemented by persistence providers.
///
/// Documents and credentials are stored together with their metadata.
/// Private keys and root identity seeds are stored sealed.
pub trait Storage: Send + Sync {
    /// Store-level metadata.
    fn metadata(&self) -> impl Future<Output = anyhow::Result<Option<StoreMetadata>>> + Send;

    /// Replace the store-level metadata.
    fn put_metadata(
        &self, metadata: &StoreMetadata,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Store a root identity.
    fn put_root_identity(
        &self, identity: &RootIdentityRecord,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Fetch a root identity.
    fn root_identity(
        &self, id: &str,
    ) -> impl Future<Output = anyhow::Result<Option<RootIdentityRecord>>> + Send;

    /// All root identities.
    fn root_identities(
        &self,
    ) -> impl Future<Output = anyhow::Result<Vec<RootIdentityRecord>>> + Send;

    /// Delete a root identity, returning `true` if it existed.
    fn delete_root_identity(&self, id: &str) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// Store a document with its metadata.
    fn put_document(&self, doc: &Document) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Fetch a document with its metadata.
    fn document(&self, did: &Did) -> impl Future<Output = anyhow::Result<Option<Document>>> + Send;

    /// DIDs whose document metadata matches `filter`.
    fn list_dids(
        &self, filter: &DidFilter<'_>,
    ) -> impl Future<Output = anyhow::Result<Vec<Did>>> + Send;

    /// Delete a document with its credentials and private keys, returning
    /// `true` if it existed.
    fn delete_document(&self, did: &Did) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// Store a credential with its metadata.
    fn put_credential(
        &self, credential: &VerifiableCredential,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Fetch a credential with its metadata.
    fn credential(
        &self, id: &DidUrl,
    ) -> impl Future<Output = anyhow::Result<Option<VerifiableCredential>>> + Send;

    /// Ids of stored credentials about `did`.
    fn list_credentials(
        &self, did: &Did,
    ) -> impl Future<Output = anyhow::Result<Vec<DidUrl>>> + Send;

    /// Delete a credential, returning `true` if it existed.
    fn delete_credential(&self, id: &DidUrl) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// Store a sealed private key.
    fn put_private_key(
        &self, id: &DidUrl, sealed: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Fetch a sealed private key.
    fn private_key(
        &self, id: &DidUrl,
    ) -> impl Future<Output = anyhow::Result<Option<String>>> + Send;

    /// Ids of the stored private keys of `did`.
    fn list_private_keys(
        &self, did: &Did,
    ) -> impl Future<Output = anyhow::Result<Vec<DidUrl>>> + Send;

    /// Delete a private key, returning `true` if it existed.
    fn delete_private_key(
        &self, id: &DidUrl,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;
}

/// Store-level metadata.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreMetadata {
    /// A known value sealed under the store password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Root identity used when none is specified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_root_identity: Option<String>,
}

/// Options for [`DidStore::publish`].
#[derive(Clone, Debug, Default)]
pub struct PublishOptions {
    /// Transfer ticket. Present only to move a customized DID to a new
    /// controller.
    pub ticket: Option<TransferTicket>,

    /// Controller signing the request for a customized DID.
    pub signer: Option<Did>,

    /// Skip the check that the local copy descends from the registry copy.
    pub force: bool,
}

impl PublishOptions {
    /// Publish with a transfer ticket.
    #[must_use]
    pub fn ticket(mut self, ticket: TransferTicket) -> Self {
        self.ticket = Some(ticket);
        self
    }

    /// Sign the request as `controller`.
    #[must_use]
    pub fn signer(mut self, controller: Did) -> Self {
        self.signer = Some(controller);
        self
    }

    /// Overwrite the registry copy even if the local copy does not descend
    /// from it.
    #[must_use]
    pub const fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Engine facade over a local store and a registry backend.
#[derive(Debug)]
pub struct DidStore<S: Storage, R: Registry> {
    storage: S,
    backend: Arc<Backend<R>>,
}

impl<S: Storage, R: Registry> DidStore<S, R> {
    /// Open a store over `storage`, using `backend` for registry access.
    pub const fn new(storage: S, backend: Arc<Backend<R>>) -> Self {
        Self { storage, backend }
    }

    /// The shared backend.
    pub const fn backend(&self) -> &Arc<Backend<R>> {
        &self.backend
    }

    /// The underlying storage.
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    // ------------------------------------------------------------------
    // Password
    // ------------------------------------------------------------------

    /// Check `password` against the store. The first password given to an
    /// empty store becomes the store password.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongPassword`] if the password does not match.
    pub async fn check_password(&self, password: &str) -> Result<()> {
        let mut metadata = self.storage.metadata().await.map_err(|e| Error::storage(&e))?.unwrap_or_default();
        let kdf = &self.backend.config().kdf;
        match &metadata.fingerprint {
            Some(fingerprint) => {
                if cipher::open(fingerprint, password, kdf)? != FINGERPRINT {
                    tracerr!(Error::WrongPassword);
                }
            }
            None => {
                metadata.fingerprint = Some(cipher::seal(FINGERPRINT, password, kdf)?);
                self.storage.put_metadata(&metadata).await.map_err(|e| Error::storage(&e))?;
            }
        }
        Ok(())
    }

    /// Re-seal every private key and root identity under a new password.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongPassword`] if `old` is not the store password.
    pub async fn change_password(&self, old: &str, new: &str) -> Result<()> {
        self.check_password(old).await?;
        let kdf = self.backend.config().kdf;

        let mut identities = vec![];
        for mut record in self.storage.root_identities().await.map_err(|e| Error::storage(&e))? {
            let seed = cipher::open(&record.seed, old, &kdf)?;
            record.seed = cipher::seal(&seed, new, &kdf)?;
            identities.push(record);
        }
        let mut keys = vec![];
        for did in self.list_dids(&|_| true).await? {
            for id in self.storage.list_private_keys(&did).await.map_err(|e| Error::storage(&e))? {
                if let Some(sealed) = self.storage.private_key(&id).await.map_err(|e| Error::storage(&e))? {
                    let secret = cipher::open(&sealed, old, &kdf)?;
                    keys.push((id, cipher::seal(&secret, new, &kdf)?));
                }
            }
        }

        // everything is re-sealed before anything is written
        for record in &identities {
            self.storage.put_root_identity(record).await.map_err(|e| Error::storage(&e))?;
        }
        for (id, sealed) in &keys {
            self.storage.put_private_key(id, sealed).await.map_err(|e| Error::storage(&e))?;
        }
        let mut metadata = self.storage.metadata().await.map_err(|e| Error::storage(&e))?.unwrap_or_default();
        metadata.fingerprint = Some(cipher::seal(FINGERPRINT, new, &kdf)?);
        self.storage.put_metadata(&metadata).await.map_err(|e| Error::storage(&e))?;

        tracing::info!("store password changed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Root identities
    // ------------------------------------------------------------------

    /// Create a root identity from `seed`, or a random seed. The first root
    /// identity becomes the default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the identity is already stored.
    pub async fn create_root_identity(
        &self, seed: Option<[u8; 32]>, password: &str,
    ) -> Result<String> {
        self.check_password(password).await?;
        let identity = seed.map_or_else(RootIdentity::generate, RootIdentity::from_seed);
        if self.storage.root_identity(identity.id()).await.map_err(|e| Error::storage(&e))?.is_some() {
            return Err(Error::AlreadyExists(format!("root identity {}", identity.id())));
        }

        let record = identity.seal(0, password, &self.backend.config().kdf)?;
        self.storage.put_root_identity(&record).await.map_err(|e| Error::storage(&e))?;

        let mut metadata = self.storage.metadata().await.map_err(|e| Error::storage(&e))?.unwrap_or_default();
        if metadata.default_root_identity.is_none() {
            metadata.default_root_identity = Some(record.id.clone());
            self.storage.put_metadata(&metadata).await.map_err(|e| Error::storage(&e))?;
        }

        tracing::info!(id = %record.id, "root identity created");
        Ok(record.id)
    }

    /// A stored root identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the identity is not stored.
    pub async fn root_identity(&self, id: &str) -> Result<RootIdentityRecord> {
        self.storage
            .root_identity(id)
            .await
            .map_err(|e| Error::storage(&e))?
            .ok_or_else(|| Error::NotFound(format!("root identity {id}")))
    }

    /// All stored root identities.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn root_identities(&self) -> Result<Vec<RootIdentityRecord>> {
        self.storage.root_identities().await.map_err(|e| Error::storage(&e))
    }

    /// The default root identity id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn default_root_identity(&self) -> Result<Option<String>> {
        let metadata = self.storage.metadata().await.map_err(|e| Error::storage(&e))?;
        Ok(metadata.and_then(|m| m.default_root_identity))
    }

    /// Delete a root identity. DIDs derived from it are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn delete_root_identity(&self, id: &str) -> Result<bool> {
        let deleted = self.storage.delete_root_identity(id).await.map_err(|e| Error::storage(&e))?;
        let mut metadata = self.storage.metadata().await.map_err(|e| Error::storage(&e))?.unwrap_or_default();
        if metadata.default_root_identity.as_deref() == Some(id) {
            metadata.default_root_identity = None;
            self.storage.put_metadata(&metadata).await.map_err(|e| Error::storage(&e))?;
        }
        Ok(deleted)
    }

    /// Derive the DID at the identity's next index, store its key and a
    /// sealed document, and advance the index. The DID is not published.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the DID is already stored or
    /// published.
    pub async fn new_did(&self, identity_id: &str, password: &str) -> Result<Document> {
        let mut record = self.root_identity(identity_id).await?;
        let index = record.index;
        let doc = self.new_did_at(identity_id, index, password).await?;
        record.index = index + 1;
        self.storage.put_root_identity(&record).await.map_err(|e| Error::storage(&e))?;
        Ok(doc)
    }

    /// Derive the DID at `index`, store its key and a sealed document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the DID is already stored or
    /// published.
    pub async fn new_did_at(&self, identity_id: &str, index: u32, password: &str) -> Result<Document> {
        self.check_password(password).await?;
        let record = self.root_identity(identity_id).await?;
        let identity = RootIdentity::open(&record, password, &self.backend.config().kdf)?;

        let keys = identity.key_at(index);
        let did = keys.did();
        if self.storage.document(&did).await.map_err(|e| Error::storage(&e))?.is_some() {
            return Err(Error::AlreadyExists(did.to_string()));
        }
        if self.backend.resolve_did(&did, true).await?.is_some() {
            return Err(Error::AlreadyExists(format!("{did} is already published")));
        }

        let mut doc = self.create_document(&keys, password).await?;
        let metadata = doc.metadata_mut();
        metadata.root_identity = Some(record.id.clone());
        metadata.index = Some(index);
        self.store_document(&doc).await?;

        tracing::info!(%did, index, "DID created");
        Ok(doc)
    }

    /// The DID at `index` of a root identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongPassword`] if the password does not unlock the
    /// identity.
    pub async fn did_at(&self, identity_id: &str, index: u32, password: &str) -> Result<Did> {
        let record = self.root_identity(identity_id).await?;
        let identity = RootIdentity::open(&record, password, &self.backend.config().kdf)?;
        Ok(identity.did_at(index))
    }

    /// Create and store a sealed normal document for a standalone key pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be stored or the document sealed.
    pub async fn create_document(&self, keys: &KeyPair, password: &str) -> Result<Document> {
        let signer = self.store_private_key(keys, crate::document::DEFAULT_KEY_FRAGMENT, password).await?;
        let doc = DocumentBuilder::new(&keys.public_key_multibase())?.seal(&signer)?;
        self.store_document(&doc).await?;
        Ok(doc)
    }

    // ------------------------------------------------------------------
    // Private keys
    // ------------------------------------------------------------------

    /// Seal and store a private key as `did#fragment`, where `did` is derived
    /// from the key. Returns a signer for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongPassword`] if the password does not match.
    pub async fn store_private_key(
        &self, keys: &KeyPair, fragment: &str, password: &str,
    ) -> Result<KeySigner> {
        let id = keys.did().url(fragment)?;
        self.store_private_key_as(&id, keys, password).await?;
        Ok(KeySigner::new(id, keys.clone()))
    }

    /// Seal and store a private key under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongPassword`] if the password does not match.
    pub async fn store_private_key_as(&self, id: &DidUrl, keys: &KeyPair, password: &str) -> Result<()> {
        self.check_password(password).await?;
        let sealed = cipher::seal(&keys.secret_bytes(), password, &self.backend.config().kdf)?;
        self.storage.put_private_key(id, &sealed).await.map_err(|e| Error::storage(&e))
    }

    /// Returns `true` if a private key is stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn contains_private_key(&self, id: &DidUrl) -> Result<bool> {
        Ok(self.storage.private_key(id).await.map_err(|e| Error::storage(&e))?.is_some())
    }

    /// Unlock the private key stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no key is stored and
    /// [`Error::WrongPassword`] if the password does not open it.
    pub async fn signer(&self, id: &DidUrl, password: &str) -> Result<KeySigner> {
        let Some(sealed) = self.storage.private_key(id).await.map_err(|e| Error::storage(&e))? else {
            return Err(Error::NotFound(format!("private key {id}")));
        };
        let secret = cipher::open(&sealed, password, &self.backend.config().kdf)?;
        let keys = KeyPair::try_from_secret(&secret).map_err(|e| Error::storage(&e))?;
        Ok(KeySigner::new(id.clone(), keys))
    }

    /// A signer acting for `did`: the default key of a normal DID, or the
    /// default key of the first controller whose private key is stored for
    /// a customized DID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if no usable key is stored.
    pub async fn default_signer(&self, did: &Did, password: &str) -> Result<KeySigner> {
        let doc = self.document_or_resolve(did).await?;
        if !doc.is_customized() {
            let Some(key_id) = doc.default_key_id() else {
                tracerr!(Error::Authorization(format!("{did} has no default key")));
            };
            return self.signer(key_id, password).await;
        }

        for controller in doc.controllers().dids() {
            let controller_doc = self.document_or_resolve(controller).await?;
            if let Some(key_id) = controller_doc.default_key_id() {
                if self.contains_private_key(key_id).await? {
                    return self.signer(key_id, password).await;
                }
            }
        }
        tracerr!(Error::Authorization(format!("no controller key of {did} is stored")))
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// Store a document, keeping the local metadata of an existing copy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn store_document(&self, doc: &Document) -> Result<()> {
        let mut doc = doc.clone();
        self.merge_stored_metadata(&mut doc).await?;
        self.storage.put_document(&doc).await.map_err(|e| Error::storage(&e))
    }

    /// A stored document, with its controllers attached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn load_document(&self, did: &Did) -> Result<Option<Document>> {
        let Some(mut doc) = self.storage.document(did).await.map_err(|e| Error::storage(&e))? else {
            return Ok(None);
        };
        self.attach_controllers(&mut doc).await?;
        Ok(Some(doc))
    }

    /// Stored DIDs whose metadata matches `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn list_dids(&self, filter: &DidFilter<'_>) -> Result<Vec<Did>> {
        self.storage.list_dids(filter).await.map_err(|e| Error::storage(&e))
    }

    /// Delete a stored DID with its credentials and private keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn delete_did(&self, did: &Did) -> Result<bool> {
        self.storage.delete_document(did).await.map_err(|e| Error::storage(&e))
    }

    /// Set the local alias of a stored DID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the DID is not stored.
    pub async fn set_alias(&self, did: &Did, alias: Option<String>) -> Result<()> {
        let Some(mut doc) = self.storage.document(did).await.map_err(|e| Error::storage(&e))? else {
            return Err(Error::NotFound(did.to_string()));
        };
        doc.metadata_mut().alias = alias;
        self.storage.put_document(&doc).await.map_err(|e| Error::storage(&e))
    }

    /// Create and store a customized DID controlled by `controllers`, sealed
    /// by `acting`. The DID is not published.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the DID is already published, and
    /// the errors of [`DocumentBuilder::new_customized`].
    pub async fn new_customized_did(
        &self, subject: &Did, controllers: &[Did], threshold: Option<usize>, acting: &Did,
        password: &str,
    ) -> Result<Document> {
        if !controllers.contains(acting) {
            return Err(Error::InvalidArgument(format!("{acting} is not one of the controllers")));
        }
        if self.backend.resolve_did(subject, true).await?.is_some() {
            return Err(Error::AlreadyExists(format!("{subject} is already published")));
        }

        let mut docs = vec![];
        for controller in controllers {
            docs.push(self.document_or_resolve(controller).await?);
        }
        let builder = DocumentBuilder::new_customized(subject.clone(), &docs, threshold)?;
        let doc = self.seal(&builder, acting, password).await?;
        self.store_document(&doc).await?;

        tracing::info!(%subject, "customized DID created");
        Ok(doc)
    }

    /// Seal a draft with the default key of `signer`: the subject for a
    /// normal document, or one of the controllers for a customized one.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`DocumentBuilder::seal`].
    pub async fn seal(&self, builder: &DocumentBuilder, signer: &Did, password: &str) -> Result<Document> {
        let doc = self.document_or_resolve(signer).await.ok();
        let key_id = match doc.as_ref().and_then(Document::default_key_id) {
            Some(key_id) => key_id.clone(),
            None => signer.url(crate::document::DEFAULT_KEY_FRAGMENT)?,
        };
        let signer = self.signer(&key_id, password).await?;
        builder.seal(&signer)
    }

    /// Countersign a multi-controller document as `controller` and store it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadySigned`] if the controller already signed and
    /// [`Error::AlreadySealed`] if the threshold is already met.
    pub async fn sign_document(&self, doc: &Document, controller: &Did, password: &str) -> Result<Document> {
        let controller_doc = self.document_or_resolve(controller).await?;
        let mut doc = doc.clone();
        self.attach_controllers(&mut doc).await?;
        let builder = DocumentBuilder::edit_as(&doc, &controller_doc)?;
        let signed = self.seal(&builder, controller, password).await?;
        self.store_document(&signed).await?;
        Ok(signed)
    }

    /// Publish a document.
    ///
    /// Without a ticket, a new DID is created or an existing one updated.
    /// An update requires the local copy to descend from the registry copy
    /// unless `force` is set, and a customized DID's controllers must not
    /// have changed. With a ticket, control is transferred to the ticket's
    /// recipient, who signs the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if the document lacks signatures,
    /// [`Error::Conflict`] if the registry copy moved on or the ticket was
    /// already used, and [`Error::Deactivated`] if the DID is deactivated.
    pub async fn publish(&self, doc: &Document, options: PublishOptions, password: &str) -> Result<Document> {
        let mut doc = doc.clone();
        self.merge_stored_metadata(&mut doc).await?;
        self.attach_controllers(&mut doc).await?;
        let did = doc.subject().clone();

        if !doc.is_qualified() {
            tracerr!(Error::Authorization(format!("{did} does not meet its multisig threshold")));
        }
        if !doc.is_genuine() {
            tracerr!(Error::Authorization(format!("{did} is not genuine")));
        }
        if doc.is_expired() {
            return Err(Error::InvalidArgument(format!("{did} is expired")));
        }

        let resolved = self.backend.resolve_did(&did, true).await?;
        let request = match (resolved, &options.ticket) {
            (None, Some(_)) => {
                return Err(Error::InvalidArgument(format!("{did} is not published, a ticket is not allowed")));
            }
            (None, None) => {
                let signer = self.request_signer(&doc, options.signer.as_ref(), password).await?;
                IdChainRequest::create(&doc, &signer)?
            }
            (Some(resolved), _) if resolved.is_deactivated() => {
                tracerr!(Error::Deactivated(did));
            }
            (Some(resolved), None) => {
                if doc.is_customized() && resolved.controllers() != doc.controllers() {
                    tracerr!(Error::Conflict("controllers changed".into()));
                }
                if !options.force {
                    let remote = resolved.signature();
                    let local = doc.metadata();
                    let descends = remote.is_some()
                        && (local.signature.as_deref() == remote
                            || local.previous_signature.as_deref() == remote
                            || doc.signature() == remote);
                    if !descends {
                        tracerr!(Error::Conflict(format!(
                            "local copy of {did} is not based on the registry copy"
                        )));
                    }
                }
                let Some(txid) = &resolved.metadata().transaction_id else {
                    tracerr!(Error::Backend(format!("{did} has no transaction id")));
                };
                let signer = self.request_signer(&doc, options.signer.as_ref(), password).await?;
                IdChainRequest::update(&doc, txid, &signer)?
            }
            (Some(resolved), Some(ticket)) => {
                if ticket.subject() != &did {
                    return Err(Error::InvalidArgument(format!("ticket is not for {did}")));
                }
                if !doc.controllers().contains(ticket.to()) {
                    return Err(Error::InvalidArgument(format!(
                        "{} is not a controller of the new document",
                        ticket.to()
                    )));
                }
                if resolved.metadata().transaction_id.as_deref() != Some(ticket.transaction_id()) {
                    tracerr!(Error::Conflict("transfer ticket is stale or already used".into()));
                }
                if !ticket.is_valid(&resolved) {
                    tracerr!(Error::Authorization("transfer ticket is not genuine".into()));
                }
                let signer = self.default_signer(ticket.to(), password).await?;
                IdChainRequest::transfer(&doc, ticket, &signer)?
            }
        };

        let txid = self.backend.submit(&request).await?;
        let signature = doc.signature().map(ToString::to_string);
        let metadata = doc.metadata_mut();
        metadata.transaction_id = Some(txid);
        metadata.signature.clone_from(&signature);
        metadata.previous_signature = signature;
        metadata.published = Some(chrono::Utc::now());
        metadata.deactivated = false;
        self.store_document(&doc).await?;

        tracing::info!(%did, "DID published");
        Ok(doc)
    }

    /// Deactivate a DID with its own authentication key, or a controller's
    /// default key for a customized DID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the DID is not published and
    /// [`Error::Deactivated`] if it is already deactivated.
    pub async fn deactivate(&self, did: &Did, password: &str) -> Result<()> {
        let resolved = self.active_document(did).await?;
        let signer = self.request_signer(&resolved, None, password).await?;
        let request = IdChainRequest::deactivate(did, &signer)?;
        self.backend.submit(&request).await?;
        self.mark_deactivated(did).await?;

        tracing::info!(%did, "DID deactivated");
        Ok(())
    }

    /// Deactivate `target` as `authorizer`, using the target's authorization
    /// key controlled by the authorizer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if the target holds no authorization
    /// key matching a stored key of the authorizer.
    pub async fn deactivate_as_authorizer(&self, target: &Did, authorizer: &Did, password: &str) -> Result<()> {
        let resolved = self.active_document(target).await?;
        if resolved.is_customized() {
            return Err(Error::InvalidArgument(format!(
                "{target} is customized and cannot be deactivated by authorization"
            )));
        }
        let authorizer_doc = self.document_or_resolve(authorizer).await?;

        let mut signer = None;
        for key_id in resolved.authorization_keys() {
            let Some(key) = resolved.public_key(key_id) else {
                continue;
            };
            if &key.controller != authorizer {
                continue;
            }
            let Some(own) = authorizer_doc
                .authentication_keys()
                .iter()
                .filter_map(|id| authorizer_doc.public_key(id))
                .find(|pk| pk.public_key_multibase == key.public_key_multibase)
            else {
                continue;
            };
            if self.contains_private_key(&own.id).await? {
                let unlocked = self.signer(&own.id, password).await?;
                signer = Some(KeySigner::new(key_id.clone(), unlocked.keys().clone()));
                break;
            }
        }
        let Some(signer) = signer else {
            tracerr!(Error::Authorization(format!("{authorizer} is not authorized to deactivate {target}")));
        };

        let request = IdChainRequest::deactivate(target, &signer)?;
        self.backend.submit(&request).await?;
        self.mark_deactivated(target).await?;

        tracing::info!(%target, %authorizer, "DID deactivated by authorization");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transfer
    // ------------------------------------------------------------------

    /// Create a ticket transferring `subject` to `to`, signed by `controller`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if `controller` does not currently
    /// control `subject`.
    pub async fn create_transfer_ticket(
        &self, subject: &Did, controller: &Did, to: &Did, password: &str,
    ) -> Result<TransferTicket> {
        let resolved = self.active_document(subject).await?;
        if !resolved.controllers().contains(controller) {
            tracerr!(Error::Authorization(format!("{controller} does not control {subject}")));
        }
        let ticket = TransferTicket::new(&resolved, to.clone())?;
        let signer = self.default_signer(controller, password).await?;
        ticket.sign(&resolved, &signer)
    }

    /// Add `controller`'s signature to a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadySigned`] if the controller already signed.
    pub async fn sign_transfer_ticket(
        &self, ticket: &TransferTicket, controller: &Did, password: &str,
    ) -> Result<TransferTicket> {
        let resolved = self.active_document(ticket.subject()).await?;
        let signer = self.default_signer(controller, password).await?;
        ticket.sign(&resolved, &signer)
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Store a credential, keeping the local metadata of an existing copy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn store_credential(&self, credential: &VerifiableCredential) -> Result<()> {
        let mut credential = credential.clone();
        if let Some(existing) = self.storage.credential(credential.id()).await.map_err(|e| Error::storage(&e))? {
            if credential.metadata().alias.is_none() {
                credential.metadata_mut().alias.clone_from(&existing.metadata().alias);
            }
        }
        self.storage.put_credential(&credential).await.map_err(|e| Error::storage(&e))
    }

    /// A stored credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn load_credential(&self, id: &DidUrl) -> Result<Option<VerifiableCredential>> {
        self.storage.credential(id).await.map_err(|e| Error::storage(&e))
    }

    /// Ids of stored credentials about `did`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn list_stored_credentials(&self, did: &Did) -> Result<Vec<DidUrl>> {
        self.storage.list_credentials(did).await.map_err(|e| Error::storage(&e))
    }

    /// Delete a stored credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage fails.
    pub async fn delete_credential(&self, id: &DidUrl) -> Result<bool> {
        self.storage.delete_credential(id).await.map_err(|e| Error::storage(&e))
    }

    /// Declare a stored credential on the registry, signed by its subject or
    /// the subject's controller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialRevoked`] if the credential was ever
    /// revoked, [`Error::CredentialAlreadyExists`] if it is already declared
    /// and [`Error::Authorization`] if `signer` may not declare it.
    pub async fn declare_credential(&self, id: &DidUrl, signer: &Did, password: &str) -> Result<VerifiableCredential> {
        let Some(mut vc) = self.load_credential(id).await? else {
            return Err(Error::NotFound(format!("credential {id}")));
        };

        for owner in [vc.issuer(), vc.subject_id()] {
            if self.backend.is_revoked(id, Some(owner)).await? {
                tracerr!(Error::CredentialRevoked(id.clone()));
            }
        }
        if self.backend.declared_credential(id, None, true).await?.is_some() {
            tracerr!(Error::CredentialAlreadyExists(id.clone()));
        }

        let subject = self.active_document(vc.subject_id()).await?;
        if signer != subject.subject() && !subject.controllers().contains(signer) {
            tracerr!(Error::Authorization(format!("{signer} may not declare {id}")));
        }
        let Some(issuer) = self.backend.resolve_did(vc.issuer(), false).await? else {
            return Err(Error::NotFound(format!("issuer {}", vc.issuer())));
        };
        if !vc.is_genuine(&issuer) {
            tracerr!(Error::Authorization(format!("credential {id} is not genuine")));
        }
        if vc.is_expired() {
            return Err(Error::InvalidArgument(format!("credential {id} is expired")));
        }

        let key = self.default_signer(signer, password).await?;
        let request = IdChainRequest::declare(&vc, &key)?;
        let txid = self.backend.submit(&request).await?;

        let metadata = vc.metadata_mut();
        metadata.transaction_id = Some(txid);
        metadata.published = Some(chrono::Utc::now());
        metadata.revoked = false;
        self.store_credential(&vc).await?;

        tracing::info!(%id, %signer, "credential declared");
        Ok(vc)
    }

    /// Revoke a credential, signed by its subject, its issuer or a controller
    /// of either. Revoking an already revoked credential succeeds without a
    /// new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if `signer` may not revoke the
    /// credential.
    pub async fn revoke_credential(&self, id: &DidUrl, signer: &Did, password: &str) -> Result<()> {
        let known = match self.load_credential(id).await? {
            Some(vc) => Some(vc),
            None => self.backend.declared_credential(id, None, true).await?,
        };
        let owners: Vec<Did> = known.as_ref().map_or_else(
            || vec![signer.clone()],
            |vc| vec![vc.subject_id().clone(), vc.issuer().clone()],
        );

        let mut allowed = vec![];
        for owner in &owners {
            allowed.push(owner.clone());
            if let Some(doc) = self.backend.resolve_did(owner, false).await? {
                allowed.extend(doc.controllers().dids().iter().cloned());
            }
        }
        if !allowed.contains(signer) {
            tracerr!(Error::Authorization(format!("{signer} may not revoke {id}")));
        }

        for owner in &owners {
            if self.backend.is_revoked(id, Some(owner)).await? {
                tracing::info!(%id, "credential already revoked");
                self.mark_revoked(id).await?;
                return Ok(());
            }
        }

        let key = self.default_signer(signer, password).await?;
        let request = IdChainRequest::revoke(id, &key)?;
        self.backend.submit(&request).await?;
        self.mark_revoked(id).await?;

        tracing::info!(%id, %signer, "credential revoked");
        Ok(())
    }

    /// Resolve a declared credential. Returns `None` once it is revoked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn resolve_credential(
        &self, id: &DidUrl, issuer: Option<&Did>, force: bool,
    ) -> Result<Option<VerifiableCredential>> {
        self.backend.resolve_credential(id, issuer, force).await
    }

    /// Returns `true` if the credential was revoked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn is_revoked(&self, id: &DidUrl, issuer: Option<&Did>) -> Result<bool> {
        self.backend.is_revoked(id, issuer).await
    }

    /// Returns `true` if the credential is declared and not revoked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn is_declared(&self, id: &DidUrl) -> Result<bool> {
        Ok(self.backend.resolve_credential(id, None, true).await?.is_some())
    }

    /// Declared credentials about `did`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn list_credentials(&self, did: &Did, skip: usize, limit: usize) -> Result<Vec<DidUrl>> {
        self.backend.list_credentials(did, skip, limit).await
    }

    /// The transaction history of a DID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn resolve_did_biography(&self, did: &Did) -> Result<DidBiography> {
        self.backend.resolve_did_biography(did).await
    }

    /// The transaction history of a credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn resolve_credential_biography(
        &self, id: &DidUrl, issuer: Option<&Did>,
    ) -> Result<CredentialBiography> {
        self.backend.resolve_credential_biography(id, issuer).await
    }

    /// Resolve the current registry copy of a DID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn resolve_did(&self, did: &Did, force: bool) -> Result<Option<Document>> {
        self.backend.resolve_did(did, force).await
    }

    // ------------------------------------------------------------------
    // Presentations
    // ------------------------------------------------------------------

    /// Create a presentation of `credentials` held by `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a credential is about another
    /// subject.
    pub async fn create_presentation(
        &self, holder: &Did, credentials: Vec<VerifiableCredential>, realm: &str, nonce: &str,
        password: &str,
    ) -> Result<Presentation> {
        let holder_doc = self.document_or_resolve(holder).await?;
        let signer = self.default_signer(holder, password).await?;
        Presentation::create(&holder_doc, credentials, realm, nonce, &signer)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    // A stored document, or the registry copy.
    pub(crate) async fn document_or_resolve(&self, did: &Did) -> Result<Document> {
        if let Some(doc) = self.load_document(did).await? {
            return Ok(doc);
        }
        self.backend
            .resolve_did(did, false)
            .await?
            .ok_or_else(|| Error::NotFound(did.to_string()))
    }

    // Fill in metadata the document lacks from the stored copy.
    async fn merge_stored_metadata(&self, doc: &mut Document) -> Result<()> {
        let Some(existing) = self.storage.document(doc.subject()).await.map_err(|e| Error::storage(&e))? else {
            return Ok(());
        };
        let stored = existing.metadata();
        let metadata = doc.metadata_mut();
        metadata.merge_local(stored);
        if metadata.transaction_id.is_none() {
            metadata.merge_registry(stored);
        }
        if metadata.previous_signature.is_none() {
            metadata.previous_signature =
                stored.signature.clone().or_else(|| stored.previous_signature.clone());
        }
        Ok(())
    }

    // Attach missing controller documents, from the store or the registry.
    async fn attach_controllers(&self, doc: &mut Document) -> Result<()> {
        let mut docs = vec![];
        for controller in doc.missing_controllers() {
            let found = match self.storage.document(&controller).await.map_err(|e| Error::storage(&e))? {
                Some(found) => Some(found),
                None => self.backend.resolve_did(&controller, false).await?,
            };
            if let Some(found) = found {
                docs.push(found);
            }
        }
        doc.attach_controllers(docs);
        Ok(())
    }

    // The registry copy of an active DID.
    async fn active_document(&self, did: &Did) -> Result<Document> {
        let Some(resolved) = self.backend.resolve_did(did, true).await? else {
            return Err(Error::NotFound(format!("{did} is not published")));
        };
        if resolved.is_deactivated() {
            tracerr!(Error::Deactivated(did.clone()));
        }
        Ok(resolved)
    }

    // The key signing a request about `doc`.
    async fn request_signer(&self, doc: &Document, controller: Option<&Did>, password: &str) -> Result<KeySigner> {
        if !doc.is_customized() {
            return self.default_signer(doc.subject(), password).await;
        }
        match controller {
            Some(controller) => {
                if !doc.controllers().contains(controller) {
                    tracerr!(Error::Authorization(format!(
                        "{controller} does not control {}",
                        doc.subject()
                    )));
                }
                self.default_signer(controller, password).await
            }
            None => self.default_signer(doc.subject(), password).await,
        }
    }

    async fn mark_deactivated(&self, did: &Did) -> Result<()> {
        if let Some(mut doc) = self.storage.document(did).await.map_err(|e| Error::storage(&e))? {
            doc.metadata_mut().deactivated = true;
            self.storage.put_document(&doc).await.map_err(|e| Error::storage(&e))?;
        }
        Ok(())
    }

    async fn mark_revoked(&self, id: &DidUrl) -> Result<()> {
        if let Some(mut vc) = self.storage.credential(id).await.map_err(|e| Error::storage(&e))? {
            vc.metadata_mut().revoked = true;
            self.storage.put_credential(&vc).await.map_err(|e| Error::storage(&e))?;
        }
        Ok(())
    }
}
