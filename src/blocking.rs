//! # Blocking API
//!
//! A synchronous wrapper over [`crate::DidStore`]. Each call drives the same
//! future as the async API on a private current-thread runtime, so
//! validation and ordering are identical.
//!
//! Do not call these methods from inside an async runtime.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::backend::Backend;
use crate::credential::VerifiableCredential;
use crate::did::Did;
use crate::document::{Document, DocumentBuilder};
use crate::registry::{CredentialBiography, DidBiography, Registry};
use crate::store::{self, Archive, ConflictResolver, ExportScope, PublishOptions, Storage};
use crate::store::sync::SyncReport;
use crate::ticket::TransferTicket;
use crate::url::DidUrl;
use crate::{Error, Result};

/// Blocking engine facade.
#[derive(Debug)]
pub struct DidStore<S: Storage, R: Registry> {
    inner: store::DidStore<S, R>,
    runtime: Runtime,
}

impl<S: Storage, R: Registry> DidStore<S, R> {
    /// Open a blocking store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the runtime cannot be started.
    pub fn new(storage: S, backend: Arc<Backend<R>>) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| Error::Backend(format!("failed to start runtime: {e}")))?;
        Ok(Self {
            inner: store::DidStore::new(storage, backend),
            runtime,
        })
    }

    /// The async store.
    pub const fn inner(&self) -> &store::DidStore<S, R> {
        &self.inner
    }

    /// Run any async store operation to completion.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// See [`store::DidStore::create_root_identity`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn create_root_identity(&self, seed: Option<[u8; 32]>, password: &str) -> Result<String> {
        self.block_on(self.inner.create_root_identity(seed, password))
    }

    /// See [`store::DidStore::new_did`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn new_did(&self, identity_id: &str, password: &str) -> Result<Document> {
        self.block_on(self.inner.new_did(identity_id, password))
    }

    /// See [`store::DidStore::load_document`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn load_document(&self, did: &Did) -> Result<Option<Document>> {
        self.block_on(self.inner.load_document(did))
    }

    /// See [`store::DidStore::seal`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn seal(&self, builder: &DocumentBuilder, signer: &Did, password: &str) -> Result<Document> {
        self.block_on(self.inner.seal(builder, signer, password))
    }

    /// See [`store::DidStore::publish`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn publish(&self, doc: &Document, options: PublishOptions, password: &str) -> Result<Document> {
        self.block_on(self.inner.publish(doc, options, password))
    }

    /// See [`store::DidStore::resolve_did`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn resolve_did(&self, did: &Did, force: bool) -> Result<Option<Document>> {
        self.block_on(self.inner.resolve_did(did, force))
    }

    /// See [`store::DidStore::deactivate`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn deactivate(&self, did: &Did, password: &str) -> Result<()> {
        self.block_on(self.inner.deactivate(did, password))
    }

    /// See [`store::DidStore::create_transfer_ticket`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn create_transfer_ticket(
        &self, subject: &Did, controller: &Did, to: &Did, password: &str,
    ) -> Result<TransferTicket> {
        self.block_on(self.inner.create_transfer_ticket(subject, controller, to, password))
    }

    /// See [`store::DidStore::store_credential`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn store_credential(&self, credential: &VerifiableCredential) -> Result<()> {
        self.block_on(self.inner.store_credential(credential))
    }

    /// See [`store::DidStore::declare_credential`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn declare_credential(&self, id: &DidUrl, signer: &Did, password: &str) -> Result<VerifiableCredential> {
        self.block_on(self.inner.declare_credential(id, signer, password))
    }

    /// See [`store::DidStore::revoke_credential`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn revoke_credential(&self, id: &DidUrl, signer: &Did, password: &str) -> Result<()> {
        self.block_on(self.inner.revoke_credential(id, signer, password))
    }

    /// See [`store::DidStore::resolve_credential`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn resolve_credential(
        &self, id: &DidUrl, issuer: Option<&Did>, force: bool,
    ) -> Result<Option<VerifiableCredential>> {
        self.block_on(self.inner.resolve_credential(id, issuer, force))
    }

    /// See [`store::DidStore::list_credentials`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn list_credentials(&self, did: &Did, skip: usize, limit: usize) -> Result<Vec<DidUrl>> {
        self.block_on(self.inner.list_credentials(did, skip, limit))
    }

    /// See [`store::DidStore::resolve_did_biography`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn resolve_did_biography(&self, did: &Did) -> Result<DidBiography> {
        self.block_on(self.inner.resolve_did_biography(did))
    }

    /// See [`store::DidStore::resolve_credential_biography`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn resolve_credential_biography(
        &self, id: &DidUrl, issuer: Option<&Did>,
    ) -> Result<CredentialBiography> {
        self.block_on(self.inner.resolve_credential_biography(id, issuer))
    }

    /// See [`store::DidStore::synchronize`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn synchronize(&self, resolver: Option<&dyn ConflictResolver>, password: &str) -> Result<SyncReport> {
        self.block_on(self.inner.synchronize(resolver, password))
    }

    /// See [`store::DidStore::export`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn export(&self, scope: &ExportScope, passphrase: &str, password: &str) -> Result<Archive> {
        self.block_on(self.inner.export(scope, passphrase, password))
    }

    /// See [`store::DidStore::import`].
    ///
    /// # Errors
    ///
    /// As for the async call.
    pub fn import(&self, archive: &Archive, passphrase: &str, password: &str) -> Result<()> {
        self.block_on(self.inner.import(archive, passphrase, password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, KdfParams};
    use crate::registry::SimulatedRegistry;
    use crate::store::MemoryStorage;

    #[test]
    fn publish_and_resolve() {
        let kdf = KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        };
        let backend = Arc::new(Backend::new(SimulatedRegistry::new(), Config::default().kdf(kdf)));
        let store = DidStore::new(MemoryStorage::new(), backend).expect("should start");

        let identity = store.create_root_identity(None, "passw0rd").expect("should create identity");
        let doc = store.new_did(&identity, "passw0rd").expect("should create DID");
        store.publish(&doc, PublishOptions::default(), "passw0rd").expect("should publish");

        let resolved = store.resolve_did(doc.subject(), true).expect("should resolve").expect("should exist");
        assert_eq!(resolved.subject(), doc.subject());
    }
}
