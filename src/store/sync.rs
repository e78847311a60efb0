//! # Synchronization
//!
//! Reconciles the local store with the registry. DIDs derived from each root
//! identity are rediscovered by probing derivation indexes, and every stored
//! DID and credential picks up its current registry state.

use std::collections::HashSet;

use super::{DidStore, Storage};
use crate::did::Did;
use crate::document::Document;
use crate::identity::RootIdentity;
use crate::registry::Registry;
use crate::{Error, Result, tracerr};

/// Chooses between a local copy with unpublished edits and the registry
/// copy of the same DID.
pub trait ConflictResolver: Send + Sync {
    /// Return the document to keep.
    fn resolve(&self, local: &Document, remote: &Document) -> Document;
}

impl<F> ConflictResolver for F
where
    F: Fn(&Document, &Document) -> Document + Send + Sync,
{
    fn resolve(&self, local: &Document, remote: &Document) -> Document {
        self(local, remote)
    }
}

/// Keep the local copy. This is the policy used when no resolver is given.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeepLocal;

impl ConflictResolver for KeepLocal {
    fn resolve(&self, local: &Document, _: &Document) -> Document {
        local.clone()
    }
}

/// Counts of what a synchronization touched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// DIDs found on the registry and stored locally.
    pub dids: Vec<Did>,

    /// Credentials whose registry state was refreshed.
    pub credentials: usize,
}

impl<S: Storage, R: Registry> DidStore<S, R> {
    /// Synchronize the store with the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongPassword`] if the password does not unlock the
    /// root identities and [`Error::Conflict`] if a resolver returns a
    /// document for another subject.
    pub async fn synchronize(
        &self, resolver: Option<&dyn ConflictResolver>, password: &str,
    ) -> Result<SyncReport> {
        self.check_password(password).await?;
        let mut report = SyncReport::default();
        let mut seen = HashSet::new();

        for mut record in self.root_identities().await? {
            let identity = RootIdentity::open(&record, password, &self.backend.config().kdf)?;
            let lookahead = self.backend.config().sync_lookahead;

            let mut next = record.index;
            let mut misses = 0;
            let mut index = 0;
            while index < record.index || misses < lookahead {
                let keys = identity.key_at(index);
                let did = keys.did();
                match self.backend.resolve_did(&did, true).await? {
                    Some(remote) => {
                        misses = 0;
                        next = next.max(index + 1);
                        if !self.contains_private_key(&did.url(crate::document::DEFAULT_KEY_FRAGMENT)?).await? {
                            self.store_private_key(&keys, crate::document::DEFAULT_KEY_FRAGMENT, password).await?;
                        }
                        let mut doc = self.reconcile(remote, resolver).await?;
                        doc.metadata_mut().root_identity = Some(record.id.clone());
                        doc.metadata_mut().index = Some(index);
                        self.storage.put_document(&doc).await.map_err(|e| Error::storage(&e))?;
                        seen.insert(did.clone());
                        report.dids.push(did);
                    }
                    None if index >= record.index => misses += 1,
                    None => {}
                }
                index += 1;
            }

            if next != record.index {
                tracing::debug!(id = %record.id, index = next, "root identity index advanced");
                record.index = next;
                self.storage.put_root_identity(&record).await.map_err(|e| Error::storage(&e))?;
            }
        }

        for did in self.list_dids(&|_| true).await? {
            if !seen.contains(&did) {
                if let Some(remote) = self.backend.resolve_did(&did, true).await? {
                    let doc = self.reconcile(remote, resolver).await?;
                    self.storage.put_document(&doc).await.map_err(|e| Error::storage(&e))?;
                    report.dids.push(did.clone());
                }
            }

            for id in self.list_stored_credentials(&did).await? {
                let Some(mut local) = self.load_credential(&id).await? else {
                    continue;
                };
                let issuer = local.issuer().clone();
                if let Some(remote) = self.backend.declared_credential(&id, Some(&issuer), true).await? {
                    local.metadata_mut().merge_registry(remote.metadata());
                    self.storage.put_credential(&local).await.map_err(|e| Error::storage(&e))?;
                    report.credentials += 1;
                }
            }
        }

        tracing::info!(dids = report.dids.len(), credentials = report.credentials, "store synchronized");
        Ok(report)
    }

    // Choose between the stored copy of `remote`'s subject and `remote`.
    async fn reconcile(&self, remote: Document, resolver: Option<&dyn ConflictResolver>) -> Result<Document> {
        let did = remote.subject().clone();
        let Some(local) = self.storage.document(&did).await.map_err(|e| Error::storage(&e))? else {
            let mut remote = remote;
            let signature = remote.signature().map(ToString::to_string);
            remote.metadata_mut().previous_signature = signature;
            return Ok(remote);
        };

        // no unpublished edits: the local proof is what the registry had
        // when it was last seen
        let unchanged = local.signature() == remote.signature()
            || (local.signature().is_some() && local.signature() == local.metadata().signature.as_deref());
        if unchanged {
            let mut doc = remote.clone();
            doc.metadata_mut().merge_local(local.metadata());
            doc.metadata_mut().previous_signature = remote.signature().map(ToString::to_string);
            return Ok(doc);
        }

        let mut doc = resolver.unwrap_or(&KeepLocal).resolve(&local, &remote);
        if doc.subject() != &did {
            tracerr!(Error::Conflict(format!("resolver returned {} for {did}", doc.subject())));
        }
        tracing::debug!(%did, "local copy has unpublished changes");
        doc.metadata_mut().merge_local(local.metadata());
        doc.metadata_mut().merge_registry(remote.metadata());
        Ok(doc)
    }
}
