//! # Backend
//!
//! [`Backend`] wraps a [`Registry`] with a bounded, time-limited resolution
//! cache and a per-call timeout. It frames submissions, parses resolution
//! results, attaches controller documents and derives registry metadata.
//!
//! There is no process-wide backend: callers share one by passing an
//! `Arc<Backend<R>>` to each store.

use std::future::Future;
use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};

use crate::config::Config;
use crate::credential::VerifiableCredential;
use crate::did::Did;
use crate::document::Document;
use crate::registry::{
    CredentialBiography, CredentialList, CredentialStatus, DidBiography, DidStatus, IdChainRequest,
    Operation, Registry, ResolveRequest, Transaction,
};
use crate::url::DidUrl;
use crate::{Error, Result, tracerr};

struct CacheEntry {
    fetched: Instant,
    bytes: Vec<u8>,
}

/// Registry handle with a resolution cache.
pub struct Backend<R: Registry> {
    registry: R,
    config: Config,
    cache: Mutex<LruCache<ResolveRequest, CacheEntry>>,
}

impl<R: Registry> std::fmt::Debug for Backend<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<R: Registry> Backend<R> {
    /// Create a backend over `registry`.
    pub fn new(registry: R, config: Config) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            registry,
            config,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The wrapped registry.
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    /// The configuration in use.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Drop every cached resolution result.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Submit a request, returning its transaction id. Cached results for the
    /// affected identifiers are invalidated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry rejects the request or does
    /// not answer in time.
    pub async fn submit(&self, request: &IdChainRequest) -> Result<String> {
        let payload = request.to_bytes()?;
        let txid = self.call(self.registry.submit(&payload)).await?;
        self.invalidate(request).await;

        tracing::info!(operation = %request.operation(), %txid, "request submitted");
        Ok(txid)
    }

    /// Resolve the latest document of a DID. Cached results are used unless
    /// `force` is set or the entry has expired.
    ///
    /// The returned document carries registry metadata and the documents of
    /// its controllers. A deactivated DID resolves to its last document with
    /// the deactivated flag set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails or returns an invalid
    /// document.
    pub async fn resolve_did(&self, did: &Did, force: bool) -> Result<Option<Document>> {
        let Some(mut doc) = self.resolve_latest(did, force).await? else {
            return Ok(None);
        };

        let mut controllers = vec![];
        for controller in doc.controllers().dids() {
            let Some(controller_doc) = self.resolve_latest(controller, force).await? else {
                tracerr!(Error::Backend(format!("controller {controller} of {did} not found")));
            };
            controllers.push(controller_doc);
        }
        doc.attach_controllers(controllers);

        if !doc.is_genuine() || !doc.is_qualified() {
            tracerr!(Error::Backend(format!("resolved document {did} is not valid")));
        }
        Ok(Some(doc))
    }

    /// Resolve the full transaction history of a DID, most recent first.
    /// Each transaction is checked against the document it carries, or the
    /// preceding document for a deactivation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn resolve_did_biography(&self, did: &Did) -> Result<DidBiography> {
        let request = ResolveRequest::Did {
            did: did.clone(),
            all: true,
        };
        let mut bio: DidBiography = serde_json::from_slice(&self.fetch(&request, true).await?)?;

        // oldest first, so a deactivation sees the document it ends
        let mut current: Option<Document> = None;
        for tx in bio.transactions.iter_mut().rev() {
            if tx.operation() == Operation::Deactivate {
                tx.valid = current.as_ref().is_some_and(|doc| {
                    doc.authentication_key(tx.request.signer())
                        .or_else(|| doc.authorization_key(tx.request.signer()))
                        .is_some_and(|key| tx.request.verify(&key.public_key_multibase).is_ok())
                });
                continue;
            }
            let Ok(mut doc) = tx.request.document() else {
                tx.valid = false;
                continue;
            };
            for controller in doc.controllers().dids().to_vec() {
                if let Some(controller_doc) = self.resolve_latest(&controller, false).await? {
                    doc.attach_controllers([controller_doc]);
                }
            }
            tx.valid = doc.is_genuine()
                && doc
                    .authentication_key(tx.request.signer())
                    .is_some_and(|key| tx.request.verify(&key.public_key_multibase).is_ok());
            current = Some(doc);
        }
        Ok(bio)
    }

    /// Resolve a declared credential. Returns `None` if the credential was
    /// never declared or has been revoked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn resolve_credential(
        &self, id: &DidUrl, issuer: Option<&Did>, force: bool,
    ) -> Result<Option<VerifiableCredential>> {
        let declared = self.declared_credential(id, issuer, force).await?;
        Ok(declared.filter(|vc| !vc.is_revoked()))
    }

    /// The declared copy of a credential with its registry metadata,
    /// revoked or not. Returns `None` if the credential was never declared.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn declared_credential(
        &self, id: &DidUrl, issuer: Option<&Did>, force: bool,
    ) -> Result<Option<VerifiableCredential>> {
        let bio = self.credential_biography(id, issuer, force).await?;
        let Some(mut vc) = bio.credential() else {
            return Ok(None);
        };
        if let Some(declare) = bio.transactions.iter().find(|tx| tx.operation() == Operation::Declare)
        {
            let metadata = vc.metadata_mut();
            metadata.transaction_id = Some(declare.txid.clone());
            metadata.published = Some(declare.timestamp);
        }
        vc.metadata_mut().revoked = bio.status == CredentialStatus::Revoked;
        Ok(Some(vc))
    }

    /// Returns `true` if the credential was revoked by its subject, its
    /// issuer or a controller of either. `issuer` is used when the
    /// credential was never declared.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn is_revoked(&self, id: &DidUrl, issuer: Option<&Did>) -> Result<bool> {
        let bio = self.credential_biography(id, issuer, true).await?;
        Ok(bio.status == CredentialStatus::Revoked)
    }

    /// Resolve the transaction history of a credential, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn resolve_credential_biography(
        &self, id: &DidUrl, issuer: Option<&Did>,
    ) -> Result<CredentialBiography> {
        let mut bio = self.credential_biography(id, issuer, true).await?;
        for tx in &mut bio.transactions {
            tx.valid = self.check_credential_transaction(tx).await?;
        }
        Ok(bio)
    }

    /// List declared credentials about `did`, newest first. A `limit` of 0
    /// selects the default page size and larger limits are capped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the registry fails.
    pub async fn list_credentials(
        &self, did: &Did, skip: usize, limit: usize,
    ) -> Result<Vec<DidUrl>> {
        let request = ResolveRequest::ListCredentials {
            did: did.clone(),
            skip,
            limit: crate::registry::page_size(limit),
        };
        let list: CredentialList = serde_json::from_slice(&self.fetch(&request, false).await?)?;
        Ok(list.credentials)
    }

    // The latest document of a DID with registry metadata, without
    // controller documents.
    async fn resolve_latest(&self, did: &Did, force: bool) -> Result<Option<Document>> {
        let request = ResolveRequest::Did {
            did: did.clone(),
            all: false,
        };
        let bio: DidBiography = serde_json::from_slice(&self.fetch(&request, force).await?)?;
        if bio.status == DidStatus::NotFound {
            return Ok(None);
        }

        let Some((tx, mut doc)) =
            bio.transactions.iter().find_map(|tx| tx.request.document().ok().map(|doc| (tx, doc)))
        else {
            tracerr!(Error::Backend(format!("no document in the history of {did}")));
        };
        if doc.subject() != did {
            tracerr!(Error::Backend(format!("registry returned {} for {did}", doc.subject())));
        }

        let signature = doc.signature().map(ToString::to_string);
        let metadata = doc.metadata_mut();
        metadata.transaction_id = Some(tx.txid.clone());
        metadata.signature = signature;
        metadata.published = Some(tx.timestamp);
        metadata.deactivated = bio.status == DidStatus::Deactivated;
        Ok(Some(doc))
    }

    async fn credential_biography(
        &self, id: &DidUrl, issuer: Option<&Did>, force: bool,
    ) -> Result<CredentialBiography> {
        let request = ResolveRequest::Credential {
            id: id.clone(),
            issuer: issuer.cloned(),
        };
        Ok(serde_json::from_slice(&self.fetch(&request, force).await?)?)
    }

    async fn check_credential_transaction(&self, tx: &Transaction) -> Result<bool> {
        let signer = tx.request.signer();
        let Some(signer_did) = signer.did() else {
            return Ok(false);
        };
        let Some(signer_doc) = self.resolve_did(signer_did, false).await? else {
            return Ok(false);
        };

        let request_ok = signer_doc
            .authentication_key(signer)
            .is_some_and(|key| tx.request.verify(&key.public_key_multibase).is_ok());
        if tx.operation() != Operation::Declare {
            return Ok(request_ok);
        }

        let Ok(vc) = tx.request.credential() else {
            return Ok(false);
        };
        let Some(issuer_doc) = self.resolve_did(vc.issuer(), false).await? else {
            return Ok(false);
        };
        Ok(request_ok && vc.is_genuine(&issuer_doc))
    }

    async fn fetch(&self, request: &ResolveRequest, force: bool) -> Result<Vec<u8>> {
        if !force {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get(request) {
                if entry.fetched.elapsed() < self.config.cache_ttl() {
                    tracing::debug!(?request, "resolve cache hit");
                    return Ok(entry.bytes.clone());
                }
            }
        }

        tracing::debug!(?request, "resolving from registry");
        let bytes = self.call(self.registry.resolve(request)).await?;
        self.cache.lock().await.put(
            request.clone(),
            CacheEntry {
                fetched: Instant::now(),
                bytes: bytes.clone(),
            },
        );
        Ok(bytes)
    }

    async fn call<T>(&self, fut: impl Future<Output = anyhow::Result<T>>) -> Result<T> {
        match timeout(self.config.request_timeout(), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => tracerr!(Error::backend(&e)),
            Err(_) => tracerr!(Error::Backend("registry request timed out".into())),
        }
    }

    async fn invalidate(&self, request: &IdChainRequest) {
        let mut targets = vec![];
        match request.operation() {
            Operation::Create | Operation::Update | Operation::Transfer => {
                if let Ok(doc) = request.document() {
                    targets.push(doc.subject().clone());
                }
            }
            Operation::Deactivate => {
                if let Ok(did) = request.target_did() {
                    targets.push(did);
                }
            }
            Operation::Declare | Operation::Revoke => {}
        }
        let credential = match request.operation() {
            Operation::Declare => request.credential().ok().map(|vc| {
                targets.push(vc.subject_id().clone());
                vc.id().clone()
            }),
            Operation::Revoke => request.target_credential().ok(),
            _ => None,
        };
        if let Some(did) = credential.as_ref().and_then(DidUrl::did) {
            targets.push(did.clone());
        }

        let mut cache = self.cache.lock().await;
        let stale: Vec<ResolveRequest> = cache
            .iter()
            .filter(|(key, _)| match key {
                ResolveRequest::Did { did, .. } | ResolveRequest::ListCredentials { did, .. } => {
                    targets.contains(did)
                }
                ResolveRequest::Credential { id, .. } => credential.as_ref() == Some(id),
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::SimulatedRegistry;

    #[tokio::test]
    async fn unknown_did() {
        let backend = Backend::new(SimulatedRegistry::new(), Config::default());
        let did = Did::new("nobody").expect("should create");
        assert!(backend.resolve_did(&did, false).await.expect("should resolve").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_backend_error() {
        let registry = SimulatedRegistry::new().with_latency(Duration::from_secs(60));
        let backend = Backend::new(registry, Config::default().request_timeout_secs(1));
        let did = Did::new("slow").expect("should create");

        let err = backend.resolve_did(&did, true).await.expect_err("should time out");
        assert!(matches!(err, Error::Backend(_)));
    }
}
