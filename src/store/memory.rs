//! # In-Memory Storage
//!
//! A [`Storage`] implementation over concurrent maps. Clones share the same
//! maps, so a clone handed to a second store sees the same data.

use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;

use super::{DidFilter, Storage, StoreMetadata};
use crate::credential::VerifiableCredential;
use crate::did::Did;
use crate::document::Document;
use crate::identity::RootIdentityRecord;
use crate::url::DidUrl;

/// Process-local [`Storage`].
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    metadata: Arc<DashMap<(), StoreMetadata>>,
    identities: Arc<DashMap<String, RootIdentityRecord>>,
    documents: Arc<DashMap<Did, Document>>,
    credentials: Arc<DashMap<DidUrl, VerifiableCredential>>,
    keys: Arc<DashMap<DidUrl, String>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    async fn metadata(&self) -> Result<Option<StoreMetadata>> {
        Ok(self.metadata.get(&()).map(|m| m.clone()))
    }

    async fn put_metadata(&self, metadata: &StoreMetadata) -> Result<()> {
        self.metadata.insert((), metadata.clone());
        Ok(())
    }

    async fn put_root_identity(&self, identity: &RootIdentityRecord) -> Result<()> {
        self.identities.insert(identity.id.clone(), identity.clone());
        Ok(())
    }

    async fn root_identity(&self, id: &str) -> Result<Option<RootIdentityRecord>> {
        Ok(self.identities.get(id).map(|r| r.clone()))
    }

    async fn root_identities(&self) -> Result<Vec<RootIdentityRecord>> {
        let mut records: Vec<_> = self.identities.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn delete_root_identity(&self, id: &str) -> Result<bool> {
        Ok(self.identities.remove(id).is_some())
    }

    async fn put_document(&self, doc: &Document) -> Result<()> {
        self.documents.insert(doc.subject().clone(), doc.clone());
        Ok(())
    }

    async fn document(&self, did: &Did) -> Result<Option<Document>> {
        Ok(self.documents.get(did).map(|d| d.clone()))
    }

    async fn list_dids(&self, filter: &DidFilter<'_>) -> Result<Vec<Did>> {
        let mut dids: Vec<_> = self
            .documents
            .iter()
            .filter(|d| filter(d.metadata()))
            .map(|d| d.key().clone())
            .collect();
        dids.sort();
        Ok(dids)
    }

    async fn delete_document(&self, did: &Did) -> Result<bool> {
        self.credentials.retain(|id, _| id.did() != Some(did));
        self.keys.retain(|id, _| id.did() != Some(did));
        Ok(self.documents.remove(did).is_some())
    }

    async fn put_credential(&self, credential: &VerifiableCredential) -> Result<()> {
        self.credentials.insert(credential.id().clone(), credential.clone());
        Ok(())
    }

    async fn credential(&self, id: &DidUrl) -> Result<Option<VerifiableCredential>> {
        Ok(self.credentials.get(id).map(|c| c.clone()))
    }

    async fn list_credentials(&self, did: &Did) -> Result<Vec<DidUrl>> {
        let mut ids: Vec<_> = self
            .credentials
            .iter()
            .filter(|c| c.subject_id() == did)
            .map(|c| c.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_credential(&self, id: &DidUrl) -> Result<bool> {
        Ok(self.credentials.remove(id).is_some())
    }

    async fn put_private_key(&self, id: &DidUrl, sealed: &str) -> Result<()> {
        self.keys.insert(id.clone(), sealed.to_string());
        Ok(())
    }

    async fn private_key(&self, id: &DidUrl) -> Result<Option<String>> {
        Ok(self.keys.get(id).map(|k| k.clone()))
    }

    async fn list_private_keys(&self, did: &Did) -> Result<Vec<DidUrl>> {
        let mut ids: Vec<_> =
            self.keys.iter().filter(|k| k.key().did() == Some(did)).map(|k| k.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_private_key(&self, id: &DidUrl) -> Result<bool> {
        Ok(self.keys.remove(id).is_some())
    }
}
