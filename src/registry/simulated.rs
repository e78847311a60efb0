//! # Simulated Registry
//!
//! An in-memory [`Registry`] applying the full consensus rules of the
//! identity chain. It is used to exercise the engine end to end without a
//! network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use chrono::{SubsecRound, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CredentialBiography, CredentialList, CredentialStatus, DidBiography, DidStatus, IdChainRequest,
    Operation, Registry, ResolveRequest, Transaction, page_size,
};
use crate::did::Did;
use crate::document::{Document, PublicKey};
use crate::url::DidUrl;

/// In-memory identity chain.
#[derive(Clone, Debug, Default)]
pub struct SimulatedRegistry {
    ledger: Arc<Mutex<Ledger>>,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct Ledger {
    // oldest first
    dids: HashMap<Did, Vec<Transaction>>,
    credentials: HashMap<DidUrl, Vec<Transaction>>,
    // (subject, credential id) in declaration order
    declared: Vec<(Did, DidUrl)>,
}

impl SimulatedRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Drop every transaction.
    pub async fn reset(&self) {
        *self.ledger.lock().await = Ledger::default();
    }

    /// Number of transactions recorded for a DID.
    pub async fn did_transactions(&self, did: &Did) -> usize {
        self.ledger.lock().await.dids.get(did).map_or(0, Vec::len)
    }

    /// Number of transactions recorded for a credential.
    pub async fn credential_transactions(&self, id: &DidUrl) -> usize {
        self.ledger.lock().await.credentials.get(id).map_or(0, Vec::len)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Registry for SimulatedRegistry {
    async fn submit(&self, payload: &[u8]) -> anyhow::Result<String> {
        self.delay().await;
        let request = IdChainRequest::from_bytes(payload)?;
        let mut ledger = self.ledger.lock().await;

        let txid = Uuid::new_v4().simple().to_string();
        let tx = Transaction {
            txid: txid.clone(),
            timestamp: Utc::now().trunc_subsecs(0),
            request,
            valid: false,
        };

        match tx.operation() {
            Operation::Create => ledger.create(tx)?,
            Operation::Update => ledger.update(tx)?,
            Operation::Transfer => ledger.transfer(tx)?,
            Operation::Deactivate => ledger.deactivate(tx)?,
            Operation::Declare => ledger.declare(tx)?,
            Operation::Revoke => ledger.revoke(tx)?,
        }

        tracing::debug!(%txid, "transaction recorded");
        Ok(txid)
    }

    async fn resolve(&self, request: &ResolveRequest) -> anyhow::Result<Vec<u8>> {
        self.delay().await;
        let ledger = self.ledger.lock().await;

        let bytes = match request {
            ResolveRequest::Did { did, all } => serde_json::to_vec(&ledger.did_biography(did, *all))?,
            ResolveRequest::Credential { id, issuer } => {
                serde_json::to_vec(&ledger.credential_biography(id, issuer.as_ref()))?
            }
            ResolveRequest::ListCredentials { did, skip, limit } => {
                serde_json::to_vec(&ledger.list_credentials(did, *skip, *limit))?
            }
        };
        Ok(bytes)
    }
}

impl Ledger {
    fn create(&mut self, tx: Transaction) -> anyhow::Result<()> {
        let doc = tx.request.document()?;
        if self.dids.contains_key(doc.subject()) {
            bail!("DID {} already exists", doc.subject());
        }
        let doc = self.checked_document(doc)?;
        self.check_signer(&tx.request, &doc)?;

        self.dids.insert(doc.subject().clone(), vec![tx]);
        Ok(())
    }

    fn update(&mut self, tx: Transaction) -> anyhow::Result<()> {
        let doc = tx.request.document()?;
        let (current, last_txid) = self.active_document(doc.subject())?;
        if tx.request.header.previous_txid.as_deref() != Some(last_txid.as_str()) {
            bail!("previous transaction id mismatch for {}", doc.subject());
        }
        if current.controllers() != doc.controllers() {
            bail!("controllers of {} changed, a transfer is required", doc.subject());
        }
        let doc = self.checked_document(doc)?;
        self.check_signer(&tx.request, &doc)?;

        self.push_did(tx, doc.subject());
        Ok(())
    }

    fn transfer(&mut self, tx: Transaction) -> anyhow::Result<()> {
        let doc = tx.request.document()?;
        let (current, _) = self.active_document(doc.subject())?;
        if !current.is_customized() {
            bail!("{} is not customized", doc.subject());
        }

        let ticket = tx.request.ticket()?;
        if ticket.subject() != doc.subject() {
            bail!("ticket is not for {}", doc.subject());
        }
        if !ticket.is_valid(&current) {
            bail!("invalid transfer ticket");
        }
        if !doc.controllers().contains(ticket.to()) {
            bail!("{} is not a controller of the new document", ticket.to());
        }

        let doc = self.checked_document(doc)?;
        if doc.proof_by(ticket.to()).is_none() {
            bail!("new document is not signed by {}", ticket.to());
        }
        if tx.request.signer().did() != Some(ticket.to()) {
            bail!("transfer must be signed by {}", ticket.to());
        }
        self.check_signer(&tx.request, &doc)?;

        self.push_did(tx, doc.subject());
        Ok(())
    }

    fn deactivate(&mut self, tx: Transaction) -> anyhow::Result<()> {
        let did = tx.request.target_did()?;
        let (current, _) = self.active_document(&did)?;

        let signer = tx.request.signer();
        let key = current
            .authentication_key(signer)
            .or_else(|| current.authorization_key(signer))
            .ok_or_else(|| anyhow!("{signer} may not deactivate {did}"))?;
        tx.request.verify(&key.public_key_multibase)?;

        self.push_did(tx, &did);
        Ok(())
    }

    fn declare(&mut self, tx: Transaction) -> anyhow::Result<()> {
        let vc = tx.request.credential()?;
        let id = vc.id().clone();

        if self.is_revoked(&id, Some(vc.subject_id()), Some(vc.issuer())) {
            bail!("credential {id} is revoked");
        }
        if self.declaration(&id).is_some() {
            bail!("credential {id} already declared");
        }

        let (subject, _) = self.active_document(vc.subject_id())?;
        self.check_signer(&tx.request, &subject)?;

        let (issuer, _) = self.active_document(vc.issuer())?;
        vc.verify(&issuer)?;
        if vc.is_expired() {
            bail!("credential {id} is expired");
        }

        self.credentials.entry(id.clone()).or_default().push(tx);
        self.declared.push((vc.subject_id().clone(), id));
        Ok(())
    }

    fn revoke(&mut self, tx: Transaction) -> anyhow::Result<()> {
        let id = tx.request.target_credential()?;
        let signer = tx.request.signer().clone();
        let signer_did = signer.did().cloned().ok_or_else(|| anyhow!("{signer} has no DID"))?;

        if let Some(vc) = self.declaration(&id) {
            if self.is_revoked(&id, Some(vc.subject_id()), Some(vc.issuer())) {
                bail!("credential {id} is already revoked");
            }
            let mut allowed = self.controllers_of(vc.subject_id());
            allowed.extend(self.controllers_of(vc.issuer()));
            if !allowed.contains(&signer_did) {
                bail!("{signer_did} may not revoke {id}");
            }
        } else if self.revocations(&id).any(|tx| tx.request.signer().did() == Some(&signer_did)) {
            bail!("credential {id} is already revoked by {signer_did}");
        }

        let (doc, _) = self.active_document(&signer_did)?;
        self.check_signer(&tx.request, &doc)?;

        self.credentials.entry(id).or_default().push(tx);
        Ok(())
    }

    fn did_biography(&self, did: &Did, all: bool) -> DidBiography {
        let Some(txs) = self.dids.get(did) else {
            return DidBiography {
                did: did.clone(),
                status: DidStatus::NotFound,
                transactions: vec![],
            };
        };

        let deactivated = txs.last().is_some_and(|tx| tx.operation() == Operation::Deactivate);
        let mut transactions: Vec<Transaction> = txs.iter().rev().cloned().collect();
        if !all {
            // the latest document, preceded by the deactivation if any
            transactions.truncate(if deactivated { 2 } else { 1 });
        }

        DidBiography {
            did: did.clone(),
            status: if deactivated { DidStatus::Deactivated } else { DidStatus::Valid },
            transactions,
        }
    }

    fn credential_biography(&self, id: &DidUrl, issuer: Option<&Did>) -> CredentialBiography {
        let declaration = self.declaration(id);
        let subject = declaration.as_ref().map(|vc| vc.subject_id().clone());
        let issuer = declaration.as_ref().map(|vc| vc.issuer().clone()).or_else(|| issuer.cloned());

        let mut allowed = vec![];
        if let Some(subject) = &subject {
            allowed.extend(self.controllers_of(subject));
        }
        if let Some(issuer) = &issuer {
            allowed.extend(self.controllers_of(issuer));
        }

        let transactions: Vec<Transaction> = self
            .credentials
            .get(id)
            .map(|txs| {
                txs.iter()
                    .rev()
                    .filter(|tx| match tx.operation() {
                        Operation::Revoke => {
                            tx.request.signer().did().is_some_and(|did| allowed.contains(did))
                        }
                        _ => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let revoked = transactions.iter().any(|tx| tx.operation() == Operation::Revoke);
        let status = if revoked {
            CredentialStatus::Revoked
        } else if declaration.is_some() {
            CredentialStatus::Valid
        } else {
            CredentialStatus::NotFound
        };

        CredentialBiography {
            id: id.clone(),
            status,
            transactions,
        }
    }

    fn list_credentials(&self, did: &Did, skip: usize, limit: usize) -> CredentialList {
        let credentials = self
            .declared
            .iter()
            .rev()
            .filter(|(subject, _)| subject == did)
            .skip(skip)
            .take(page_size(limit))
            .map(|(_, id)| id.clone())
            .collect();

        CredentialList {
            did: Some(did.clone()),
            credentials,
        }
    }

    fn push_did(&mut self, tx: Transaction, did: &Did) {
        self.dids.entry(did.clone()).or_default().push(tx);
    }

    // The latest document of an active DID, with controllers attached, and
    // the id of its latest transaction.
    fn active_document(&self, did: &Did) -> anyhow::Result<(Document, String)> {
        let Some(txs) = self.dids.get(did) else {
            bail!("DID {did} not found");
        };
        let Some(last) = txs.last() else {
            bail!("DID {did} not found");
        };
        if last.operation() == Operation::Deactivate {
            bail!("DID {did} is deactivated");
        }
        let mut doc = last.request.document()?;
        doc.metadata_mut().transaction_id = Some(last.txid.clone());
        self.attach_controllers(&mut doc);
        Ok((doc, last.txid.clone()))
    }

    // The latest published document of a DID, without status checks.
    fn latest_document(&self, did: &Did) -> Option<Document> {
        self.dids
            .get(did)?
            .iter()
            .rev()
            .find_map(|tx| tx.request.document().ok())
    }

    fn attach_controllers(&self, doc: &mut Document) {
        let docs: Vec<Document> =
            doc.controllers().dids().iter().filter_map(|c| self.latest_document(c)).collect();
        doc.attach_controllers(docs);
    }

    // A submitted document must be valid with its controllers attached.
    fn checked_document(&self, mut doc: Document) -> anyhow::Result<Document> {
        for controller in doc.controllers().dids() {
            self.active_document(controller)?;
        }
        self.attach_controllers(&mut doc);
        if !doc.is_genuine() {
            bail!("document {} is not genuine", doc.subject());
        }
        if !doc.is_qualified() {
            bail!("document {} does not meet its multisig threshold", doc.subject());
        }
        if doc.is_expired() {
            bail!("document {} is expired", doc.subject());
        }
        Ok(doc)
    }

    // The request must be signed with an authentication key of `doc`.
    fn check_signer(&self, request: &IdChainRequest, doc: &Document) -> anyhow::Result<()> {
        let signer = request.signer();
        let key: &PublicKey = doc
            .authentication_key(signer)
            .ok_or_else(|| anyhow!("{signer} is not an authentication key of {}", doc.subject()))?;
        request.verify(&key.public_key_multibase)?;
        Ok(())
    }

    fn declaration(&self, id: &DidUrl) -> Option<crate::credential::VerifiableCredential> {
        self.credentials
            .get(id)?
            .iter()
            .find(|tx| tx.operation() == Operation::Declare)
            .and_then(|tx| tx.request.credential().ok())
    }

    fn revocations<'a>(&'a self, id: &'a DidUrl) -> impl Iterator<Item = &'a Transaction> + 'a {
        self.credentials
            .get(id)
            .into_iter()
            .flatten()
            .filter(|tx| tx.operation() == Operation::Revoke)
    }

    // Revoked by the subject, the issuer or a controller of either.
    fn is_revoked(&self, id: &DidUrl, subject: Option<&Did>, issuer: Option<&Did>) -> bool {
        let mut allowed = vec![];
        for did in [subject, issuer].into_iter().flatten() {
            allowed.extend(self.controllers_of(did));
        }
        self.revocations(id)
            .any(|tx| tx.request.signer().did().is_some_and(|did| allowed.contains(did)))
    }

    // A DID and its controllers.
    fn controllers_of(&self, did: &Did) -> Vec<Did> {
        let mut dids = vec![did.clone()];
        if let Some(doc) = self.latest_document(did) {
            dids.extend(doc.controllers().dids().iter().cloned());
        }
        dids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_did_not_found() {
        let registry = SimulatedRegistry::new();
        let did = Did::new("nobody").expect("should create");
        let bytes = registry
            .resolve(&ResolveRequest::Did {
                did: did.clone(),
                all: true,
            })
            .await
            .expect("should resolve");
        let bio: DidBiography = serde_json::from_slice(&bytes).expect("should parse");
        assert_eq!(bio.status, DidStatus::NotFound);
        assert!(bio.transactions.is_empty());
        assert_eq!(registry.did_transactions(&did).await, 0);
    }

    #[tokio::test]
    async fn garbage_rejected() {
        let registry = SimulatedRegistry::new();
        assert!(registry.submit(b"not a request").await.is_err());
    }
}
