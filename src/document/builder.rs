//! # Document Builder
//!
//! A copy-on-write draft of a [`Document`]. Every operation validates before
//! it mutates, so a failed operation leaves the draft untouched. Every
//! mutation drops proofs collected so far.
//!
//! Sealing signs the canonical form of the draft with the acting
//! controller's default key. For a multi-controller document the other
//! controllers countersign by editing the sealed document with
//! [`DocumentBuilder::edit_as`] and sealing again without changes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Controllers, DEFAULT_KEY_FRAGMENT, Document, PublicKey, Service, max_expires};
use crate::credential::VerifiableCredential;
use crate::did::Did;
use crate::proof::{self, Proof, ProofOptions};
use crate::provider::Signer;
use crate::url::DidUrl;
use crate::{Error, Result, key, tracerr};

/// A draft document.
///
/// The builder is serializable so a draft can be handed to another
/// controller to complete.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentBuilder {
    document: Document,

    #[serde(default)]
    customized: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    controllers: Vec<Did>,

    #[serde(skip_serializing_if = "Option::is_none")]
    threshold: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    acting: Option<Did>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    controller_docs: Vec<Document>,
}

impl DocumentBuilder {
    /// Start a normal document whose subject is derived from the default key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the key cannot be decoded.
    pub fn new(default_key: &str) -> Result<Self> {
        let raw = key::decode_public_key(default_key)
            .map_err(|e| Error::InvalidArgument(format!("invalid default key: {e}")))?;
        let subject = key::did_from_public_key(&raw);
        let key_id = subject.url(DEFAULT_KEY_FRAGMENT)?;

        let document = Document {
            id: subject.clone(),
            controllers: Controllers::SelfControlled,
            public_key: vec![PublicKey::new(key_id.clone(), subject, default_key)],
            authentication: vec![key_id],
            authorization: vec![],
            verifiable_credential: vec![],
            service: vec![],
            expires: max_expires(),
            proof: vec![],
            metadata: super::DocumentMetadata::default(),
            controller_docs: vec![],
        };

        Ok(Self {
            document,
            customized: false,
            controllers: vec![],
            threshold: None,
            acting: None,
            controller_docs: vec![],
        })
    }

    /// Start a customized document controlled by `controller_docs` with an
    /// optional `M`-of-`N` threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no controllers, a controller is not a
    /// valid normal document, or the threshold is inconsistent.
    pub fn new_customized(
        subject: Did, controller_docs: &[Document], threshold: Option<usize>,
    ) -> Result<Self> {
        if controller_docs.is_empty() {
            return Err(Error::InvalidArgument("a customized DID requires a controller".into()));
        }
        for doc in controller_docs {
            check_controller(&subject, doc)?;
        }
        let controllers: Vec<Did> = controller_docs.iter().map(|d| d.subject().clone()).collect();
        let model = Controllers::new(controllers.clone(), threshold)?;

        let document = Document {
            id: subject,
            controllers: model,
            public_key: vec![],
            authentication: vec![],
            authorization: vec![],
            verifiable_credential: vec![],
            service: vec![],
            expires: max_expires(),
            proof: vec![],
            metadata: super::DocumentMetadata::default(),
            controller_docs: vec![],
        };

        Ok(Self {
            document,
            customized: true,
            controllers,
            threshold,
            acting: None,
            controller_docs: controller_docs.to_vec(),
        })
    }

    /// Edit a copy of an existing document.
    #[must_use]
    pub fn edit(doc: &Document) -> Self {
        let mut document = doc.clone();
        let published = doc.metadata.signature.as_deref();
        if published.is_some() && published == doc.signature() {
            document.metadata.previous_signature = published.map(ToString::to_string);
        } else if document.metadata.previous_signature.is_none() {
            document.metadata.previous_signature.clone_from(&doc.metadata.signature);
        }
        let controller_docs = std::mem::take(&mut document.controller_docs);

        Self {
            customized: doc.is_customized(),
            controllers: doc.controllers.dids().to_vec(),
            threshold: doc.multisig().map(|ms| ms.m),
            acting: None,
            controller_docs,
            document,
        }
    }

    /// Edit a copy of a customized document as one of its controllers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if `controller` does not control
    /// `doc`.
    pub fn edit_as(doc: &Document, controller: &Document) -> Result<Self> {
        if !doc.is_customized() {
            return Err(Error::InvalidArgument(format!("{} is not customized", doc.subject())));
        }
        if !doc.controllers.contains(controller.subject()) {
            tracerr!(Error::Authorization(format!(
                "{} does not control {}",
                controller.subject(),
                doc.subject()
            )));
        }

        let mut builder = Self::edit(doc);
        builder.controller_docs.retain(|d| d.subject() != controller.subject());
        builder.controller_docs.push(controller.clone());
        builder.acting = Some(controller.subject().clone());
        Ok(builder)
    }

    /// The DID subject of the draft.
    #[must_use]
    pub const fn subject(&self) -> &Did {
        &self.document.id
    }

    /// Add a public key. `controller` defaults to the subject.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] for a duplicate id or key material.
    pub fn add_public_key(
        &mut self, id: &DidUrl, controller: Option<&Did>, public_key: &str,
    ) -> Result<&mut Self> {
        let id = self.key_id(id)?;
        self.check_new_key(&id, public_key)?;
        let controller = controller.unwrap_or(&self.document.id).clone();

        self.document.public_key.push(PublicKey::new(id, controller, public_key));
        Ok(self.touched())
    }

    /// Remove a public key. The default key can never be removed. A key
    /// referenced by authentication or authorization is only removed when
    /// `force` is set, together with its references.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the key does not exist, is the
    /// default key or is referenced without `force`.
    pub fn remove_public_key(&mut self, id: &DidUrl, force: bool) -> Result<&mut Self> {
        let id = self.key_id(id)?;
        if self.document.public_key(&id).is_none() {
            return Err(Error::InvalidArgument(format!("key {id} does not exist")));
        }
        if self.document.default_key_id() == Some(&id) {
            tracerr!(Error::InvalidArgument("cannot remove the default key".into()));
        }
        let referenced =
            self.document.authentication.contains(&id) || self.document.authorization.contains(&id);
        if referenced && !force {
            return Err(Error::InvalidArgument(format!("key {id} is referenced")));
        }

        self.document.authentication.retain(|k| k != &id);
        self.document.authorization.retain(|k| k != &id);
        self.document.public_key.retain(|pk| pk.id != id);
        Ok(self.touched())
    }

    /// Add a new self-controlled key and reference it for authentication.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] for a duplicate id or key material.
    pub fn add_authentication_key(&mut self, id: &DidUrl, public_key: &str) -> Result<&mut Self> {
        let id = self.key_id(id)?;
        self.check_new_key(&id, public_key)?;

        let subject = self.document.id.clone();
        self.document.public_key.push(PublicKey::new(id.clone(), subject, public_key));
        self.document.authentication.push(id);
        Ok(self.touched())
    }

    /// Reference an existing self-controlled key for authentication.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the key does not exist or belongs
    /// to another controller.
    pub fn add_authentication_ref(&mut self, id: &DidUrl) -> Result<&mut Self> {
        let id = self.key_id(id)?;
        let Some(key) = self.document.public_key(&id) else {
            return Err(Error::InvalidArgument(format!("key {id} does not exist")));
        };
        if key.controller != self.document.id {
            return Err(Error::InvalidArgument(format!("key {id} belongs to another controller")));
        }
        if self.document.authentication.contains(&id) {
            return Err(Error::AlreadyExists(id.to_string()));
        }

        self.document.authentication.push(id);
        Ok(self.touched())
    }

    /// Stop using a key for authentication. The key itself is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the key is not an authentication
    /// key or is the default key.
    pub fn remove_authentication_key(&mut self, id: &DidUrl) -> Result<&mut Self> {
        let id = self.key_id(id)?;
        if !self.document.authentication.contains(&id) {
            return Err(Error::InvalidArgument(format!("{id} is not an authentication key")));
        }
        if self.document.default_key_id() == Some(&id) {
            tracerr!(Error::InvalidArgument("cannot remove the default key".into()));
        }

        self.document.authentication.retain(|k| k != &id);
        Ok(self.touched())
    }

    /// Add a key controlled by another DID and reference it for
    /// authorization.
    ///
    /// # Errors
    ///
    /// Returns an error for a customized document, a key controlled by the
    /// subject, or a duplicate id or key material.
    pub fn add_authorization_key(
        &mut self, id: &DidUrl, controller: &Did, public_key: &str,
    ) -> Result<&mut Self> {
        self.check_authorizable()?;
        if controller == &self.document.id {
            return Err(Error::InvalidArgument("authorization key controlled by subject".into()));
        }
        let id = self.key_id(id)?;
        self.check_new_key(&id, public_key)?;

        self.document.public_key.push(PublicKey::new(id.clone(), controller.clone(), public_key));
        self.document.authorization.push(id);
        Ok(self.touched())
    }

    /// Reference an existing key of another controller for authorization.
    ///
    /// # Errors
    ///
    /// Returns an error for a customized document, a missing key or a key
    /// controlled by the subject.
    pub fn add_authorization_ref(&mut self, id: &DidUrl) -> Result<&mut Self> {
        self.check_authorizable()?;
        let id = self.key_id(id)?;
        let Some(key) = self.document.public_key(&id) else {
            return Err(Error::InvalidArgument(format!("key {id} does not exist")));
        };
        if key.controller == self.document.id {
            return Err(Error::InvalidArgument("authorization key controlled by subject".into()));
        }
        if self.document.authorization.contains(&id) {
            return Err(Error::AlreadyExists(id.to_string()));
        }

        self.document.authorization.push(id);
        Ok(self.touched())
    }

    /// Authorize another DID to deactivate this document by copying one of
    /// its authentication keys (the default key if `key` is `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not an authentication key of
    /// `controller`, or for the reasons of
    /// [`DocumentBuilder::add_authorization_key`].
    pub fn authorize_did(
        &mut self, id: &DidUrl, controller: &Document, key: Option<&DidUrl>,
    ) -> Result<&mut Self> {
        let key_id = match key {
            Some(key) => key.clone().resolve(controller.subject()),
            None => controller
                .default_key_id()
                .cloned()
                .ok_or_else(|| Error::InvalidArgument("controller has no default key".into()))?,
        };
        let Some(key) = controller.authentication_key(&key_id) else {
            return Err(Error::InvalidArgument(format!("{key_id} is not an authentication key")));
        };
        let material = key.public_key_multibase.clone();
        self.add_authorization_key(id, controller.subject(), &material)
    }

    /// Stop using a key for authorization. The key itself is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the key is not an authorization
    /// key.
    pub fn remove_authorization_key(&mut self, id: &DidUrl) -> Result<&mut Self> {
        let id = self.key_id(id)?;
        if !self.document.authorization.contains(&id) {
            return Err(Error::InvalidArgument(format!("{id} is not an authorization key")));
        }
        self.document.authorization.retain(|k| k != &id);
        Ok(self.touched())
    }

    /// Embed a credential about the subject.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential is about another subject or its id
    /// already exists.
    pub fn add_credential(&mut self, credential: VerifiableCredential) -> Result<&mut Self> {
        if credential.subject_id() != &self.document.id {
            return Err(Error::InvalidArgument(format!(
                "credential {} is not about {}",
                credential.id(),
                self.document.id
            )));
        }
        if self.document.credential(credential.id()).is_some() {
            return Err(Error::AlreadyExists(credential.id().to_string()));
        }

        self.document.verifiable_credential.push(credential);
        Ok(self.touched())
    }

    /// Remove an embedded credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the credential does not exist.
    pub fn remove_credential(&mut self, id: &DidUrl) -> Result<&mut Self> {
        let id = id.clone().resolve(&self.document.id);
        if self.document.credential(&id).is_none() {
            return Err(Error::InvalidArgument(format!("credential {id} does not exist")));
        }
        self.document.verifiable_credential.retain(|vc| vc.id() != &id);
        Ok(self.touched())
    }

    /// Add a service endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] for a duplicate id.
    pub fn add_service(
        &mut self, id: &DidUrl, type_: &str, endpoint: &str,
        properties: Option<BTreeMap<String, Value>>,
    ) -> Result<&mut Self> {
        let id = id.clone().resolve(&self.document.id);
        if id.did() != Some(&self.document.id) {
            return Err(Error::InvalidArgument(format!("service {id} is not owned by the subject")));
        }
        if self.document.service(&id).is_some() {
            return Err(Error::AlreadyExists(id.to_string()));
        }

        self.document.service.push(Service {
            id,
            type_: type_.to_string(),
            service_endpoint: endpoint.to_string(),
            properties: properties.unwrap_or_default(),
        });
        Ok(self.touched())
    }

    /// Remove a service endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the service does not exist.
    pub fn remove_service(&mut self, id: &DidUrl) -> Result<&mut Self> {
        let id = id.clone().resolve(&self.document.id);
        if self.document.service(&id).is_none() {
            return Err(Error::InvalidArgument(format!("service {id} does not exist")));
        }
        self.document.service.retain(|s| s.id != id);
        Ok(self.touched())
    }

    /// Add a controller to a customized document. The threshold is reset and
    /// must be set again for more than one controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not customized, the controller
    /// already exists, or the controller is not a genuine, active, normal
    /// document.
    pub fn add_controller(&mut self, controller: &Document) -> Result<&mut Self> {
        self.check_customized()?;
        if self.controllers.contains(controller.subject()) {
            return Err(Error::AlreadyExists(controller.subject().to_string()));
        }
        check_controller(&self.document.id, controller)?;

        self.controllers.push(controller.subject().clone());
        self.controller_docs.push(controller.clone());
        self.threshold = None;
        Ok(self.touched())
    }

    /// Remove a controller from a customized document. The acting controller
    /// cannot be removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the document is not customized,
    /// `controller` is the acting controller or not a controller.
    pub fn remove_controller(&mut self, controller: &Did) -> Result<&mut Self> {
        self.check_customized()?;
        if self.acting.as_ref() == Some(controller) {
            tracerr!(Error::InvalidArgument(format!(
                "cannot remove the acting controller {controller}"
            )));
        }
        if !self.controllers.contains(controller) {
            return Err(Error::InvalidArgument(format!("{controller} is not a controller")));
        }

        self.controllers.retain(|c| c != controller);
        self.controller_docs.retain(|d| d.subject() != controller);
        self.threshold = None;
        Ok(self.touched())
    }

    /// Set the number of controller signatures required.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] unless `1 <= m <= N`.
    pub fn set_multisig(&mut self, m: usize) -> Result<&mut Self> {
        self.check_customized()?;
        let n = self.controllers.len();
        if m < 1 || m > n {
            return Err(Error::InvalidArgument(format!("invalid multisig {m}:{n}")));
        }

        let threshold = (n > 1).then_some(m);
        if threshold == self.threshold {
            return Ok(self);
        }
        self.threshold = threshold;
        Ok(self.touched())
    }

    /// Set the expiry. It cannot be later than the default expiry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `expires` is out of range.
    pub fn set_expires(&mut self, expires: DateTime<Utc>) -> Result<&mut Self> {
        if expires > max_expires() {
            return Err(Error::InvalidArgument("expires is out of range".into()));
        }
        self.document.expires = expires;
        Ok(self.touched())
    }

    /// Drop the proof contributed by `controller`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if there is no such proof.
    pub fn remove_proof(&mut self, controller: &Did) -> Result<&mut Self> {
        let before = self.document.proof.len();
        self.document.proof.retain(|p| p.verification_method.did() != Some(controller));
        if self.document.proof.len() == before {
            return Err(Error::InvalidArgument(format!("no proof signed by {controller}")));
        }
        Ok(self)
    }

    /// Seal the draft with the acting controller's default key and return
    /// the signed document. The draft is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadySealed`] if the threshold is already met,
    /// [`Error::AlreadySigned`] if the controller already signed, or
    /// [`Error::Authorization`] if the signer does not present the required
    /// default key.
    pub fn seal(&self, signer: &impl Signer) -> Result<Document> {
        let mut document = self.sanitize()?;

        if document.proof.len() >= document.controllers.threshold() {
            tracerr!(Error::AlreadySealed);
        }

        let key_id = signer.verification_method();
        let signer_did = key_id
            .did()
            .ok_or_else(|| Error::Authorization(format!("{key_id} has no DID")))?
            .clone();

        let expected = if document.is_customized() {
            if let Some(acting) = &self.acting {
                if acting != &signer_did {
                    tracerr!(Error::Authorization(format!(
                        "{signer_did} is not the acting controller"
                    )));
                }
            }
            if !document.controllers.contains(&signer_did) {
                tracerr!(Error::Authorization(format!(
                    "{signer_did} does not control {}",
                    document.id
                )));
            }
            document.controller_doc(&signer_did).and_then(Document::default_key_id).cloned()
        } else {
            document.default_key_id().cloned()
        };
        if expected.as_ref() != Some(key_id) {
            tracerr!(Error::Authorization(format!("{key_id} is not the default key")));
        }

        if document.proof_by(&signer_did).is_some() {
            tracerr!(Error::AlreadySigned(signer_did));
        }

        let proof = proof::create(&document.signable()?, signer, ProofOptions::default())?;
        document.proof.push(proof);
        document.proof.sort_by(Proof::order);

        tracing::debug!(subject = %document.id, signer = %key_id, "document sealed");
        Ok(document)
    }

    // Build the document to sign, enforcing controller consistency.
    fn sanitize(&self) -> Result<Document> {
        let mut document = self.document.clone();
        if self.customized {
            if self.controllers.is_empty() {
                return Err(Error::InvalidArgument("missing controllers".into()));
            }
            document.controllers = Controllers::new(self.controllers.clone(), self.threshold)?;
        } else {
            document.controllers = Controllers::SelfControlled;
        }
        document.controller_docs = self.controller_docs.clone();
        Ok(document)
    }

    fn touched(&mut self) -> &mut Self {
        self.document.proof.clear();
        self
    }

    // Resolve a key id against the subject; keys must carry a fragment.
    fn key_id(&self, id: &DidUrl) -> Result<DidUrl> {
        let id = id.clone().resolve(&self.document.id);
        if id.did() != Some(&self.document.id) || id.fragment().is_none() {
            return Err(Error::InvalidArgument(format!("invalid key id {id}")));
        }
        Ok(id)
    }

    fn check_new_key(&self, id: &DidUrl, public_key: &str) -> Result<()> {
        if self.document.public_key(id).is_some() {
            return Err(Error::AlreadyExists(id.to_string()));
        }
        key::decode_public_key(public_key)
            .map_err(|e| Error::InvalidArgument(format!("invalid public key: {e}")))?;
        if self.document.public_key.iter().any(|pk| pk.public_key_multibase == public_key) {
            return Err(Error::AlreadyExists(format!("key material of {id}")));
        }
        Ok(())
    }

    fn check_customized(&self) -> Result<()> {
        if !self.customized {
            return Err(Error::InvalidArgument(format!("{} is not customized", self.document.id)));
        }
        Ok(())
    }

    fn check_authorizable(&self) -> Result<()> {
        if self.customized {
            return Err(Error::InvalidArgument(
                "authorization keys are not supported by customized DIDs".into(),
            ));
        }
        Ok(())
    }
}

// A controller must be another, active, genuine, normal document.
fn check_controller(subject: &Did, controller: &Document) -> Result<()> {
    if controller.subject() == subject {
        return Err(Error::InvalidArgument("a DID cannot control itself".into()));
    }
    if controller.is_deactivated() {
        return Err(Error::Deactivated(controller.subject().clone()));
    }
    if controller.is_customized() {
        return Err(Error::InvalidArgument(format!(
            "controller {} is customized",
            controller.subject()
        )));
    }
    if controller.is_expired() || !controller.is_genuine() {
        return Err(Error::InvalidArgument(format!(
            "controller {} is not valid",
            controller.subject()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPair;
    use crate::provider::KeySigner;

    fn signer(keys: &KeyPair) -> KeySigner {
        let key_id = keys.did().url(DEFAULT_KEY_FRAGMENT).expect("should build key id");
        KeySigner::new(key_id, keys.clone())
    }

    fn normal() -> (KeyPair, Document) {
        let keys = KeyPair::generate();
        let doc = DocumentBuilder::new(&keys.public_key_multibase())
            .expect("should create builder")
            .seal(&signer(&keys))
            .expect("should seal");
        (keys, doc)
    }

    #[test]
    fn new_document() {
        let (keys, doc) = normal();
        assert_eq!(doc.subject(), &keys.did());
        assert_eq!(
            doc.default_key().map(|k| k.public_key_multibase.clone()),
            Some(keys.public_key_multibase())
        );
        assert!(!doc.is_customized());
        assert_eq!(doc.proofs().len(), 1);
        assert!(doc.is_genuine());
        assert!(doc.is_valid());
    }

    #[test]
    fn wrong_signer() {
        let keys = KeyPair::generate();
        let builder = DocumentBuilder::new(&keys.public_key_multibase()).expect("should create");
        let err = builder.seal(&signer(&KeyPair::generate())).expect_err("should fail");
        assert!(matches!(err, Error::Authorization(_)));
    }

    #[test]
    fn default_key_protected() {
        let (keys, doc) = normal();
        let default_id = keys.did().url(DEFAULT_KEY_FRAGMENT).expect("should build");

        let mut builder = DocumentBuilder::edit(&doc);
        let err = builder.remove_public_key(&default_id, true).expect_err("should fail");
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = builder.remove_public_key(&default_id, false).expect_err("should fail");
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = builder.remove_authentication_key(&default_id).expect_err("should fail");
        assert!(matches!(err, Error::InvalidArgument(_)));

        // failures leave the draft and its proof intact
        let err = builder.seal(&signer(&keys)).expect_err("should fail");
        assert!(matches!(err, Error::AlreadySealed));
        builder.remove_proof(&keys.did()).expect("should remove proof");
        let resealed = builder.seal(&signer(&keys)).expect("should seal");
        assert_eq!(resealed.public_keys().len(), 1);
        assert!(resealed.is_valid());
    }

    #[test]
    fn keys_and_references() {
        let (keys, doc) = normal();
        let subject = doc.subject().clone();
        let key2 = KeyPair::generate();
        let key2_id = DidUrl::parse("#key2").expect("should parse");

        let mut builder = DocumentBuilder::edit(&doc);
        builder.add_public_key(&key2_id, None, &key2.public_key_multibase()).expect("should add");

        let err = builder
            .add_public_key(&key2_id, None, &KeyPair::generate().public_key_multibase())
            .expect_err("duplicate id");
        assert!(matches!(err, Error::AlreadyExists(_)));
        let err = builder
            .add_public_key(
                &DidUrl::parse("#key3").expect("should parse"),
                None,
                &key2.public_key_multibase(),
            )
            .expect_err("duplicate material");
        assert!(matches!(err, Error::AlreadyExists(_)));

        builder.add_authentication_ref(&key2_id).expect("should reference");
        let err = builder.remove_public_key(&key2_id, false).expect_err("referenced");
        assert!(matches!(err, Error::InvalidArgument(_)));
        builder.remove_public_key(&key2_id, true).expect("should force remove");

        let other = KeyPair::generate();
        builder
            .add_authorization_key(
                &DidUrl::parse("#recovery").expect("should parse"),
                &other.did(),
                &other.public_key_multibase(),
            )
            .expect("should add authorization key");
        let err = builder
            .add_authorization_key(
                &DidUrl::parse("#self").expect("should parse"),
                &subject,
                &KeyPair::generate().public_key_multibase(),
            )
            .expect_err("self-controlled authorization key");
        assert!(matches!(err, Error::InvalidArgument(_)));

        let sealed = builder.seal(&signer(&keys)).expect("should seal");
        assert_eq!(sealed.authorization_keys().len(), 1);
        assert_eq!(sealed.authentication_keys().len(), 1);
        assert!(sealed.is_valid());
    }

    #[test]
    fn mutation_drops_proofs() {
        let (keys, doc) = normal();
        let mut builder = DocumentBuilder::edit(&doc);
        let id = DidUrl::parse("#hub").expect("should parse");
        builder.add_service(&id, "Hub", "https://example.com/hub", None).expect("should add");
        let err = builder.add_service(&id, "Hub", "https://example.com/hub", None).expect_err("dup");
        assert!(matches!(err, Error::AlreadyExists(_)));

        let sealed = builder.seal(&signer(&keys)).expect("should seal");
        assert_eq!(sealed.proofs().len(), 1);
        assert_ne!(sealed.signature(), doc.signature());

        // sealing again without changes fails
        let err = DocumentBuilder::edit(&sealed).seal(&signer(&keys)).expect_err("sealed");
        assert!(matches!(err, Error::AlreadySealed));
    }

    #[test]
    fn expiry_is_bounded() {
        let (_, doc) = normal();
        let mut builder = DocumentBuilder::edit(&doc);
        let too_late = max_expires() + chrono::Duration::days(1);
        assert!(builder.set_expires(too_late).is_err());
        builder.set_expires(Utc::now() + chrono::Duration::days(30)).expect("should set");
    }

    #[test]
    fn customized_threshold() {
        let (ka, a) = normal();
        let (kb, b) = normal();
        let subject = Did::new("shared").expect("should create");

        let builder = DocumentBuilder::new_customized(subject.clone(), &[a.clone(), b.clone()], None);
        assert!(matches!(builder, Err(Error::InvalidArgument(_))));

        let builder = DocumentBuilder::new_customized(subject, &[a.clone(), b], Some(2))
            .expect("should create");
        let partial = builder.seal(&signer(&ka)).expect("should seal");
        assert!(partial.is_genuine());
        assert!(!partial.is_qualified());
        assert!(!partial.is_valid());

        // the same controller cannot sign twice
        let err = DocumentBuilder::edit_as(&partial, &a)
            .expect("should edit")
            .seal(&signer(&ka))
            .expect_err("should fail");
        assert!(matches!(err, Error::AlreadySigned(_)));

        let full = DocumentBuilder::edit(&partial).seal(&signer(&kb)).expect("should countersign");
        assert_eq!(full.proofs().len(), 2);
        assert!(full.is_valid());
        assert_eq!(full.multisig().map(|m| m.to_string()).as_deref(), Some("2:2"));
    }
}
