//! # Transfer Ticket
//!
//! A transfer ticket authorizes moving control of a customized DID to a new
//! controller. It binds the subject's current transaction id, so it can be
//! consumed by exactly one publish: the publish itself changes the current
//! transaction id.
//!
//! A ticket must be signed by enough current controllers to meet the
//! subject's threshold. Each controller signs with its default key.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};

use crate::did::Did;
use crate::document::Document;
use crate::proof::{self, Proof, ProofOptions};
use crate::provider::Signer;
use crate::{Error, Result, tracerr};

/// An ownership-transfer authorization.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferTicket {
    /// The DID being transferred.
    id: Did,

    /// The controller receiving the DID.
    to: Did,

    /// The subject's transaction id at the time the ticket was created.
    txid: String,

    /// One proof per signing controller.
    #[serde(default, with = "crate::core::flexvec", skip_serializing_if = "Vec::is_empty")]
    proof: Vec<Proof>,
}

impl TransferTicket {
    /// Create an unsigned ticket transferring `subject` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the subject is not customized or
    /// has never been published, and [`Error::Deactivated`] if it is
    /// deactivated.
    pub fn new(subject: &Document, to: Did) -> Result<Self> {
        if !subject.is_customized() {
            return Err(Error::InvalidArgument(format!(
                "{} is not customized and cannot be transferred",
                subject.subject()
            )));
        }
        if subject.is_deactivated() {
            return Err(Error::Deactivated(subject.subject().clone()));
        }
        let Some(txid) = &subject.metadata().transaction_id else {
            return Err(Error::InvalidArgument(format!("{} is not published", subject.subject())));
        };

        Ok(Self {
            id: subject.subject().clone(),
            to,
            txid: txid.clone(),
            proof: vec![],
        })
    }

    /// The DID being transferred.
    #[must_use]
    pub const fn subject(&self) -> &Did {
        &self.id
    }

    /// The controller receiving the DID.
    #[must_use]
    pub const fn to(&self) -> &Did {
        &self.to
    }

    /// The bound transaction id.
    #[must_use]
    pub fn transaction_id(&self) -> &str {
        &self.txid
    }

    /// Proofs collected so far.
    #[must_use]
    pub fn proofs(&self) -> &[Proof] {
        &self.proof
    }

    /// Add the signature of one of the subject's current controllers. A
    /// ticket that already meets the threshold is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if the signer is not a controller's
    /// default key, or [`Error::AlreadySigned`] if the controller already
    /// signed.
    pub fn sign(&self, subject: &Document, signer: &impl Signer) -> Result<Self> {
        if subject.subject() != &self.id {
            return Err(Error::InvalidArgument(format!("ticket is not for {}", subject.subject())));
        }
        if self.proof.len() >= subject.controllers().threshold() {
            tracing::debug!(subject = %self.id, "ticket already qualified");
            return Ok(self.clone());
        }

        let key_id = signer.verification_method();
        let Some(controller) = key_id.did().filter(|did| subject.controllers().contains(did))
        else {
            tracerr!(Error::Authorization(format!("{key_id} is not a controller key")));
        };
        let default_key = subject.controller_doc(controller).and_then(Document::default_key_id);
        if default_key != Some(key_id) {
            tracerr!(Error::Authorization(format!("{key_id} is not a default key")));
        }
        if self.proof.iter().any(|p| p.verification_method.did() == Some(controller)) {
            tracerr!(Error::AlreadySigned(controller.clone()));
        }

        let mut ticket = self.clone();
        ticket.proof.push(proof::create(&self.unsigned(), signer, ProofOptions::default())?);
        ticket.proof.sort_by(Proof::order);
        Ok(ticket)
    }

    /// Returns `true` if the ticket carries exactly the subject's threshold
    /// of proofs, each from a distinct controller's default key.
    #[must_use]
    pub fn is_genuine(&self, subject: &Document) -> bool {
        if subject.subject() != &self.id {
            return false;
        }
        if self.proof.len() != subject.controllers().threshold() {
            return false;
        }

        let unsigned = self.unsigned();
        let mut signers = vec![];
        for p in &self.proof {
            let Some(controller) = p.verification_method.did() else {
                return false;
            };
            if !subject.controllers().contains(controller) || signers.contains(&controller) {
                return false;
            }
            let Some(key) = subject.controller_doc(controller).and_then(Document::default_key)
            else {
                return false;
            };
            if key.id != p.verification_method
                || proof::verify(&unsigned, p, &key.public_key_multibase).is_err()
            {
                return false;
            }
            signers.push(controller);
        }
        true
    }

    /// Returns `true` if the ticket is genuine and still bound to the
    /// subject's current transaction.
    #[must_use]
    pub fn is_valid(&self, subject: &Document) -> bool {
        subject.metadata().transaction_id.as_deref() == Some(self.txid.as_str())
            && !subject.is_deactivated()
            && self.is_genuine(subject)
    }

    /// Encode for a request header: base64url of the JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(Base64UrlUnpadded::encode_string(&serde_json::to_vec(self)?))
    }

    /// Decode from a request header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the value is not a ticket.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|e| Error::InvalidArgument(format!("invalid ticket encoding: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn unsigned(&self) -> Self {
        Self {
            proof: vec![],
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DEFAULT_KEY_FRAGMENT, DocumentBuilder};
    use crate::key::KeyPair;
    use crate::provider::KeySigner;

    fn controller() -> (KeySigner, Document) {
        let keys = KeyPair::generate();
        let signer =
            KeySigner::new(keys.did().url(DEFAULT_KEY_FRAGMENT).expect("should build"), keys.clone());
        let doc = DocumentBuilder::new(&keys.public_key_multibase())
            .expect("should create")
            .seal(&signer)
            .expect("should seal");
        (signer, doc)
    }

    fn shared(controllers: &[Document], signers: &[&KeySigner], m: usize) -> Document {
        let subject = Did::new("shared").expect("should create");
        let builder = DocumentBuilder::new_customized(subject, controllers, Some(m).filter(|_| controllers.len() > 1))
            .expect("should create");
        let mut doc = builder.seal(signers[0]).expect("should seal");
        for signer in &signers[1..m] {
            doc = DocumentBuilder::edit(&doc).seal(*signer).expect("should countersign");
        }
        doc.metadata_mut().transaction_id = Some("tx-1".into());
        doc
    }

    #[test]
    fn two_of_three() {
        let (sa, a) = controller();
        let (sb, b) = controller();
        let (_, c) = controller();
        let doc = shared(&[a, b, c.clone()], &[&sa, &sb], 2);

        let ticket = TransferTicket::new(&doc, c.subject().clone()).expect("should create");
        let ticket = ticket.sign(&doc, &sa).expect("should sign");
        assert!(!ticket.is_genuine(&doc));

        let err = ticket.sign(&doc, &sa).expect_err("should fail");
        assert!(matches!(err, Error::AlreadySigned(_)));

        let ticket = ticket.sign(&doc, &sb).expect("should sign");
        assert!(ticket.is_valid(&doc));

        // qualified tickets are returned unchanged
        assert_eq!(ticket.sign(&doc, &sb).expect("should return"), ticket);

        let decoded = TransferTicket::decode(&ticket.encode().expect("should encode"))
            .expect("should decode");
        assert_eq!(decoded, ticket);

        // a new transaction invalidates the ticket
        let mut moved = doc;
        moved.metadata_mut().transaction_id = Some("tx-2".into());
        assert!(!ticket.is_valid(&moved));
    }

    #[test]
    fn non_controller_rejected() {
        let (sa, a) = controller();
        let (sx, _) = controller();
        let doc = shared(&[a], &[&sa], 1);

        let ticket = TransferTicket::new(&doc, Did::new("bob").expect("should create"))
            .expect("should create");
        let err = ticket.sign(&doc, &sx).expect_err("should fail");
        assert!(matches!(err, Error::Authorization(_)));
    }

    #[test]
    fn normal_documents_cannot_transfer() {
        let (_, a) = controller();
        let err = TransferTicket::new(&a, Did::new("bob").expect("should create"))
            .expect_err("should fail");
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
