//! # Verifiable Credential
//!
//! A signed claim set about a subject, issued by a DID. Credentials are
//! either kept privately, embedded in the subject's document, or declared on
//! the registry. Declaration state is always taken from the registry and is
//! never stored as a flag.

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::did::Did;
use crate::document::Document;
use crate::proof::{self, Proof, ProofOptions, ProofPurpose};
use crate::provider::Signer;
use crate::url::DidUrl;
use crate::{Error, Result, tracerr};

/// The base type of every credential.
pub const BASE_TYPE: &str = "VerifiableCredential";

/// A verifiable credential.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredential {
    /// Credential id, owned by the subject.
    id: DidUrl,

    /// Credential types, starting with `VerifiableCredential`.
    #[serde(rename = "type")]
    type_: Vec<String>,

    /// The issuing DID.
    issuer: Did,

    /// Time of issuance.
    issuance_date: DateTime<Utc>,

    /// Time of expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration_date: Option<DateTime<Utc>>,

    /// Claims about the subject.
    credential_subject: CredentialSubject,

    /// Issuer's proof.
    #[serde(skip_serializing_if = "Option::is_none")]
    proof: Option<Proof>,

    #[serde(skip)]
    metadata: CredentialMetadata,
}

/// The subject of a credential and its claims.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CredentialSubject {
    /// The holder.
    pub id: Did,

    /// Claims.
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

/// Local and registry-derived credential metadata.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMetadata {
    /// Local, human-friendly name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Id of the last transaction observed for this credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    /// Time the credential was declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,

    /// Set when the registry reports the credential revoked.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub revoked: bool,
}

impl CredentialMetadata {
    /// Copy registry-derived properties from `resolved`.
    pub fn merge_registry(&mut self, resolved: &Self) {
        self.transaction_id.clone_from(&resolved.transaction_id);
        self.published = resolved.published;
        self.revoked = resolved.revoked;
    }
}

impl PartialEq for VerifiableCredential {
    fn eq(&self, other: &Self) -> bool {
        serde_json::to_value(self).ok() == serde_json::to_value(other).ok()
    }
}

impl VerifiableCredential {
    /// Credential id.
    #[must_use]
    pub const fn id(&self) -> &DidUrl {
        &self.id
    }

    /// Credential types.
    #[must_use]
    pub fn types(&self) -> &[String] {
        &self.type_
    }

    /// The issuing DID.
    #[must_use]
    pub const fn issuer(&self) -> &Did {
        &self.issuer
    }

    /// The holder.
    #[must_use]
    pub const fn subject_id(&self) -> &Did {
        &self.credential_subject.id
    }

    /// The subject and its claims.
    #[must_use]
    pub const fn subject(&self) -> &CredentialSubject {
        &self.credential_subject
    }

    /// Time of issuance.
    #[must_use]
    pub const fn issuance_date(&self) -> DateTime<Utc> {
        self.issuance_date
    }

    /// Time of expiry.
    #[must_use]
    pub const fn expiration_date(&self) -> Option<DateTime<Utc>> {
        self.expiration_date
    }

    /// Issuer's proof.
    #[must_use]
    pub const fn proof(&self) -> Option<&Proof> {
        self.proof.as_ref()
    }

    /// Returns `true` if the subject issued the credential about itself.
    #[must_use]
    pub fn is_self_proclaimed(&self) -> bool {
        self.issuer == self.credential_subject.id
    }

    /// Returns `true` if the credential has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expiration_date.is_some_and(|exp| exp < Utc::now())
    }

    /// Credential metadata.
    #[must_use]
    pub const fn metadata(&self) -> &CredentialMetadata {
        &self.metadata
    }

    /// Mutable credential metadata.
    pub fn metadata_mut(&mut self) -> &mut CredentialMetadata {
        &mut self.metadata
    }

    /// Returns `true` if the registry reported the credential revoked.
    #[must_use]
    pub const fn is_revoked(&self) -> bool {
        self.metadata.revoked
    }

    /// Verify the issuer's proof against the issuer's document. The proof
    /// must be made with one of the issuer's authentication keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if the proof is missing, made with a
    /// key the issuer does not authenticate with, or invalid.
    pub fn verify(&self, issuer_doc: &Document) -> Result<()> {
        if issuer_doc.subject() != &self.issuer {
            return Err(Error::InvalidArgument(format!(
                "{} is not the issuer {}",
                issuer_doc.subject(),
                self.issuer
            )));
        }
        let Some(proof) = &self.proof else {
            return Err(Error::Authorization(format!("credential {} is not signed", self.id)));
        };
        let Some(key) = issuer_doc.authentication_key(&proof.verification_method) else {
            return Err(Error::Authorization(format!(
                "{} is not an authentication key of {}",
                proof.verification_method, self.issuer
            )));
        };
        proof::verify(&self.unsigned(), proof, &key.public_key_multibase)
    }

    /// Returns `true` if the issuer's proof verifies.
    #[must_use]
    pub fn is_genuine(&self, issuer_doc: &Document) -> bool {
        self.verify(issuer_doc).is_ok()
    }

    /// Returns `true` if the credential is genuine, not expired, not revoked
    /// and its issuer document is valid.
    #[must_use]
    pub fn is_valid(&self, issuer_doc: &Document) -> bool {
        !self.is_revoked() && !self.is_expired() && issuer_doc.is_valid() && self.is_genuine(issuer_doc)
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is not a valid credential.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn unsigned(&self) -> Self {
        Self {
            proof: None,
            metadata: CredentialMetadata::default(),
            ..self.clone()
        }
    }
}

/// Builds and signs a credential.
#[derive(Clone, Debug)]
pub struct CredentialBuilder {
    id: DidUrl,
    subject: Did,
    types: Vec<String>,
    properties: BTreeMap<String, Value>,
    expiration_date: Option<DateTime<Utc>>,
}

impl CredentialBuilder {
    /// Start a credential about `subject`. A relative `id` is resolved
    /// against the subject.
    #[must_use]
    pub fn new(id: &DidUrl, subject: &Did) -> Self {
        Self {
            id: id.clone().resolve(subject),
            subject: subject.clone(),
            types: vec![BASE_TYPE.to_string()],
            properties: BTreeMap::new(),
            expiration_date: None,
        }
    }

    /// Add a credential type.
    #[must_use]
    pub fn add_type(mut self, type_: impl Into<String>) -> Self {
        let type_ = type_.into();
        if !self.types.contains(&type_) {
            self.types.push(type_);
        }
        self
    }

    /// Add a claim.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Replace the claims.
    #[must_use]
    pub fn properties(mut self, properties: BTreeMap<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    /// Set the expiry. Defaults to the issuer document's expiry.
    #[must_use]
    pub const fn expiration_date(mut self, expires: DateTime<Utc>) -> Self {
        self.expiration_date = Some(expires);
        self
    }

    /// Sign the credential as the issuer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the id is not owned by the subject
    /// or the expiry outlives the issuer, and [`Error::Authorization`] if the
    /// signer does not present an authentication key of the issuer.
    pub fn issue(self, issuer_doc: &Document, signer: &impl Signer) -> Result<VerifiableCredential> {
        if self.id.did() != Some(&self.subject) || self.id.fragment().is_none() {
            return Err(Error::InvalidArgument(format!(
                "credential id {} is not owned by {}",
                self.id, self.subject
            )));
        }
        if issuer_doc.authentication_key(signer.verification_method()).is_none() {
            tracerr!(Error::Authorization(format!(
                "{} is not an authentication key of {}",
                signer.verification_method(),
                issuer_doc.subject()
            )));
        }
        let expires = self.expiration_date.unwrap_or_else(|| issuer_doc.expires());
        if expires > issuer_doc.expires() {
            return Err(Error::InvalidArgument("credential outlives its issuer".into()));
        }

        let mut vc = VerifiableCredential {
            id: self.id,
            type_: self.types,
            issuer: issuer_doc.subject().clone(),
            issuance_date: Utc::now().trunc_subsecs(0),
            expiration_date: Some(expires),
            credential_subject: CredentialSubject {
                id: self.subject,
                properties: self.properties,
            },
            proof: None,
            metadata: CredentialMetadata::default(),
        };
        let options = ProofOptions {
            purpose: ProofPurpose::AssertionMethod,
            ..ProofOptions::default()
        };
        vc.proof = Some(proof::create(&vc, signer, options)?);

        tracing::debug!(id = %vc.id, issuer = %vc.issuer, "credential issued");
        Ok(vc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DEFAULT_KEY_FRAGMENT, DocumentBuilder};
    use crate::key::KeyPair;
    use crate::provider::KeySigner;

    fn identity() -> (KeySigner, Document) {
        let keys = KeyPair::generate();
        let signer =
            KeySigner::new(keys.did().url(DEFAULT_KEY_FRAGMENT).expect("should build"), keys.clone());
        let doc = DocumentBuilder::new(&keys.public_key_multibase())
            .expect("should create")
            .seal(&signer)
            .expect("should seal");
        (signer, doc)
    }

    #[test]
    fn issue_and_verify() {
        let (issuer_signer, issuer) = identity();
        let (_, holder) = identity();

        let vc = CredentialBuilder::new(&DidUrl::parse("#email").expect("should parse"), holder.subject())
            .add_type("EmailCredential")
            .property("email", "alice@example.com")
            .issue(&issuer, &issuer_signer)
            .expect("should issue");

        assert_eq!(vc.id().did(), Some(holder.subject()));
        assert_eq!(vc.types(), ["VerifiableCredential", "EmailCredential"]);
        assert!(!vc.is_self_proclaimed());
        assert!(vc.is_valid(&issuer));

        let json = vc.to_json().expect("should serialize");
        let parsed = VerifiableCredential::from_json(&json).expect("should parse");
        assert_eq!(parsed, vc);
        assert!(parsed.is_genuine(&issuer));
    }

    #[test]
    fn tampered_claims_fail() {
        let (signer, issuer) = identity();
        let mut vc = CredentialBuilder::new(&DidUrl::parse("#name").expect("should parse"), issuer.subject())
            .property("name", "Alice")
            .issue(&issuer, &signer)
            .expect("should issue");
        assert!(vc.is_self_proclaimed());

        vc.credential_subject.properties.insert("name".into(), "Mallory".into());
        assert!(matches!(vc.verify(&issuer), Err(Error::Authorization(_))));
    }

    #[test]
    fn foreign_signer_rejected() {
        let (_, issuer) = identity();
        let (other_signer, _) = identity();
        let err = CredentialBuilder::new(&DidUrl::parse("#x").expect("should parse"), issuer.subject())
            .issue(&issuer, &other_signer)
            .expect_err("should fail");
        assert!(matches!(err, Error::Authorization(_)));
    }
}
