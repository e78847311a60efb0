//! # Verifiable Presentations
//!
//! A presentation bundles credentials about a holder and is signed by the
//! holder. The proof binds a realm (the verifier's domain) and a nonce (the
//! verifier's challenge) so a presentation cannot be replayed elsewhere.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::OneMany;
use crate::credential::VerifiableCredential;
use crate::did::Did;
use crate::document::Document;
use crate::proof::{self, Proof, ProofOptions, ProofPurpose};
use crate::provider::Signer;
use crate::{Error, Result, tracerr};

/// Presentation type.
pub const PRESENTATION_TYPE: &str = "VerifiablePresentation";

/// A verifiable presentation.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    id: String,

    #[serde(rename = "type")]
    type_: OneMany<String>,

    holder: Did,

    created: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    verifiable_credential: Vec<VerifiableCredential>,

    #[serde(skip_serializing_if = "Option::is_none")]
    proof: Option<Proof>,
}

impl Presentation {
    /// Create a presentation of `credentials` signed by the holder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a credential is about someone
    /// other than the holder, and [`Error::Authorization`] if the signer does
    /// not present an authentication key of the holder.
    pub fn create(
        holder: &Document, credentials: Vec<VerifiableCredential>, realm: &str, nonce: &str,
        signer: &impl Signer,
    ) -> Result<Self> {
        if let Some(vc) = credentials.iter().find(|vc| vc.subject_id() != holder.subject()) {
            return Err(Error::InvalidArgument(format!(
                "credential {} is not about {}",
                vc.id(),
                holder.subject()
            )));
        }
        if holder.authentication_key(signer.verification_method()).is_none() {
            tracerr!(Error::Authorization(format!(
                "{} is not an authentication key of {}",
                signer.verification_method(),
                holder.subject()
            )));
        }

        let mut presentation = Self {
            id: format!("urn:uuid:{}", Uuid::new_v4()),
            type_: OneMany::One(PRESENTATION_TYPE.to_string()),
            holder: holder.subject().clone(),
            created: Utc::now().trunc_subsecs(0),
            verifiable_credential: credentials,
            proof: None,
        };
        let options = ProofOptions {
            purpose: ProofPurpose::Authentication,
            domain: Some(realm.to_string()),
            challenge: Some(nonce.to_string()),
        };
        presentation.proof = Some(proof::create(&presentation, signer, options)?);
        Ok(presentation)
    }

    /// Presentation types.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        self.type_.to_vec()
    }

    /// The holder.
    #[must_use]
    pub const fn holder(&self) -> &Did {
        &self.holder
    }

    /// Presented credentials.
    #[must_use]
    pub fn credentials(&self) -> &[VerifiableCredential] {
        &self.verifiable_credential
    }

    /// The realm the presentation was made for.
    #[must_use]
    pub fn realm(&self) -> Option<&str> {
        self.proof.as_ref().and_then(|p| p.domain.as_deref())
    }

    /// The nonce the presentation answers.
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.proof.as_ref().and_then(|p| p.challenge.as_deref())
    }

    /// Verify the holder's proof and every credential. `issuers` must hold
    /// the document of each credential's issuer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if a proof does not verify and
    /// [`Error::InvalidArgument`] if the type is wrong, a credential is about
    /// someone other than the holder or an issuer document is missing.
    pub fn verify(&self, holder: &Document, issuers: &[Document]) -> Result<()> {
        if holder.subject() != &self.holder {
            return Err(Error::InvalidArgument(format!("{} is not the holder", holder.subject())));
        }
        if !self.types().iter().any(|t| t == PRESENTATION_TYPE) {
            return Err(Error::InvalidArgument(format!("not a {PRESENTATION_TYPE}")));
        }
        let Some(proof) = &self.proof else {
            return Err(Error::Authorization("presentation is not signed".into()));
        };
        let Some(key) = holder.authentication_key(&proof.verification_method) else {
            return Err(Error::Authorization(format!(
                "{} is not an authentication key of {}",
                proof.verification_method, self.holder
            )));
        };
        let unsigned = Self {
            proof: None,
            ..self.clone()
        };
        proof::verify(&unsigned, proof, &key.public_key_multibase)?;

        for vc in &self.verifiable_credential {
            if vc.subject_id() != &self.holder {
                return Err(Error::InvalidArgument(format!("credential {} is not about the holder", vc.id())));
            }
            let Some(issuer) = issuers.iter().find(|doc| doc.subject() == vc.issuer()) else {
                return Err(Error::InvalidArgument(format!("issuer {} is unknown", vc.issuer())));
            };
            vc.verify(issuer)?;
        }
        Ok(())
    }

    /// Returns `true` if the presentation verifies and answers `realm` and
    /// `nonce`.
    #[must_use]
    pub fn is_valid(&self, holder: &Document, issuers: &[Document], realm: &str, nonce: &str) -> bool {
        self.realm() == Some(realm)
            && self.nonce() == Some(nonce)
            && holder.is_valid()
            && self.verify(holder, issuers).is_ok()
            && self.verifiable_credential.iter().all(|vc| !vc.is_expired() && !vc.is_revoked())
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
    /// Returns an error if the JSON is not a presentation.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialBuilder;
    use crate::document::{DEFAULT_KEY_FRAGMENT, DocumentBuilder};
    use crate::key::KeyPair;
    use crate::provider::KeySigner;

    fn identity() -> (KeySigner, Document) {
        let keys = KeyPair::generate();
        let key_id = keys.did().url(DEFAULT_KEY_FRAGMENT).expect("should build key id");
        let signer = KeySigner::new(key_id, keys.clone());
        let doc = DocumentBuilder::new(&keys.public_key_multibase())
            .expect("should create builder")
            .seal(&signer)
            .expect("should seal");
        (signer, doc)
    }

    #[test]
    fn present_and_verify() {
        let (issuer_signer, issuer) = identity();
        let (holder_signer, holder) = identity();

        let id = holder.subject().url("email").expect("should build id");
        let vc = CredentialBuilder::new(&id, holder.subject())
            .property("email", "holder@example.com")
            .issue(&issuer, &issuer_signer)
            .expect("should issue");

        let vp = Presentation::create(&holder, vec![vc], "https://example.com", "873172f5", &holder_signer)
            .expect("should create");
        assert!(vp.is_valid(&holder, &[issuer.clone()], "https://example.com", "873172f5"));
        assert!(!vp.is_valid(&holder, &[issuer], "https://example.com", "other"));

        let json = vp.to_json().expect("should serialize");
        assert_eq!(Presentation::from_json(&json).expect("should parse"), vp);
        assert_eq!(vp.types(), [PRESENTATION_TYPE]);
    }

    #[test]
    fn wrong_type_rejected() {
        let (holder_signer, holder) = identity();
        let vp = Presentation::create(&holder, vec![], "realm", "nonce", &holder_signer).expect("should create");

        let json = vp.to_json().expect("should serialize");
        let json = json.replace(r#""type":"VerifiablePresentation""#, r#""type":["Presentation"]"#);
        let altered = Presentation::from_json(&json).expect("should parse");
        let err = altered.verify(&holder, &[]).expect_err("should reject");
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn foreign_credential_rejected() {
        let (issuer_signer, issuer) = identity();
        let (holder_signer, holder) = identity();

        let id = issuer.subject().url("self").expect("should build id");
        let vc = CredentialBuilder::new(&id, issuer.subject())
            .issue(&issuer, &issuer_signer)
            .expect("should issue");

        let err = Presentation::create(&holder, vec![vc], "realm", "nonce", &holder_signer)
            .expect_err("should reject");
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
