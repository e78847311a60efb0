//! # Data Integrity Proof
//!
//! Documents, credentials, presentations and transfer tickets are secured
//! with an embedded `eddsa-jcs-2022` proof. The signed payload is
//!
//! `SHA-256(JCS(proof config)) || SHA-256(JCS(unsigned data))`
//!
//! where the proof config is the proof without `proofValue` and the unsigned
//! data is the secured object with its proofs (and any local-only state)
//! removed. The signature is multibase (base58btc) encoded into `proofValue`.

use chrono::{DateTime, SubsecRound, Utc};
use multibase::Base;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::provider::Signer;
use crate::url::DidUrl;
use crate::{Error, Result, key};

/// Proof type of every proof created by this crate.
pub const PROOF_TYPE: &str = "DataIntegrityProof";

/// Cryptosuite of every proof created by this crate.
pub const CRYPTOSUITE: &str = "eddsa-jcs-2022";

/// An embedded proof.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_field_names)]
pub struct Proof {
    /// An optional identifier for the proof, a UUID URN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The specific proof type. Always `DataIntegrityProof`.
    #[serde(rename = "type")]
    pub type_: String,

    /// The cryptographic suite. Always `eddsa-jcs-2022`.
    pub cryptosuite: String,

    /// The reason for the proof.
    pub proof_purpose: ProofPurpose,

    /// The key used to verify the proof.
    pub verification_method: DidUrl,

    /// The date-time the proof was created.
    pub created: DateTime<Utc>,

    /// The security domain (realm) the proof is meant to be used in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// A challenge (nonce) supplied by the verifier to mitigate replay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,

    /// The multibase-encoded signature. Omitted on a proof configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_value: Option<String>,
}

/// The purpose of a proof.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ProofPurpose {
    /// Proof of control over a document or ticket.
    #[default]
    Authentication,

    /// Proof of issuance.
    AssertionMethod,
}

/// Optional proof parameters.
#[derive(Clone, Debug, Default)]
pub struct ProofOptions {
    /// Proof purpose.
    pub purpose: ProofPurpose,

    /// Security domain.
    pub domain: Option<String>,

    /// Verifier challenge.
    pub challenge: Option<String>,
}

impl Proof {
    /// Signature bytes, decoded from `proof_value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the proof value is missing or not base58btc.
    pub fn signature(&self) -> Result<Vec<u8>> {
        let Some(value) = &self.proof_value else {
            return Err(Error::Authorization("proof value is missing".into()));
        };
        let (base, signature) = multibase::decode(value)
            .map_err(|e| Error::Authorization(format!("invalid proof value: {e}")))?;
        if base != Base::Base58Btc {
            return Err(Error::Authorization("unsupported multibase encoding".into()));
        }
        Ok(signature)
    }

    /// Sort key: creation time, then verification method.
    pub(crate) fn order(a: &Self, b: &Self) -> std::cmp::Ordering {
        a.created.cmp(&b.created).then_with(|| a.verification_method.cmp(&b.verification_method))
    }
}

/// Canonicalize a value with the JSON Canonicalization Scheme (RFC 8785).
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json_canonicalizer::to_string(value)?)
}

fn payload<T: Serialize>(config: &Proof, unsigned: &T) -> Result<Vec<u8>> {
    let config_hash = Sha256::digest(canonicalize(config)?.as_bytes());
    let data_hash = Sha256::digest(canonicalize(unsigned)?.as_bytes());
    Ok([config_hash.as_slice(), data_hash.as_slice()].concat())
}

/// Create a proof over `unsigned` with the signer's key.
///
/// # Errors
///
/// Returns an error if the data cannot be canonicalized or the signer fails.
pub fn create<T: Serialize>(
    unsigned: &T, signer: &impl Signer, options: ProofOptions,
) -> Result<Proof> {
    let config = Proof {
        id: Some(format!("urn:uuid:{}", Uuid::new_v4())),
        type_: PROOF_TYPE.to_string(),
        cryptosuite: CRYPTOSUITE.to_string(),
        proof_purpose: options.purpose,
        verification_method: signer.verification_method().clone(),
        created: Utc::now().trunc_subsecs(0),
        domain: options.domain,
        challenge: options.challenge,
        proof_value: None,
    };

    let payload = payload(&config, unsigned)?;
    let signature = signer
        .try_sign(&payload)
        .map_err(|e| Error::Authorization(format!("signing failed: {e}")))?;

    Ok(Proof {
        proof_value: Some(multibase::encode(Base::Base58Btc, signature)),
        ..config
    })
}

/// Verify a proof over `unsigned` with a multibase public key.
///
/// # Errors
///
/// Returns [`Error::Authorization`] if the proof is malformed or the
/// signature does not verify.
pub fn verify<T: Serialize>(unsigned: &T, proof: &Proof, public_key_multibase: &str) -> Result<()> {
    if proof.type_ != PROOF_TYPE {
        return Err(Error::Authorization(format!("unsupported proof type {}", proof.type_)));
    }
    if proof.cryptosuite != CRYPTOSUITE {
        return Err(Error::Authorization(format!(
            "unsupported cryptosuite {}",
            proof.cryptosuite
        )));
    }

    let signature = proof.signature()?;
    let config = Proof {
        proof_value: None,
        ..proof.clone()
    };
    let payload = payload(&config, unsigned)?;
    key::verify(public_key_multibase, &payload, &signature)
        .map_err(|e| Error::Authorization(e.to_string()))
}
