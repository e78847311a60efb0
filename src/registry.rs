//! # Registry
//!
//! The identity registry is a versioned, append-only ledger of signed
//! requests. This module defines the contract the engine uses to talk to it
//! ([`Registry`]), the request framing submitted to it ([`IdChainRequest`])
//! and the resolution results it returns ([`DidBiography`],
//! [`CredentialBiography`], [`CredentialList`]).

pub mod simulated;

use std::fmt::{self, Display, Formatter};
use std::future::Future;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::simulated::SimulatedRegistry;
use crate::credential::VerifiableCredential;
use crate::did::Did;
use crate::document::{Document, KEY_TYPE};
use crate::provider::Signer;
use crate::ticket::TransferTicket;
use crate::url::DidUrl;
use crate::{Error, Result, key};

/// Specification tag of DID requests.
pub const DID_SPECIFICATION: &str = "elastos/did/1.0";

/// Specification tag of credential requests.
pub const CREDENTIAL_SPECIFICATION: &str = "elastos/credential/1.0";

/// Default page size of [`ResolveRequest::ListCredentials`].
pub const DEFAULT_PAGE_SIZE: usize = 128;

/// Maximum page size of [`ResolveRequest::ListCredentials`].
pub const MAX_PAGE_SIZE: usize = 512;

/// [`Registry`] is implemented by clients of the identity registry.
///
/// Implementers are responsible for transport only: the engine frames and
/// signs requests, and parses and validates resolution results. Requests
/// for the same identifier must be applied in submission order.
pub trait Registry: Send + Sync {
    /// Submit a serialized [`IdChainRequest`], returning its transaction id.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry rejects the request or cannot be
    /// reached.
    fn submit(&self, payload: &[u8]) -> impl Future<Output = anyhow::Result<String>> + Send;

    /// Resolve an identifier, returning the JSON-encoded result:
    /// [`DidBiography`], [`CredentialBiography`] or [`CredentialList`].
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be reached.
    fn resolve(
        &self, request: &ResolveRequest,
    ) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

/// A resolution request.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase", tag = "method")]
pub enum ResolveRequest {
    /// Resolve a DID: the latest transaction, or its full history when `all`
    /// is set.
    Did {
        /// The DID.
        did: Did,

        /// Return every transaction.
        all: bool,
    },

    /// Resolve a credential's transaction history.
    Credential {
        /// Credential id.
        id: DidUrl,

        /// Issuer used to check revocations of undeclared credentials.
        #[serde(skip_serializing_if = "Option::is_none")]
        issuer: Option<Did>,
    },

    /// List declared credentials about a DID, newest first.
    ListCredentials {
        /// The credential subject.
        did: Did,

        /// Number of entries to skip.
        skip: usize,

        /// Maximum number of entries to return.
        limit: usize,
    },
}

/// Request operation.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Publish a new DID document.
    Create,

    /// Publish a new version of a DID document.
    Update,

    /// Publish a new version of a customized DID document under a new
    /// controller.
    Transfer,

    /// Deactivate a DID.
    Deactivate,

    /// Declare a credential.
    Declare,

    /// Revoke a credential.
    Revoke,
}

impl Operation {
    /// The specification tag the operation belongs to.
    #[must_use]
    pub const fn specification(self) -> &'static str {
        match self {
            Self::Create | Self::Update | Self::Transfer | Self::Deactivate => DID_SPECIFICATION,
            Self::Declare | Self::Revoke => CREDENTIAL_SPECIFICATION,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Transfer => "TRANSFER",
            Self::Deactivate => "DEACTIVATE",
            Self::Declare => "DECLARE",
            Self::Revoke => "REVOKE",
        };
        f.write_str(tag)
    }
}

/// A signed registry request.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IdChainRequest {
    /// Request header.
    pub header: RequestHeader,

    /// base64url of the document or credential JSON, or the target id for
    /// DEACTIVATE and REVOKE.
    pub payload: String,

    /// Signature over the header and payload.
    pub proof: RequestProof,
}

/// Request header.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestHeader {
    /// Specification tag.
    pub specification: String,

    /// Operation.
    pub operation: Operation,

    /// Transaction id the update is based on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_txid: Option<String>,

    /// Encoded transfer ticket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

/// Request signature.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestProof {
    /// Key type.
    #[serde(rename = "type")]
    pub type_: String,

    /// The signing key.
    pub verification_method: DidUrl,

    /// base64url Ed25519 signature.
    pub signature: String,
}

impl IdChainRequest {
    /// A CREATE request.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized or signing
    /// fails.
    pub fn create(doc: &Document, signer: &impl Signer) -> Result<Self> {
        Self::sign(Operation::Create, None, None, encode_json(doc)?, signer)
    }

    /// An UPDATE request based on `previous_txid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized or signing
    /// fails.
    pub fn update(doc: &Document, previous_txid: &str, signer: &impl Signer) -> Result<Self> {
        Self::sign(
            Operation::Update,
            Some(previous_txid.to_string()),
            None,
            encode_json(doc)?,
            signer,
        )
    }

    /// A TRANSFER request carrying `ticket`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized or signing
    /// fails.
    pub fn transfer(doc: &Document, ticket: &TransferTicket, signer: &impl Signer) -> Result<Self> {
        Self::sign(Operation::Transfer, None, Some(ticket.encode()?), encode_json(doc)?, signer)
    }

    /// A DEACTIVATE request.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn deactivate(did: &Did, signer: &impl Signer) -> Result<Self> {
        Self::sign(Operation::Deactivate, None, None, did.to_string(), signer)
    }

    /// A DECLARE request.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential cannot be serialized or signing
    /// fails.
    pub fn declare(credential: &VerifiableCredential, signer: &impl Signer) -> Result<Self> {
        Self::sign(Operation::Declare, None, None, encode_json(credential)?, signer)
    }

    /// A REVOKE request.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn revoke(id: &DidUrl, signer: &impl Signer) -> Result<Self> {
        Self::sign(Operation::Revoke, None, None, id.to_string(), signer)
    }

    fn sign(
        operation: Operation, previous_txid: Option<String>, ticket: Option<String>,
        payload: String, signer: &impl Signer,
    ) -> Result<Self> {
        let header = RequestHeader {
            specification: operation.specification().to_string(),
            operation,
            previous_txid,
            ticket,
        };
        let signature = signer
            .try_sign(&signing_input(&header, &payload))
            .map_err(|e| Error::Authorization(format!("signing failed: {e}")))?;

        Ok(Self {
            header,
            payload,
            proof: RequestProof {
                type_: KEY_TYPE.to_string(),
                verification_method: signer.verification_method().clone(),
                signature: Base64UrlUnpadded::encode_string(&signature),
            },
        })
    }

    /// The request operation.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.header.operation
    }

    /// The signing key.
    #[must_use]
    pub const fn signer(&self) -> &DidUrl {
        &self.proof.verification_method
    }

    /// The document carried by CREATE, UPDATE and TRANSFER.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for other operations or an
    /// undecodable payload.
    pub fn document(&self) -> Result<Document> {
        match self.header.operation {
            Operation::Create | Operation::Update | Operation::Transfer => {
                decode_json(&self.payload)
            }
            op => Err(Error::InvalidArgument(format!("{op} carries no document"))),
        }
    }

    /// The credential carried by DECLARE.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for other operations or an
    /// undecodable payload.
    pub fn credential(&self) -> Result<VerifiableCredential> {
        match self.header.operation {
            Operation::Declare => decode_json(&self.payload),
            op => Err(Error::InvalidArgument(format!("{op} carries no credential"))),
        }
    }

    /// The ticket carried by TRANSFER.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the ticket is missing or
    /// undecodable.
    pub fn ticket(&self) -> Result<TransferTicket> {
        let Some(ticket) = &self.header.ticket else {
            return Err(Error::InvalidArgument("request carries no ticket".into()));
        };
        TransferTicket::decode(ticket)
    }

    /// The DID targeted by DEACTIVATE.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a DID.
    pub fn target_did(&self) -> Result<Did> {
        Ok(Did::parse(&self.payload)?)
    }

    /// The credential id targeted by REVOKE.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a DID URL.
    pub fn target_credential(&self) -> Result<DidUrl> {
        Ok(DidUrl::parse(&self.payload)?)
    }

    /// Verify the request signature with a multibase public key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if the signature does not verify.
    pub fn verify(&self, public_key_multibase: &str) -> Result<()> {
        let signature = Base64UrlUnpadded::decode_vec(&self.proof.signature)
            .map_err(|e| Error::Authorization(format!("invalid signature encoding: {e}")))?;
        key::verify(public_key_multibase, &signing_input(&self.header, &self.payload), &signature)
            .map_err(|e| Error::Authorization(e.to_string()))
    }

    /// Serialize for submission.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a submitted request.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a request.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn signing_input(header: &RequestHeader, payload: &str) -> Vec<u8> {
    let mut input = Vec::new();
    input.extend_from_slice(header.specification.as_bytes());
    input.extend_from_slice(header.operation.to_string().as_bytes());
    input.extend_from_slice(header.previous_txid.as_deref().unwrap_or_default().as_bytes());
    input.extend_from_slice(header.ticket.as_deref().unwrap_or_default().as_bytes());
    input.extend_from_slice(payload.as_bytes());
    input
}

fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(Base64UrlUnpadded::encode_string(&serde_json::to_vec(value)?))
}

fn decode_json<T: for<'de> Deserialize<'de>>(payload: &str) -> Result<T> {
    let bytes = Base64UrlUnpadded::decode_vec(payload)
        .map_err(|e| Error::InvalidArgument(format!("invalid payload encoding: {e}")))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// A transaction on the registry.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Transaction id.
    pub txid: String,

    /// Time the transaction was recorded.
    pub timestamp: DateTime<Utc>,

    /// The request.
    pub request: IdChainRequest,

    /// Whether the request's proof verified when the transaction was
    /// resolved. Computed locally, never part of the registry response.
    #[serde(skip)]
    pub valid: bool,
}

impl Transaction {
    /// The request operation.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.request.header.operation
    }
}

/// Status of a resolved DID.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DidStatus {
    /// The DID is published and active.
    Valid,

    /// The DID was deactivated.
    Deactivated,

    /// The DID was never published.
    #[default]
    NotFound,
}

/// The transaction history of a DID, most recent first.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DidBiography {
    /// The DID.
    pub did: Did,

    /// Resolution status.
    pub status: DidStatus,

    /// Transactions, most recent first.
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// Status of a resolved credential.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CredentialStatus {
    /// The credential is declared.
    Valid,

    /// The credential was revoked.
    Revoked,

    /// The credential was never declared or revoked.
    #[default]
    NotFound,
}

/// The transaction history of a credential, most recent first.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBiography {
    /// Credential id.
    pub id: DidUrl,

    /// Resolution status.
    pub status: CredentialStatus,

    /// Transactions, most recent first.
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl CredentialBiography {
    /// The declared credential, if any transaction carries one.
    #[must_use]
    pub fn credential(&self) -> Option<VerifiableCredential> {
        self.transactions.iter().find_map(|tx| tx.request.credential().ok())
    }
}

/// A page of declared credential ids.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialList {
    /// The credential subject.
    pub did: Option<Did>,

    /// Credential ids, newest first.
    #[serde(default)]
    pub credentials: Vec<DidUrl>,
}

/// Normalize a requested page size: `0` selects the default and larger
/// values are capped.
#[must_use]
pub const fn page_size(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_PAGE_SIZE
    } else if limit > MAX_PAGE_SIZE {
        MAX_PAGE_SIZE
    } else {
        limit
    }
}
