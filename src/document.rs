//! # DID Document
//!
//! A DID document is the versioned, signed record describing an identity's
//! keys, controllers, credentials and services.
//!
//! Documents are immutable values. They are created and changed only through
//! a [`DocumentBuilder`], which works on a copy and returns a newly sealed
//! document.
//!
//! Normal documents are controlled by their subject. *Customized* documents
//! have one or more external controllers and, with more than one controller,
//! an `M`-of-`N` signature threshold.

mod builder;

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Months, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::builder::DocumentBuilder;
use crate::core::OneMany;
use crate::credential::VerifiableCredential;
use crate::did::Did;
use crate::proof::{self, Proof};
use crate::url::DidUrl;
use crate::{Error, Result, key};

/// The public key type of every key created by this crate.
pub const KEY_TYPE: &str = "Ed25519VerificationKey2020";

/// Fragment of the default key of a newly created document.
pub const DEFAULT_KEY_FRAGMENT: &str = "primary";

/// Maximum validity of a document or credential, in months.
pub(crate) const MAX_VALIDITY_MONTHS: u32 = 60;

/// DID Document
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// The DID subject.
    id: Did,

    /// Controller model, serialized as `controller` and `multisig`.
    #[serde(flatten)]
    controllers: Controllers,

    /// Public keys. A key is referenced by `authentication` and
    /// `authorization` by id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    public_key: Vec<PublicKey>,

    /// Ids of keys the subject authenticates with.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    authentication: Vec<DidUrl>,

    /// Ids of externally controlled keys that may deactivate the document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    authorization: Vec<DidUrl>,

    /// Credentials about the subject embedded in the document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    verifiable_credential: Vec<VerifiableCredential>,

    /// Service endpoints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    service: Vec<Service>,

    /// Expiry of this version of the document.
    expires: DateTime<Utc>,

    /// One proof per contributing controller.
    #[serde(default, with = "crate::core::flexvec", skip_serializing_if = "Vec::is_empty")]
    proof: Vec<Proof>,

    /// Local and registry-derived metadata. Never part of the signed form.
    #[serde(skip)]
    metadata: DocumentMetadata,

    /// Resolved documents of the controllers, used to verify proofs.
    #[serde(skip)]
    controller_docs: Vec<Document>,
}

/// Who controls a document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "ControllerFields", into = "ControllerFields")]
pub enum Controllers {
    /// A normal document, controlled by its subject.
    #[default]
    SelfControlled,

    /// A customized document with a single external controller.
    SingleController(Did),

    /// A customized document with `N > 1` controllers, any `threshold` of
    /// which must sign.
    MultiController {
        /// Controllers, sorted.
        controllers: Vec<Did>,

        /// Number of signatures required.
        threshold: usize,
    },
}

/// Wire form of [`Controllers`].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ControllerFields {
    /// A single controller or a set of controllers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<OneMany<Did>>,

    /// `M:N` threshold, present only with more than one controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multisig: Option<MultiSignature>,
}

impl Controllers {
    /// Build the controller model from a controller set and an optional
    /// threshold.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the threshold is missing for more
    /// than one controller, present for a single controller, or outside
    /// `1..=N`.
    pub fn new(mut controllers: Vec<Did>, threshold: Option<usize>) -> Result<Self> {
        controllers.sort();
        controllers.dedup();
        match (controllers.len(), threshold) {
            (0, None) => Ok(Self::SelfControlled),
            (0, Some(_)) => {
                Err(Error::InvalidArgument("multisig requires more than one controller".into()))
            }
            (1, None | Some(1)) => Ok(Self::SingleController(controllers.remove(0))),
            (1, Some(_)) => {
                Err(Error::InvalidArgument("invalid multisig for a single controller".into()))
            }
            (_, None) => Err(Error::InvalidArgument(
                "multisig is required for more than one controller".into(),
            )),
            (n, Some(m)) => {
                if m < 1 || m > n {
                    return Err(Error::InvalidArgument(format!("invalid multisig {m}:{n}")));
                }
                Ok(Self::MultiController {
                    controllers,
                    threshold: m,
                })
            }
        }
    }

    /// The external controllers. Empty for a self-controlled document.
    #[must_use]
    pub fn dids(&self) -> &[Did] {
        match self {
            Self::SelfControlled => &[],
            Self::SingleController(did) => std::slice::from_ref(did),
            Self::MultiController { controllers, .. } => controllers,
        }
    }

    /// Number of signatures required.
    #[must_use]
    pub const fn threshold(&self) -> usize {
        match self {
            Self::SelfControlled | Self::SingleController(_) => 1,
            Self::MultiController { threshold, .. } => *threshold,
        }
    }

    /// Returns `true` if `did` is an external controller.
    #[must_use]
    pub fn contains(&self, did: &Did) -> bool {
        self.dids().contains(did)
    }

    /// Returns `true` for customized documents.
    #[must_use]
    pub const fn is_customized(&self) -> bool {
        !matches!(self, Self::SelfControlled)
    }

    /// The `M:N` threshold, for more than one controller.
    #[must_use]
    pub fn multisig(&self) -> Option<MultiSignature> {
        match self {
            Self::MultiController {
                controllers,
                threshold,
            } => Some(MultiSignature {
                m: *threshold,
                n: controllers.len(),
            }),
            _ => None,
        }
    }
}

impl TryFrom<ControllerFields> for Controllers {
    type Error = Error;

    fn try_from(fields: ControllerFields) -> Result<Self> {
        let controllers = fields.controller.map(|c| c.to_vec()).unwrap_or_default();
        if let Some(multisig) = fields.multisig {
            if multisig.n != controllers.len() {
                return Err(Error::InvalidArgument(format!(
                    "multisig {multisig} does not match {} controllers",
                    controllers.len()
                )));
            }
        }
        Self::new(controllers, fields.multisig.map(|ms| ms.m))
    }
}

impl From<Controllers> for ControllerFields {
    fn from(controllers: Controllers) -> Self {
        Self {
            multisig: controllers.multisig(),
            controller: OneMany::from_vec(controllers.dids().to_vec()),
        }
    }
}

/// An `M`-of-`N` signature threshold, serialized as `"M:N"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MultiSignature {
    /// Signatures required.
    pub m: usize,

    /// Number of controllers.
    pub n: usize,
}

impl Display for MultiSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.m, self.n)
    }
}

impl FromStr for MultiSignature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("invalid multisig: {s}"));
        let (m, n) = s.split_once(':').ok_or_else(invalid)?;
        let m: usize = m.parse().map_err(|_| invalid())?;
        let n: usize = n.parse().map_err(|_| invalid())?;
        if m < 1 || m > n {
            return Err(invalid());
        }
        Ok(Self { m, n })
    }
}

impl Serialize for MultiSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MultiSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A public key.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    /// Key id, a DID URL with a fragment.
    pub id: DidUrl,

    /// Key type.
    #[serde(rename = "type")]
    pub type_: String,

    /// The DID of the key's controller.
    pub controller: Did,

    /// Key material, multibase encoded.
    pub public_key_multibase: String,
}

impl PublicKey {
    /// Create an Ed25519 public key entry.
    #[must_use]
    pub fn new(id: DidUrl, controller: Did, public_key_multibase: impl Into<String>) -> Self {
        Self {
            id,
            type_: KEY_TYPE.to_string(),
            controller,
            public_key_multibase: public_key_multibase.into(),
        }
    }

    // The DID derived from this key's material, if it decodes.
    fn address_did(&self) -> Option<Did> {
        key::decode_public_key(&self.public_key_multibase)
            .ok()
            .map(|raw| key::did_from_public_key(&raw))
    }
}

/// Services are used to express ways of communicating with the DID subject or
/// associated entities.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// A URL unique to the service within the document.
    pub id: DidUrl,

    /// The service type.
    #[serde(rename = "type")]
    pub type_: String,

    /// The service endpoint.
    #[allow(clippy::struct_field_names)]
    pub service_endpoint: String,

    /// Additional service properties.
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

/// Metadata attached to a document.
///
/// Local properties (alias, root identity) are kept across synchronization.
/// Registry properties (transaction id, signature of record, publish time,
/// deactivated) are refreshed from resolution.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    /// Local, human-friendly name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Id of the last transaction observed on the registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    /// Signature of the registry copy this document was edited from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_signature: Option<String>,

    /// Signature of the last registry copy observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Time the last registry copy was published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,

    /// Set when the registry reports the DID deactivated.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deactivated: bool,

    /// Root identity this DID was derived from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_identity: Option<String>,

    /// Derivation index within the root identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

impl DocumentMetadata {
    /// Copy local-only properties from `local`.
    pub fn merge_local(&mut self, local: &Self) {
        if local.alias.is_some() {
            self.alias.clone_from(&local.alias);
        }
        if local.root_identity.is_some() {
            self.root_identity.clone_from(&local.root_identity);
            self.index = local.index;
        }
    }

    /// Copy registry-derived properties from `resolved`.
    pub fn merge_registry(&mut self, resolved: &Self) {
        self.transaction_id.clone_from(&resolved.transaction_id);
        self.signature.clone_from(&resolved.signature);
        self.published = resolved.published;
        self.deactivated = resolved.deactivated;
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        serde_json::to_value(self).ok() == serde_json::to_value(other).ok()
    }
}

impl Document {
    /// The DID subject.
    #[must_use]
    pub const fn subject(&self) -> &Did {
        &self.id
    }

    /// The controller model.
    #[must_use]
    pub const fn controllers(&self) -> &Controllers {
        &self.controllers
    }

    /// Number of external controllers.
    #[must_use]
    pub fn controller_count(&self) -> usize {
        self.controllers.dids().len()
    }

    /// The `M:N` threshold of a multi-controller document.
    #[must_use]
    pub fn multisig(&self) -> Option<MultiSignature> {
        self.controllers.multisig()
    }

    /// Returns `true` if the document is controlled by other DIDs.
    #[must_use]
    pub const fn is_customized(&self) -> bool {
        self.controllers.is_customized()
    }

    /// All public keys.
    #[must_use]
    pub fn public_keys(&self) -> &[PublicKey] {
        &self.public_key
    }

    /// A public key of this document by id.
    #[must_use]
    pub fn public_key(&self, id: &DidUrl) -> Option<&PublicKey> {
        self.public_key.iter().find(|pk| &pk.id == id)
    }

    /// Authentication key ids.
    #[must_use]
    pub fn authentication_keys(&self) -> &[DidUrl] {
        &self.authentication
    }

    /// Authorization key ids.
    #[must_use]
    pub fn authorization_keys(&self) -> &[DidUrl] {
        &self.authorization
    }

    /// An authentication key by id. For customized documents the key may
    /// belong to a controller's document.
    #[must_use]
    pub fn authentication_key(&self, id: &DidUrl) -> Option<&PublicKey> {
        if self.authentication.contains(id) {
            return self.public_key(id);
        }
        let did = id.did()?;
        if self.controllers.contains(did) {
            return self.controller_doc(did)?.authentication_key(id);
        }
        None
    }

    /// An authorization key by id.
    #[must_use]
    pub fn authorization_key(&self, id: &DidUrl) -> Option<&PublicKey> {
        if self.authorization.contains(id) {
            return self.public_key(id);
        }
        None
    }

    /// The default key.
    ///
    /// For a normal document this is the self-controlled key whose material
    /// derives the subject id. For a customized document it is the first
    /// self-controlled key, if any.
    #[must_use]
    pub fn default_key(&self) -> Option<&PublicKey> {
        let mut own = self.public_key.iter().filter(|pk| pk.controller == self.id);
        if self.is_customized() {
            return own.next();
        }
        own.find(|pk| pk.address_did().as_ref() == Some(&self.id))
    }

    /// The id of the default key.
    #[must_use]
    pub fn default_key_id(&self) -> Option<&DidUrl> {
        self.default_key().map(|pk| &pk.id)
    }

    /// Embedded credentials.
    #[must_use]
    pub fn credentials(&self) -> &[VerifiableCredential] {
        &self.verifiable_credential
    }

    /// An embedded credential by id.
    #[must_use]
    pub fn credential(&self, id: &DidUrl) -> Option<&VerifiableCredential> {
        self.verifiable_credential.iter().find(|vc| vc.id() == id)
    }

    /// Services.
    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.service
    }

    /// A service by id.
    #[must_use]
    pub fn service(&self, id: &DidUrl) -> Option<&Service> {
        self.service.iter().find(|s| &s.id == id)
    }

    /// Expiry of this version.
    #[must_use]
    pub const fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    /// Returns `true` if the document has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires < Utc::now()
    }

    /// Proofs, ordered by creation time then verification method.
    #[must_use]
    pub fn proofs(&self) -> &[Proof] {
        &self.proof
    }

    /// The proof contributed by `controller`, if any.
    #[must_use]
    pub fn proof_by(&self, controller: &Did) -> Option<&Proof> {
        self.proof.iter().find(|p| p.verification_method.did() == Some(controller))
    }

    /// The signature identifying this version: the value of the first proof.
    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        self.proof.first().and_then(|p| p.proof_value.as_deref())
    }

    /// Document metadata.
    #[must_use]
    pub const fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    /// Mutable document metadata. Metadata is not part of the signed form.
    pub fn metadata_mut(&mut self) -> &mut DocumentMetadata {
        &mut self.metadata
    }

    /// Returns `true` if the registry reported the DID deactivated.
    #[must_use]
    pub const fn is_deactivated(&self) -> bool {
        self.metadata.deactivated
    }

    /// The attached document of a controller.
    #[must_use]
    pub fn controller_doc(&self, did: &Did) -> Option<&Self> {
        self.controller_docs.iter().find(|d| d.subject() == did)
    }

    /// Attach resolved controller documents. Documents of DIDs that are not
    /// controllers are ignored.
    pub fn attach_controllers(&mut self, docs: impl IntoIterator<Item = Self>) {
        for doc in docs {
            if self.controllers.contains(doc.subject()) {
                self.controller_docs.retain(|d| d.subject() != doc.subject());
                self.controller_docs.push(doc);
            }
        }
    }

    /// Controllers whose documents are not attached.
    #[must_use]
    pub fn missing_controllers(&self) -> Vec<Did> {
        self.controllers
            .dids()
            .iter()
            .filter(|did| self.controller_doc(did).is_none())
            .cloned()
            .collect()
    }

    /// The canonical signable form: proofs removed and collections sorted
    /// so that in-memory ordering does not affect signatures.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized.
    pub fn signable(&self) -> Result<Value> {
        let mut unsigned = self.clone();
        unsigned.proof.clear();
        unsigned.public_key.sort_by(|a, b| a.id.cmp(&b.id));
        unsigned.authentication.sort();
        unsigned.authorization.sort();
        unsigned.verifiable_credential.sort_by(|a, b| a.id().cmp(b.id()));
        unsigned.service.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(serde_json::to_value(&unsigned)?)
    }

    /// Verify one proof on this document.
    ///
    /// A normal document's proof must be made with its default key. A
    /// customized document's proof must be made with the default key of one
    /// of its controllers, verified against that controller's own document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authorization`] if the signer is not permitted or the
    /// signature does not verify.
    pub fn verify_proof(&self, proof: &Proof) -> Result<()> {
        let signer = &proof.verification_method;
        let key = if self.is_customized() {
            let did = signer
                .did()
                .filter(|did| self.controllers.contains(did))
                .ok_or_else(|| Error::Authorization(format!("{signer} is not a controller key")))?;
            let controller = self.controller_doc(did).ok_or_else(|| {
                Error::Authorization(format!("controller document {did} is not available"))
            })?;
            if controller.default_key_id() != Some(signer) {
                return Err(Error::Authorization(format!("{signer} is not a default key")));
            }
            controller.default_key()
        } else {
            self.default_key().filter(|pk| &pk.id == signer)
        };
        let Some(key) = key else {
            return Err(Error::Authorization(format!("{signer} is not the default key")));
        };
        proof::verify(&self.signable()?, proof, &key.public_key_multibase)
    }

    /// Returns `true` if the document carries at least one proof, every proof
    /// verifies and no controller signed twice.
    #[must_use]
    pub fn is_genuine(&self) -> bool {
        if self.proof.is_empty() {
            return false;
        }
        if self.is_customized() {
            if self.controller_docs.iter().any(|d| !d.is_genuine()) {
                return false;
            }
        } else if self.proof.len() != 1 {
            return false;
        }

        let mut signers: Vec<_> = self.proof.iter().map(|p| p.verification_method.did()).collect();
        signers.sort();
        signers.dedup();
        if signers.len() != self.proof.len() {
            return false;
        }

        self.proof.iter().all(|p| self.verify_proof(p).is_ok())
    }

    /// Returns `true` if the document carries enough proofs for its
    /// threshold.
    #[must_use]
    pub fn is_qualified(&self) -> bool {
        self.proof.len() >= self.controllers.threshold()
    }

    /// Returns `true` if the document is genuine, qualified, not expired and
    /// not deactivated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_deactivated() && !self.is_expired() && self.is_qualified() && self.is_genuine()
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
    /// Returns an error if the JSON is not a valid document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Default expiry for new documents and credentials.
pub(crate) fn max_expires() -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(0);
    now.checked_add_months(Months::new(MAX_VALIDITY_MONTHS)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
