//! # Export and Import
//!
//! An [`Archive`] carries store records encrypted under a passphrase that is
//! independent of the store password. Secrets travel in the clear inside the
//! ciphertext and are re-sealed under the importing store's password.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DidStore, Storage, cipher};
use crate::credential::{CredentialMetadata, VerifiableCredential};
use crate::did::Did;
use crate::document::{Document, DocumentMetadata};
use crate::identity::RootIdentityRecord;
use crate::key::KeyPair;
use crate::registry::Registry;
use crate::url::DidUrl;
use crate::{Error, Result, tracerr};

/// Archive format tag.
pub const ARCHIVE_TYPE: &str = "did.elastos.export/2.0";

/// What to export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportScope {
    /// Every record in the store.
    Store,

    /// A root identity with the DIDs derived from it.
    RootIdentity(String),

    /// A single DID with its credentials and private keys.
    Did(Did),
}

/// An encrypted export archive.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Archive {
    /// Format tag.
    #[serde(rename = "type")]
    pub type_: String,

    /// Creation time.
    pub created: DateTime<Utc>,

    /// Argon2 salt, base64url.
    pub salt: String,

    /// XChaCha20 nonce, base64url.
    pub nonce: String,

    /// Encrypted records, base64url.
    pub ciphertext: String,
}

impl Archive {
    /// Serialize the archive to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an archive from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the archive has an unknown type.
    pub fn from_json(json: &str) -> Result<Self> {
        let archive: Self = serde_json::from_str(json)?;
        if archive.type_ != ARCHIVE_TYPE {
            return Err(Error::InvalidArgument(format!("unsupported archive type {}", archive.type_)));
        }
        Ok(archive)
    }

    fn seal(records: &Records, passphrase: &str, store: &DidStore<impl Storage, impl Registry>) -> Result<Self> {
        let kdf = &store.backend.config().kdf;
        let salt = cipher::random_bytes::<{ cipher::SALT_LEN }>();
        let nonce = cipher::random_bytes::<{ cipher::NONCE_LEN }>();
        let key = cipher::derive_key(passphrase, &salt, kdf)?;
        let ciphertext = cipher::encrypt(&key, &nonce, &serde_json::to_vec(records)?)?;
        Ok(Self {
            type_: ARCHIVE_TYPE.to_string(),
            created: Utc::now(),
            salt: Base64UrlUnpadded::encode_string(&salt),
            nonce: Base64UrlUnpadded::encode_string(&nonce),
            ciphertext: Base64UrlUnpadded::encode_string(&ciphertext),
        })
    }

    fn open(&self, passphrase: &str, store: &DidStore<impl Storage, impl Registry>) -> Result<Records> {
        let decode = |value: &str| {
            Base64UrlUnpadded::decode_vec(value)
                .map_err(|e| Error::InvalidArgument(format!("invalid archive encoding: {e}")))
        };
        let key = cipher::derive_key(passphrase, &decode(&self.salt)?, &store.backend.config().kdf)?;
        let plaintext = cipher::decrypt(&key, &decode(&self.nonce)?, &decode(&self.ciphertext)?)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct Records {
    #[serde(skip_serializing_if = "Option::is_none")]
    default_root_identity: Option<String>,
    identities: Vec<IdentityRecord>,
    documents: Vec<DocumentRecord>,
    credentials: Vec<CredentialRecord>,
    keys: Vec<KeyRecord>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRecord {
    id: String,
    seed: String,
    index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct DocumentRecord {
    document: Document,
    metadata: DocumentMetadata,
}

#[derive(Debug, Deserialize, Serialize)]
struct CredentialRecord {
    credential: VerifiableCredential,
    metadata: CredentialMetadata,
}

#[derive(Debug, Deserialize, Serialize)]
struct KeyRecord {
    id: DidUrl,
    secret: String,
}

impl<S: Storage, R: Registry> DidStore<S, R> {
    /// Export the records in `scope` into an archive encrypted under
    /// `passphrase`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongPassword`] if `password` is not the store
    /// password and [`Error::NotFound`] if the scope names an unknown record.
    pub async fn export(&self, scope: &ExportScope, passphrase: &str, password: &str) -> Result<Archive> {
        self.check_password(password).await?;
        let kdf = self.backend.config().kdf;
        let mut records = Records::default();

        let (identities, dids) = match scope {
            ExportScope::Store => {
                records.default_root_identity = self.default_root_identity().await?;
                (self.root_identities().await?, self.list_dids(&|_| true).await?)
            }
            ExportScope::RootIdentity(id) => {
                let record = self.root_identity(id).await?;
                let dids = self.list_dids(&|m| m.root_identity.as_deref() == Some(id.as_str())).await?;
                (vec![record], dids)
            }
            ExportScope::Did(did) => {
                if self.storage.document(did).await.map_err(|e| Error::storage(&e))?.is_none() {
                    return Err(Error::NotFound(did.to_string()));
                }
                (vec![], vec![did.clone()])
            }
        };

        for identity in identities {
            let seed = cipher::open(&identity.seed, password, &kdf)?;
            records.identities.push(IdentityRecord {
                id: identity.id,
                seed: Base64UrlUnpadded::encode_string(&seed),
                index: identity.index,
                alias: identity.alias,
            });
        }
        for did in &dids {
            if let Some(doc) = self.storage.document(did).await.map_err(|e| Error::storage(&e))? {
                records.documents.push(DocumentRecord {
                    metadata: doc.metadata().clone(),
                    document: doc,
                });
            }
            for id in self.list_stored_credentials(did).await? {
                if let Some(vc) = self.load_credential(&id).await? {
                    records.credentials.push(CredentialRecord {
                        metadata: vc.metadata().clone(),
                        credential: vc,
                    });
                }
            }
            for id in self.storage.list_private_keys(did).await.map_err(|e| Error::storage(&e))? {
                if let Some(sealed) = self.storage.private_key(&id).await.map_err(|e| Error::storage(&e))? {
                    let secret = cipher::open(&sealed, password, &kdf)?;
                    records.keys.push(KeyRecord {
                        id,
                        secret: Base64UrlUnpadded::encode_string(&secret),
                    });
                }
            }
        }

        tracing::info!(
            identities = records.identities.len(),
            documents = records.documents.len(),
            keys = records.keys.len(),
            "store exported"
        );
        Archive::seal(&records, passphrase, self)
    }

    /// Import an archive, re-sealing its secrets under `password`. Nothing is
    /// written unless the whole archive decrypts and parses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongPassword`] if `passphrase` does not open the
    /// archive or `password` is not the store password.
    pub async fn import(&self, archive: &Archive, passphrase: &str, password: &str) -> Result<()> {
        let records = archive.open(passphrase, self)?;
        self.check_password(password).await?;
        let kdf = self.backend.config().kdf;

        let decode = |value: &str| {
            Base64UrlUnpadded::decode_vec(value)
                .map_err(|e| Error::InvalidArgument(format!("invalid archive encoding: {e}")))
        };

        let mut identities = vec![];
        for identity in &records.identities {
            let seed: [u8; 32] = decode(&identity.seed)?
                .try_into()
                .map_err(|_| Error::InvalidArgument("invalid root identity seed".into()))?;
            let mut record = crate::identity::RootIdentity::from_seed(seed).seal(identity.index, password, &kdf)?;
            if record.id != identity.id {
                tracerr!(Error::InvalidArgument(format!("root identity {} is corrupt", identity.id)));
            }
            record.alias.clone_from(&identity.alias);
            identities.push(record);
        }
        let mut keys = vec![];
        for key in &records.keys {
            let secret = decode(&key.secret)?;
            KeyPair::try_from_secret(&secret).map_err(|e| Error::InvalidArgument(format!("{e:#}")))?;
            keys.push((key.id.clone(), cipher::seal(&secret, password, &kdf)?));
        }

        for record in &identities {
            self.merge_identity(record).await?;
        }
        for (id, sealed) in &keys {
            self.storage.put_private_key(id, sealed).await.map_err(|e| Error::storage(&e))?;
        }
        for DocumentRecord { document, metadata } in records.documents {
            let mut doc = document;
            *doc.metadata_mut() = metadata;
            self.storage.put_document(&doc).await.map_err(|e| Error::storage(&e))?;
        }
        for CredentialRecord { credential, metadata } in records.credentials {
            let mut vc = credential;
            *vc.metadata_mut() = metadata;
            self.storage.put_credential(&vc).await.map_err(|e| Error::storage(&e))?;
        }

        let mut metadata = self.storage.metadata().await.map_err(|e| Error::storage(&e))?.unwrap_or_default();
        if metadata.default_root_identity.is_none() {
            metadata.default_root_identity = records
                .default_root_identity
                .or_else(|| identities.first().map(|r| r.id.clone()));
            self.storage.put_metadata(&metadata).await.map_err(|e| Error::storage(&e))?;
        }

        tracing::info!(identities = identities.len(), keys = keys.len(), "archive imported");
        Ok(())
    }

    // Keep the higher derivation index when the identity already exists.
    async fn merge_identity(&self, record: &RootIdentityRecord) -> Result<()> {
        let mut record = record.clone();
        if let Some(existing) = self.storage.root_identity(&record.id).await.map_err(|e| Error::storage(&e))? {
            record.index = record.index.max(existing.index);
            if record.alias.is_none() {
                record.alias = existing.alias;
            }
        }
        self.storage.put_root_identity(&record).await.map_err(|e| Error::storage(&e))
    }
}
