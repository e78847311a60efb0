//! # Root Identity
//!
//! A root identity is a 32-byte seed from which any number of DIDs are
//! derived deterministically by index. Only the sealed seed is persisted.

use multibase::Base;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::KdfParams;
use crate::did::Did;
use crate::key::KeyPair;
use crate::store::cipher;
use crate::{Error, Result};

/// A persisted root identity.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RootIdentityRecord {
    /// Identity id, derived from the seed.
    pub id: String,

    /// The seed, sealed under the store password.
    pub seed: String,

    /// Next derivation index.
    pub index: u32,

    /// Local, human-friendly name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// An unlocked root identity.
#[derive(Clone)]
pub struct RootIdentity {
    id: String,
    seed: [u8; 32],
}

impl std::fmt::Debug for RootIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootIdentity").field("id", &self.id).finish_non_exhaustive()
    }
}

impl RootIdentity {
    /// Create a root identity from a seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let digest = Sha256::digest(seed);
        let id = multibase::encode(Base::Base58Btc, &digest[..16]);
        Self { id, seed }
    }

    /// Create a root identity from a random seed.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_seed(cipher::random_bytes::<32>())
    }

    /// Identity id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The key pair at `index`.
    #[must_use]
    pub fn key_at(&self, index: u32) -> KeyPair {
        KeyPair::derive(&self.seed, index)
    }

    /// The DID at `index`.
    #[must_use]
    pub fn did_at(&self, index: u32) -> Did {
        self.key_at(index).did()
    }

    /// Seal the seed into a record starting at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub fn seal(&self, index: u32, password: &str, kdf: &KdfParams) -> Result<RootIdentityRecord> {
        Ok(RootIdentityRecord {
            id: self.id.clone(),
            seed: cipher::seal(&self.seed, password, kdf)?,
            index,
            alias: None,
        })
    }

    /// Unlock a persisted root identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongPassword`] if the password does not open the
    /// seed.
    pub fn open(record: &RootIdentityRecord, password: &str, kdf: &KdfParams) -> Result<Self> {
        let bytes = cipher::open(&record.seed, password, kdf)?;
        let seed: [u8; 32] =
            bytes.try_into().map_err(|_| Error::Storage("invalid root identity seed".into()))?;
        let identity = Self::from_seed(seed);
        if identity.id != record.id {
            return Err(Error::Storage(format!("root identity {} is corrupt", record.id)));
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KDF: KdfParams = KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };

    #[test]
    fn deterministic_derivation() {
        let identity = RootIdentity::from_seed([7; 32]);
        assert_eq!(identity.did_at(0), RootIdentity::from_seed([7; 32]).did_at(0));
        assert_ne!(identity.did_at(0), identity.did_at(1));
        assert_ne!(identity.id(), RootIdentity::from_seed([8; 32]).id());
    }

    #[test]
    fn seal_and_open() {
        let identity = RootIdentity::generate();
        let record = identity.seal(3, "passw0rd", &KDF).expect("should seal");
        assert_eq!(record.index, 3);

        let opened = RootIdentity::open(&record, "passw0rd", &KDF).expect("should open");
        assert_eq!(opened.did_at(5), identity.did_at(5));
        assert!(matches!(RootIdentity::open(&record, "nope", &KDF), Err(Error::WrongPassword)));
    }
}
