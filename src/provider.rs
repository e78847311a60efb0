//! # Provider Traits
//!
//! Capabilities supplied to the engine by the caller or the local store.

use crate::key::KeyPair;
use crate::url::DidUrl;

/// [`Signer`] pairs a signing capability with the verification method a
/// verifier should use to check the signature.
///
/// The verification method is a DID URL identifying a public key in a DID
/// document. The engine uses it to decide whether the signer holds the key
/// an operation requires (a default key, an authentication key or an
/// authorization key).
pub trait Signer: Send + Sync {
    /// The key the signature can be verified with.
    fn verification_method(&self) -> &DidUrl;

    /// Sign the message.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unavailable.
    fn try_sign(&self, msg: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// A [`Signer`] over an unlocked key pair.
#[derive(Clone, Debug)]
pub struct KeySigner {
    key_id: DidUrl,
    keys: KeyPair,
}

impl KeySigner {
    /// Create a signer for the key identified by `key_id`.
    #[must_use]
    pub const fn new(key_id: DidUrl, keys: KeyPair) -> Self {
        Self { key_id, keys }
    }

    /// The unlocked key pair.
    #[must_use]
    pub const fn keys(&self) -> &KeyPair {
        &self.keys
    }

    /// Multibase public key of the signer.
    #[must_use]
    pub fn public_key_multibase(&self) -> String {
        self.keys.public_key_multibase()
    }
}

impl Signer for KeySigner {
    fn verification_method(&self) -> &DidUrl {
        &self.key_id
    }

    fn try_sign(&self, msg: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(self.keys.sign(msg))
    }
}
