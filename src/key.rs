//! # Key Material
//!
//! Ed25519 key pairs, their multibase public key encoding and the derivation
//! of a method-specific id from a public key.

use anyhow::anyhow;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use multibase::Base;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::did::Did;

/// Multicodec prefix for an Ed25519 public key.
const ED25519_CODEC: [u8; 2] = [0xed, 0x01];

/// Number of digest bytes used for the method-specific id.
const ADDRESS_LEN: usize = 20;

/// An Ed25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("public_key", &self.public_key_multibase()).finish()
    }
}

impl KeyPair {
    /// Generate a random key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create a key pair from 32 secret bytes.
    #[must_use]
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret),
        }
    }

    /// Create a key pair from secret bytes of unchecked length.
    ///
    /// # Errors
    ///
    /// Will fail if `secret` is not 32 bytes.
    pub fn try_from_secret(secret: &[u8]) -> anyhow::Result<Self> {
        let secret: [u8; 32] =
            secret.try_into().map_err(|_| anyhow!("secret key must be 32 bytes"))?;
        Ok(Self::from_secret(&secret))
    }

    /// Derive the key pair at `index` from a root identity seed.
    #[must_use]
    pub fn derive(seed: &[u8; 32], index: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(index.to_be_bytes());
        let secret: [u8; 32] = hasher.finalize().into();
        Self::from_secret(&secret)
    }

    /// Secret key bytes.
    #[must_use]
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Public key bytes.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Public key as a multibase (base58btc, multicodec-prefixed) string.
    #[must_use]
    pub fn public_key_multibase(&self) -> String {
        encode_public_key(&self.public_key())
    }

    /// The DID whose method-specific id derives from this key.
    #[must_use]
    pub fn did(&self) -> Did {
        did_from_public_key(&self.public_key())
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.signing_key.sign(msg).to_bytes().to_vec()
    }
}

/// Encode raw public key bytes as multibase.
#[must_use]
pub fn encode_public_key(public_key: &[u8; 32]) -> String {
    let mut bytes = ED25519_CODEC.to_vec();
    bytes.extend_from_slice(public_key);
    multibase::encode(Base::Base58Btc, bytes)
}

/// Decode a multibase public key into raw bytes.
///
/// # Errors
///
/// Will fail if the string is not multibase, uses an unexpected codec or has
/// the wrong length.
pub fn decode_public_key(multibase: &str) -> anyhow::Result<[u8; 32]> {
    let (_, bytes) = multibase::decode(multibase)?;
    let Some(raw) = bytes.strip_prefix(&ED25519_CODEC) else {
        return Err(anyhow!("public key is not an Ed25519 key"));
    };
    raw.try_into().map_err(|_| anyhow!("public key must be 32 bytes"))
}

/// Method-specific id for a public key: `i` followed by base58 of the first 20
/// bytes of its SHA-256 digest.
#[must_use]
pub fn address(public_key: &[u8; 32]) -> String {
    let digest = Sha256::digest(public_key);
    format!("i{}", Base::Base58Btc.encode(&digest[..ADDRESS_LEN]))
}

/// The DID derived from a public key.
#[must_use]
pub fn did_from_public_key(public_key: &[u8; 32]) -> Did {
    Did::from_address(address(public_key))
}

/// Verify a signature over `msg` with a multibase public key.
///
/// # Errors
///
/// Will fail if the key cannot be decoded or the signature does not verify.
pub fn verify(public_key_multibase: &str, msg: &[u8], signature: &[u8]) -> anyhow::Result<()> {
    let raw = decode_public_key(public_key_multibase)?;
    let key = VerifyingKey::from_bytes(&raw)?;
    let signature = Signature::from_slice(signature)?;
    key.verify(msg, &signature).map_err(|e| anyhow!("signature verification failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multibase_round_trip() {
        let keys = KeyPair::generate();
        let encoded = keys.public_key_multibase();
        assert!(encoded.starts_with("z6Mk"));
        let decoded = decode_public_key(&encoded).expect("should decode");
        assert_eq!(decoded, keys.public_key());
    }

    #[test]
    fn derivation_is_deterministic() {
        let seed = [7u8; 32];
        let a = KeyPair::derive(&seed, 3);
        let b = KeyPair::derive(&seed, 3);
        let c = KeyPair::derive(&seed, 4);
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
        assert_eq!(a.did(), b.did());
        assert!(a.did().method_specific_id().starts_with('i'));
    }

    #[test]
    fn sign_verify() {
        let keys = KeyPair::generate();
        let sig = keys.sign(b"hello");
        verify(&keys.public_key_multibase(), b"hello", &sig).expect("should verify");
        assert!(verify(&keys.public_key_multibase(), b"other", &sig).is_err());
    }
}
