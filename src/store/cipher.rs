//! # Password Encryption
//!
//! Private keys, root identity seeds and export archives are sealed with
//! XChaCha20-Poly1305 under a key derived from a password with Argon2id.
//!
//! A sealed blob is `base64url(salt || nonce || ciphertext)`.

use argon2::{Algorithm, Argon2, Params, Version};
use base64ct::{Base64UrlUnpadded, Encoding};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;

use crate::config::KdfParams;
use crate::{Error, Result};

pub(crate) const SALT_LEN: usize = 16;
pub(crate) const NONCE_LEN: usize = 24;

/// Derive a 256-bit key from a password.
pub(crate) fn derive_key(password: &str, salt: &[u8], kdf: &KdfParams) -> Result<[u8; 32]> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| Error::InvalidArgument(format!("invalid key derivation parameters: {e}")))?;
    let mut key = [0u8; 32];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| Error::InvalidArgument(format!("key derivation failed: {e}")))?;
    Ok(key)
}

pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Encrypt with a derived key and explicit nonce.
pub(crate) fn encrypt(key: &[u8; 32], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    XChaCha20Poly1305::new(key.into())
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|e| Error::Storage(format!("encryption failed: {e}")))
}

/// Decrypt with a derived key. Authentication failure means the password
/// was wrong or the data was tampered with.
pub(crate) fn decrypt(key: &[u8; 32], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(Error::Storage("invalid nonce".into()));
    }
    XChaCha20Poly1305::new(key.into())
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::WrongPassword)
}

/// Seal `plaintext` under `password`.
///
/// # Errors
///
/// Returns an error if key derivation or encryption fails.
pub fn seal(plaintext: &[u8], password: &str, kdf: &KdfParams) -> Result<String> {
    let salt = random_bytes::<SALT_LEN>();
    let nonce = random_bytes::<NONCE_LEN>();
    let key = derive_key(password, &salt, kdf)?;
    let ciphertext = encrypt(&key, &nonce, plaintext)?;
    Ok(Base64UrlUnpadded::encode_string(&[&salt[..], &nonce[..], &ciphertext].concat()))
}

/// Open a blob sealed by [`seal`].
///
/// # Errors
///
/// Returns [`Error::WrongPassword`] if the password does not open the blob.
pub fn open(sealed: &str, password: &str, kdf: &KdfParams) -> Result<Vec<u8>> {
    let bytes = Base64UrlUnpadded::decode_vec(sealed)
        .map_err(|e| Error::Storage(format!("invalid sealed data: {e}")))?;
    if bytes.len() < SALT_LEN + NONCE_LEN {
        return Err(Error::Storage("sealed data is truncated".into()));
    }
    let (salt, rest) = bytes.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let key = derive_key(password, salt, kdf)?;
    decrypt(&key, nonce, ciphertext)
}
