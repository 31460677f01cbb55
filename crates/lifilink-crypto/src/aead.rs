//! AES-GCM session cipher.

use aes_gcm::{
    Aes128Gcm, Aes256Gcm, KeyInit,
    aead::{AeadInPlace, generic_array::GenericArray},
};

use crate::{
    error::{AuthFailure, CryptoError},
    key::{KeySize, SessionKey},
};

/// GCM IV length.
pub const NONCE_SIZE: usize = 12;

/// GCM tag length.
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under `key` with `nonce`, no associated data.
///
/// Returns the ciphertext (same length as the plaintext) and the detached
/// tag.
///
/// # Security
///
/// The caller guarantees `nonce` has never been used with this key.
///
/// # Errors
///
/// - `CryptoError::Encrypt` if the plaintext exceeds the GCM limit
pub fn encrypt(
    key: &SessionKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_SIZE]), CryptoError> {
    let nonce = GenericArray::from_slice(nonce);
    let mut buffer = plaintext.to_vec();

    let tag = match key.key_size() {
        KeySize::Aes128 => Aes128Gcm::new(GenericArray::from_slice(key.cipher_key()))
            .encrypt_in_place_detached(nonce, &[], &mut buffer),
        KeySize::Aes256 => Aes256Gcm::new(GenericArray::from_slice(key.cipher_key()))
            .encrypt_in_place_detached(nonce, &[], &mut buffer),
    }
    .map_err(|_| CryptoError::Encrypt)?;

    Ok((buffer, tag.into()))
}

/// Decrypt and authenticate.
///
/// Nothing is returned unless the tag verifies; on failure the partially
/// decrypted buffer is dropped.
///
/// # Errors
///
/// - `AuthFailure` on any tag mismatch
pub fn decrypt(
    key: &SessionKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
) -> Result<Vec<u8>, AuthFailure> {
    let nonce = GenericArray::from_slice(nonce);
    let tag = GenericArray::from_slice(tag);
    let mut buffer = ciphertext.to_vec();

    match key.key_size() {
        KeySize::Aes128 => Aes128Gcm::new(GenericArray::from_slice(key.cipher_key()))
            .decrypt_in_place_detached(nonce, &[], &mut buffer, tag),
        KeySize::Aes256 => Aes256Gcm::new(GenericArray::from_slice(key.cipher_key()))
            .decrypt_in_place_detached(nonce, &[], &mut buffer, tag),
    }
    .map_err(|_| AuthFailure)?;

    Ok(buffer)
}
