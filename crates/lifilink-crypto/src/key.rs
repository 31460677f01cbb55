//! Session key material.

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Key identifier length.
pub const KEY_ID_SIZE: usize = 8;

/// MAC key length.
pub const MAC_KEY_SIZE: usize = 32;

/// Largest supported cipher key.
const MAX_CIPHER_KEY: usize = 32;

/// Opaque 8-byte key identifier. Not secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct KeyId(pub [u8; KEY_ID_SIZE]);

impl KeyId {
    /// Raw bytes.
    pub const fn as_bytes(&self) -> &[u8; KEY_ID_SIZE] {
        &self.0
    }
}

impl From<[u8; KEY_ID_SIZE]> for KeyId {
    fn from(bytes: [u8; KEY_ID_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({self})")
    }
}

/// AEAD key size of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeySize {
    /// 16-byte keys, AES-128-GCM.
    Aes128,
    /// 32-byte keys, AES-256-GCM.
    #[default]
    Aes256,
}

impl KeySize {
    /// Key length in bytes.
    pub const fn byte_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes256 => 32,
        }
    }

    /// Size for a key of `len` bytes.
    pub const fn from_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(Self::Aes128),
            32 => Some(Self::Aes256),
            _ => None,
        }
    }
}

/// A session key: identifier, AEAD key and optional HMAC key.
///
/// The cipher key lives in a fixed buffer with an explicit length, so 16 and
/// 32-byte keys share one representation. All secret bytes are zeroized on
/// drop.
///
/// # Invariants
///
/// - `cipher_len` is 16 or 32.
/// - Bytes of `cipher` past `cipher_len` are zero.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    #[zeroize(skip)]
    key_id: KeyId,
    cipher: [u8; MAX_CIPHER_KEY],
    cipher_len: usize,
    mac: Option<[u8; MAC_KEY_SIZE]>,
}

impl SessionKey {
    /// Build a key, validating lengths.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidKeyLength` if `cipher_key` is not 16 or 32 bytes
    /// - `CryptoError::InvalidMacKeyLength` if `mac_key` is not 32 bytes
    pub fn new(
        key_id: KeyId,
        cipher_key: &[u8],
        mac_key: Option<&[u8]>,
    ) -> Result<Self, CryptoError> {
        if KeySize::from_len(cipher_key.len()).is_none() {
            return Err(CryptoError::InvalidKeyLength { len: cipher_key.len() });
        }

        let mac = match mac_key {
            Some(bytes) => Some(
                <[u8; MAC_KEY_SIZE]>::try_from(bytes)
                    .map_err(|_| CryptoError::InvalidMacKeyLength { len: bytes.len() })?,
            ),
            None => None,
        };

        let mut cipher = [0u8; MAX_CIPHER_KEY];
        cipher[..cipher_key.len()].copy_from_slice(cipher_key);

        Ok(Self { key_id, cipher, cipher_len: cipher_key.len(), mac })
    }

    /// Key identifier.
    pub const fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// AEAD key bytes.
    pub fn cipher_key(&self) -> &[u8] {
        &self.cipher[..self.cipher_len]
    }

    /// AEAD key size.
    pub const fn key_size(&self) -> KeySize {
        if self.cipher_len == 16 { KeySize::Aes128 } else { KeySize::Aes256 }
    }

    /// HMAC key, if this key can take part in challenges.
    pub fn mac_key(&self) -> Option<&[u8; MAC_KEY_SIZE]> {
        self.mac.as_ref()
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        let mac_eq = match (&self.mac, &other.mac) {
            (Some(a), Some(b)) => bool::from(a.ct_eq(b)),
            (None, None) => true,
            _ => false,
        };
        self.key_id == other.key_id
            && self.cipher_len == other.cipher_len
            && bool::from(self.cipher_key().ct_eq(other.cipher_key()))
            && mac_eq
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("key_id", &self.key_id)
            .field("cipher_key", &format!("<redacted {} bytes>", self.cipher_len))
            .field("mac_key", &self.mac.as_ref().map(|k| format!("<redacted {} bytes>", k.len())))
            .finish()
    }
}
