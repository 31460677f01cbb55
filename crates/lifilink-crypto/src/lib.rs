//! Cryptographic primitives for the LiFi secure link protocol.
//!
//! # Design
//!
//! Every function here is pure. Nonces and challenges are supplied by the
//! caller, so the engine can drive them from a seeded RNG in tests and from
//! the OS in production.
//!
//! # Contract
//!
//! - AEAD: AES-GCM with a 12-byte nonce, a 16-byte detached tag and no
//!   associated data. The key length (16 or 32 bytes) selects AES-128 or
//!   AES-256.
//! - MAC: HMAC-SHA256 under a dedicated MAC key, used only for device
//!   authentication challenges.
//!
//! # Security
//!
//! - Reusing a (key, nonce) pair is catastrophic for GCM. Uniqueness is the
//!   caller's job (see the nonce generator in `lifilink-core`).
//! - Key material is zeroized on drop and never appears in `Debug` output.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod aead;
mod error;
mod key;
mod mac;

pub use aead::{NONCE_SIZE, TAG_SIZE, decrypt, encrypt};
pub use error::{AuthFailure, CryptoError};
pub use key::{KEY_ID_SIZE, KeyId, KeySize, MAC_KEY_SIZE, SessionKey};
pub use mac::{HMAC_SIZE, hmac_sha256, sha256, tags_equal, verify_hmac};
