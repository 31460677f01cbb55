//! Crypto error types.

use thiserror::Error;

/// Authentication failure: GCM tag or HMAC mismatch.
///
/// Carries no detail on purpose; callers discard the message and count it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("authentication failed")]
pub struct AuthFailure;

/// Errors constructing keys or running primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Cipher key is neither 16 nor 32 bytes.
    #[error("invalid cipher key length {len}, expected 16 or 32")]
    InvalidKeyLength {
        /// Length supplied.
        len: usize,
    },

    /// MAC key is not 32 bytes.
    #[error("invalid mac key length {len}, expected 32")]
    InvalidMacKeyLength {
        /// Length supplied.
        len: usize,
    },

    /// Key has no MAC key, so it cannot answer or verify challenges.
    #[error("session key has no mac key")]
    MissingMacKey,

    /// Plaintext too large for a single GCM invocation.
    #[error("encryption failed")]
    Encrypt,
}
