//! Engine error types.

use lifilink_crypto::{AuthFailure, CryptoError, KeyId, KeySize};
use lifilink_proto::{FrameError, MsgType};
use thiserror::Error;

use crate::{
    auth::AuthError, config::Role, engine::HandshakeState, keystore::StoreError,
    nonce::NonceExhaustion,
};

/// Errors from processing one engine event.
///
/// Every variant except [`EngineError::NonceExhaustion`] means "this message
/// or command was discarded"; the link carries on.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Frame payload did not have the layout its class requires.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// AEAD tag did not verify under any candidate key.
    #[error("decryption failed: {0}")]
    AuthFailure(#[from] AuthFailure),

    /// Nonce already in the replay window.
    #[error("replayed nonce {}", hex::encode(.nonce))]
    ReplayDetected {
        /// The offending nonce.
        nonce: [u8; 12],
    },

    /// No key to encrypt or decrypt with.
    #[error("no session key: {reason}")]
    KeyUnavailable {
        /// Why no key was usable.
        reason: &'static str,
    },

    /// Neither the key store nor Auth knows an announced key ID.
    #[error("key {key_id} not found locally or at auth")]
    KeyNotFound {
        /// Announced key ID.
        key_id: KeyId,
    },

    /// Key size differs from the deployment's configured size.
    #[error("key size mismatch: expected {expected:?}, got {actual:?}")]
    KeySizeMismatch {
        /// Configured size.
        expected: KeySize,
        /// Size offered.
        actual: KeySize,
    },

    /// Key store write or readback failed; the previous key stays active.
    #[error("key store error: {0}")]
    Store(#[from] StoreError),

    /// Auth collaborator failed.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Key construction or encryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Nonce space for the current key is used up. Nothing more may be sent
    /// until the key changes.
    #[error(transparent)]
    NonceExhaustion(#[from] NonceExhaustion),

    /// This role does not consume frames of this class.
    #[error("unexpected {msg_type:?} frame for {role:?}")]
    UnexpectedFrame {
        /// Class of the frame.
        msg_type: MsgType,
        /// Our role.
        role: Role,
    },

    /// A handshake is already in progress.
    #[error("handshake busy in {state:?}")]
    Busy {
        /// Current handshake state.
        state: HandshakeState,
    },

    /// Operation is reserved for the other role.
    #[error("{op} not available to {role:?}")]
    WrongRole {
        /// Operation attempted.
        op: &'static str,
        /// Our role.
        role: Role,
    },
}

impl EngineError {
    /// Returns true if the link must stop sending under the current key.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NonceExhaustion(_))
    }
}
