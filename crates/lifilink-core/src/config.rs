//! Link configuration.

use std::time::Duration;

use lifilink_crypto::KeySize;
use lifilink_proto::{DecoderConfig, MAX_PAYLOAD_LEN};

/// Which side of the link an engine plays.
///
/// The initiator owns key distribution: it answers rotation requests by
/// fetching keys from Auth, sends provisioning frames and issues challenges.
/// The responder is the constrained device: it persists provisioned keys,
/// answers challenges and announces its key ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Host endpoint (key distributor, challenger).
    Initiator,
    /// Device endpoint (key holder, challenge responder).
    Responder,
}

/// Configuration shared by the engine and its driver.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Which side of the link this is.
    pub role: Role,
    /// AEAD key size of the deployment. Provisioned keys of any other size
    /// are rejected.
    pub key_size: KeySize,
    /// Number of recent nonces remembered for replay detection.
    pub replay_capacity: usize,
    /// Largest accepted frame payload.
    pub max_payload_len: usize,
    /// Minimum interval between accepted `new key` requests.
    pub rotation_cooldown: Duration,
    /// Deadline for every handshake wait state.
    pub handshake_timeout: Duration,
    /// Read deadline for each fixed-size frame field.
    pub field_timeout: Duration,
    /// Extra payload read deadline per declared payload byte.
    pub payload_timeout_per_byte: Duration,
    /// Challenge length in bytes.
    pub challenge_size: usize,
}

impl LinkConfig {
    /// Default configuration for `role`.
    pub fn new(role: Role) -> Self {
        Self { role, ..Self::default() }
    }

    /// Frame decoder settings derived from this configuration.
    pub fn decoder(&self) -> DecoderConfig {
        DecoderConfig {
            max_payload_len: self.max_payload_len,
            field_timeout: self.field_timeout,
            payload_timeout_per_byte: self.payload_timeout_per_byte,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            role: Role::Initiator,
            key_size: KeySize::Aes256,
            replay_capacity: 64,
            max_payload_len: MAX_PAYLOAD_LEN,
            rotation_cooldown: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(5),
            field_timeout: Duration::from_millis(200),
            // 1 ms per 10 bytes
            payload_timeout_per_byte: Duration::from_micros(100),
            challenge_size: 32,
        }
    }
}
