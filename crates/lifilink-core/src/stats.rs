//! Link statistics.
//!
//! A plain struct owned by the caller and passed into every
//! [`Engine::handle`](crate::Engine::handle) call. The engine only
//! increments; rendering is someone else's job.

/// Counters for one link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames that passed framing and CRC.
    pub packets_received: u64,
    /// Encrypted or file frames that authenticated.
    pub decrypt_success: u64,
    /// Encrypted or file frames that failed authentication.
    pub decrypt_failures: u64,
    /// Frames dropped because their nonce was in the replay window.
    pub replays_blocked: u64,
    /// Frame field read timeouts.
    pub timeouts: u64,
    /// Handshake waits that expired.
    pub handshake_timeouts: u64,
    /// Bytes skipped before a sync word (one count per resync).
    pub bad_preambles: u64,
    /// Frames with a CRC mismatch.
    pub crc_failures: u64,
    /// Frames rejected for length, type or layout.
    pub malformed_frames: u64,
    /// Challenge replies whose `HMAC:` field was not valid hex.
    pub malformed_responses: u64,
    /// Rotation requests dropped by the cooldown.
    pub rate_limited: u64,
    /// Session keys activated over the life of the link.
    pub keys_consumed: u64,
}

impl LinkStats {
    /// Zero every counter except `keys_consumed`, which tracks key usage
    /// across the whole deployment.
    pub fn reset(&mut self) {
        *self = Self { keys_consumed: self.keys_consumed, ..Self::default() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_keys_consumed() {
        let mut stats = LinkStats {
            packets_received: 10,
            decrypt_failures: 2,
            keys_consumed: 3,
            ..LinkStats::default()
        };
        stats.reset();
        assert_eq!(stats, LinkStats { keys_consumed: 3, ..LinkStats::default() });
    }
}
