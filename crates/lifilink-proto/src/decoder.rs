//! Resynchronizing frame decoder.
//!
//! A sans-IO finite-state machine fed one byte at a time:
//!
//! ```text
//! Searching(0..3) -> Type -> Length -> Payload -> Crc -> emit
//!        ^                                               |
//!        +----------------- any error / emit ------------+
//! ```
//!
//! # Invariants
//!
//! - The declared length is bounds-checked before the payload buffer is
//!   allocated.
//! - Each field after the sync word has its own read deadline. The payload
//!   deadline grows with the declared length.
//! - After any error the decoder is back in `Searching`. The stream is never
//!   rewound; a bad frame's bytes are not rescanned for sync.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::{
    crc::Crc16,
    errors::{FrameError, FrameField},
    frame::{Frame, MAX_PAYLOAD_LEN, MsgType, SYNC_SIZE, SYNC_WORD},
};

/// Decoder limits and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Largest payload accepted. Larger declared lengths are rejected before
    /// allocation.
    pub max_payload_len: usize,
    /// Deadline for each fixed-size field (type, length, crc) and the base
    /// deadline for the payload.
    pub field_timeout: Duration,
    /// Extra payload deadline per declared payload byte.
    pub payload_timeout_per_byte: Duration,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_payload_len: MAX_PAYLOAD_LEN,
            field_timeout: Duration::from_millis(200),
            payload_timeout_per_byte: Duration::from_micros(100),
        }
    }
}

#[derive(Debug)]
enum State {
    Searching { matched: usize, consumed: usize },
    Type { deadline: Instant },
    Length { msg_type: u8, bytes: [u8; 2], got: usize, deadline: Instant },
    Payload { msg_type: u8, buf: Vec<u8>, len: usize, deadline: Instant },
    Crc { msg_type: u8, payload: Vec<u8>, bytes: [u8; 2], got: usize, deadline: Instant },
}

impl State {
    const fn searching() -> Self {
        Self::Searching { matched: 0, consumed: 0 }
    }

    fn deadline(&self) -> Option<(Instant, FrameField)> {
        match self {
            Self::Searching { .. } => None,
            Self::Type { deadline } => Some((*deadline, FrameField::Type)),
            Self::Length { deadline, .. } => Some((*deadline, FrameField::Length)),
            Self::Payload { deadline, .. } => Some((*deadline, FrameField::Payload)),
            Self::Crc { deadline, .. } => Some((*deadline, FrameField::Crc)),
        }
    }
}

/// Byte-at-a-time frame decoder.
///
/// Time is passed in by the caller, which keeps the decoder deterministic and
/// lets the engine loop poll deadlines without sleeping.
#[derive(Debug)]
pub struct FrameDecoder {
    config: DecoderConfig,
    state: State,
    crc: Crc16,
}

impl FrameDecoder {
    /// Create a decoder in the `Searching` state.
    pub fn new(config: DecoderConfig) -> Self {
        Self { config, state: State::searching(), crc: Crc16::new() }
    }

    /// Decoder configuration.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Returns true if no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Searching { matched: 0, .. })
    }

    /// Deadline of the field currently being read, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.deadline().map(|(deadline, _)| deadline)
    }

    /// Drop any partial frame and restart the sync search.
    pub fn reset(&mut self) {
        self.state = State::searching();
        self.crc = Crc16::new();
    }

    /// Check the current field deadline.
    ///
    /// Returns `FrameError::Timeout` and resets to `Searching` if the field
    /// being read has expired.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<FrameError> {
        let (deadline, field) = self.state.deadline()?;
        if now < deadline {
            return None;
        }
        self.reset();
        Some(FrameError::Timeout { field })
    }

    /// Feed one byte received at `now`.
    ///
    /// Returns `Some` when the byte completes a frame or triggers an error.
    /// A byte arriving after the current field's deadline first times the
    /// field out and is then treated as the start of a new sync search.
    pub fn push(&mut self, byte: u8, now: Instant) -> Option<Result<Frame, FrameError>> {
        if let Some(err) = self.poll_timeout(now) {
            // Cannot complete a sync word on its own, so nothing is lost.
            let _ = self.step(byte, now);
            return Some(Err(err));
        }
        self.step(byte, now)
    }

    /// Feed a chunk of bytes received at `now`, collecting every result.
    pub fn feed(&mut self, data: &[u8], now: Instant) -> Vec<Result<Frame, FrameError>> {
        data.iter().filter_map(|&byte| self.push(byte, now)).collect()
    }

    fn step(&mut self, byte: u8, now: Instant) -> Option<Result<Frame, FrameError>> {
        let field_deadline = now + self.config.field_timeout;

        match &mut self.state {
            State::Searching { matched, consumed } => {
                *consumed += 1;
                *matched = advance_sync(*matched, byte);
                if *matched < SYNC_SIZE {
                    return None;
                }
                let skipped = *consumed - SYNC_SIZE;
                self.crc = Crc16::new();
                self.state = State::Type { deadline: field_deadline };
                if skipped > 0 {
                    return Some(Err(FrameError::BadSync { skipped }));
                }
                None
            },

            State::Type { .. } => {
                self.crc.update_byte(byte);
                self.state =
                    State::Length { msg_type: byte, bytes: [0; 2], got: 0, deadline: field_deadline };
                None
            },

            State::Length { msg_type, bytes, got, .. } => {
                self.crc.update_byte(byte);
                bytes[*got] = byte;
                *got += 1;
                if *got < bytes.len() {
                    return None;
                }

                let msg_type = *msg_type;
                let len = usize::from(u16::from_be_bytes(*bytes));
                if len > self.config.max_payload_len {
                    self.reset();
                    return Some(Err(FrameError::PayloadTooLarge {
                        len,
                        max: self.config.max_payload_len,
                    }));
                }

                self.state = if len == 0 {
                    State::Crc {
                        msg_type,
                        payload: Vec::new(),
                        bytes: [0; 2],
                        got: 0,
                        deadline: field_deadline,
                    }
                } else {
                    let per_byte = self.config.payload_timeout_per_byte
                        * u32::try_from(len).unwrap_or(u32::MAX);
                    State::Payload {
                        msg_type,
                        buf: Vec::with_capacity(len),
                        len,
                        deadline: field_deadline + per_byte,
                    }
                };
                None
            },

            State::Payload { msg_type, buf, len, .. } => {
                self.crc.update_byte(byte);
                buf.push(byte);
                if buf.len() < *len {
                    return None;
                }
                let msg_type = *msg_type;
                let payload = std::mem::take(buf);
                self.state =
                    State::Crc { msg_type, payload, bytes: [0; 2], got: 0, deadline: field_deadline };
                None
            },

            State::Crc { msg_type, payload, bytes, got, .. } => {
                bytes[*got] = byte;
                *got += 1;
                if *got < bytes.len() {
                    return None;
                }

                let received = u16::from_be_bytes(*bytes);
                let computed = self.crc.finish();
                let msg_type = *msg_type;
                let payload = Bytes::from(std::mem::take(payload));
                self.reset();

                if computed != received {
                    return Some(Err(FrameError::Crc { computed, received }));
                }
                Some(MsgType::try_from(msg_type).map(|msg_type| Frame { msg_type, payload }))
            },
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

/// Advance the sync matcher by one byte.
///
/// On mismatch, falls back to the longest suffix of what has been seen that is
/// still a prefix of the sync word, so overlapping sync starts are not missed.
fn advance_sync(matched: usize, byte: u8) -> usize {
    if SYNC_WORD[matched] == byte {
        return matched + 1;
    }
    let mut k = matched;
    while k > 0 {
        k -= 1;
        if SYNC_WORD[..k] == SYNC_WORD[matched - k..matched] && SYNC_WORD[k] == byte {
            return k + 1;
        }
    }
    0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn frame_bytes(msg_type: MsgType, payload: &[u8]) -> Vec<u8> {
        Frame::new(msg_type, payload.to_vec()).to_bytes().unwrap().to_vec()
    }

    #[test]
    fn decodes_single_frame() {
        let now = Instant::now();
        let mut decoder = FrameDecoder::default();
        let results = decoder.feed(&frame_bytes(MsgType::Encrypted, b"hello"), now);

        assert_eq!(results.len(), 1);
        let frame = results[0].as_ref().unwrap();
        assert_eq!(frame.msg_type, MsgType::Encrypted);
        assert_eq!(frame.payload.as_ref(), b"hello");
        assert!(decoder.is_idle());
    }

    #[test]
    fn overlapping_sync_start() {
        let now = Instant::now();
        let mut decoder = FrameDecoder::default();
        let mut bytes = vec![0xAB, 0xAB, 0xCD, 0xAB];
        bytes.extend(frame_bytes(MsgType::KeyIdOnly, &[7; 8]));

        let results = decoder.feed(&bytes, now);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(FrameError::BadSync { skipped: 4 }));
        assert_eq!(results[1].as_ref().unwrap().payload.as_ref(), &[7; 8]);
    }

    #[test]
    fn oversize_length_rejected_before_payload() {
        let now = Instant::now();
        let mut decoder = FrameDecoder::default();
        let mut bytes = SYNC_WORD.to_vec();
        bytes.extend([0x02, 0xFF, 0xFF]);

        let results = decoder.feed(&bytes, now);
        assert_eq!(
            results,
            vec![Err(FrameError::PayloadTooLarge { len: 0xFFFF, max: MAX_PAYLOAD_LEN })]
        );
        assert!(decoder.is_idle(), "no payload buffer retained");
    }

    #[test]
    fn crc_mismatch_reported_and_resyncs() {
        let now = Instant::now();
        let mut decoder = FrameDecoder::default();
        let mut bad = frame_bytes(MsgType::Encrypted, b"payload");
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        bad.extend(frame_bytes(MsgType::Encrypted, b"next"));

        let results = decoder.feed(&bad, now);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(FrameError::Crc { .. })));
        assert_eq!(results[1].as_ref().unwrap().payload.as_ref(), b"next");
    }

    #[test]
    fn unknown_type_consumes_whole_frame() {
        let now = Instant::now();
        let mut decoder = FrameDecoder::default();
        let mut bytes = SYNC_WORD.to_vec();
        let body = [0x99, 0x00, 0x01, 0x42];
        bytes.extend(body);
        bytes.extend(crate::crc::crc16_ccitt(&body).to_be_bytes());

        let results = decoder.feed(&bytes, now);
        assert_eq!(results, vec![Err(FrameError::UnknownType(0x99))]);
        assert!(decoder.is_idle());
    }

    #[test]
    fn field_timeout_resets_decoder() {
        let start = Instant::now();
        let mut decoder = FrameDecoder::default();
        let bytes = frame_bytes(MsgType::Encrypted, b"slow");

        assert!(decoder.feed(&bytes[..6], start).is_empty());
        assert!(decoder.next_deadline().is_some());
        assert_eq!(decoder.poll_timeout(start + Duration::from_millis(100)), None);

        let late = start + Duration::from_millis(250);
        assert_eq!(
            decoder.poll_timeout(late),
            Some(FrameError::Timeout { field: FrameField::Length })
        );
        assert!(decoder.is_idle());

        // Full retransmission decodes cleanly afterwards
        let results = decoder.feed(&bytes, late);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[test]
    fn late_byte_times_out_field() {
        let start = Instant::now();
        let mut decoder = FrameDecoder::default();
        let bytes = frame_bytes(MsgType::Challenge, &[1; 32]);

        assert!(decoder.feed(&bytes[..10], start).is_empty());
        let late = start + Duration::from_secs(1);
        let result = decoder.push(bytes[10], late);
        assert_eq!(result, Some(Err(FrameError::Timeout { field: FrameField::Payload })));
    }

    #[test]
    fn payload_deadline_scales_with_length() {
        let start = Instant::now();
        let mut small = FrameDecoder::default();
        let mut large = FrameDecoder::default();

        small.feed(&frame_bytes(MsgType::Encrypted, &[0; 16])[..8], start);
        large.feed(&frame_bytes(MsgType::Encrypted, &[0; 4096])[..8], start);

        assert!(large.next_deadline().unwrap() > small.next_deadline().unwrap());
    }

    #[test]
    fn advance_sync_fallback() {
        assert_eq!(advance_sync(0, 0xAB), 1);
        assert_eq!(advance_sync(1, 0xAB), 1);
        assert_eq!(advance_sync(2, 0xAB), 1);
        assert_eq!(advance_sync(3, 0x00), 0);
        assert_eq!(advance_sync(3, 0x12), 4);
    }
}
