//! Fuzz target for the streaming [`FrameDecoder`].
//!
//! # Strategy
//!
//! - Arbitrary byte chunks fed at arbitrary time steps
//! - Chunk boundaries anywhere, including inside the sync word and CRC
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - Every decoded frame re-encodes to bytes that decode to the same frame
//! - Decoded payloads never exceed the configured maximum

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lifilink_proto::{DecoderConfig, FrameDecoder, MAX_PAYLOAD_LEN};

#[derive(Debug, Arbitrary)]
struct Chunk {
    /// Milliseconds since the previous chunk.
    delay_ms: u8,
    bytes: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    /// Small limit so oversize frames are reachable.
    max_payload_len: u16,
    chunks: Vec<Chunk>,
}

fuzz_target!(|input: FuzzInput| {
    let max_payload_len = usize::from(input.max_payload_len).min(MAX_PAYLOAD_LEN);
    let config = DecoderConfig { max_payload_len, ..DecoderConfig::default() };
    let mut decoder = FrameDecoder::new(config);
    let mut now = Instant::now();

    for chunk in input.chunks {
        now += Duration::from_millis(u64::from(chunk.delay_ms));
        for result in decoder.feed(&chunk.bytes, now) {
            let Ok(frame) = result else { continue };
            assert!(frame.payload.len() <= max_payload_len);

            let encoded = frame.to_bytes().unwrap();
            let mut fresh = FrameDecoder::new(config);
            let again = fresh.feed(&encoded, now);
            assert_eq!(again.len(), 1);
            assert_eq!(again[0].as_ref().ok(), Some(&frame));
        }
    }
});
