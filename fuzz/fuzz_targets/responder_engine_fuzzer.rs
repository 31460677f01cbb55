//! Fuzz target for the responder side of the link [`Engine`].
//!
//! Prevents a hostile initiator from crashing the device or swapping its key
//! without a well-formed provisioning frame.
//!
//! # Strategy
//!
//! - Frames of every class with arbitrary payloads
//! - Well-formed provisioning frames mixed in
//! - Operator commands and clock jumps between frames
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - Only `NonceExhaustion` is fatal, and it cannot happen here
//! - The active key changes only on a provisioning frame or a slot command
//! - Every received frame is counted exactly once

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lifilink_core::{
    Command, Engine, EngineEvent, FlashKeyStore, KeyStore, LinkConfig, LinkStats, MemoryFlash,
    NoAuth, Role, Slot,
};
use lifilink_crypto::{KeyId, SessionKey};
use lifilink_harness::SimEnv;
use lifilink_proto::{Frame, MsgType, payloads::KeyProvisioning};

#[derive(Debug, Arbitrary)]
enum FuzzEvent {
    RawFrame { msg_type: u8, payload: Vec<u8> },
    Provision { key_id: [u8; 8], cipher_key: [u8; 32], mac_key: Option<[u8; 32]> },
    SendText(Vec<u8>),
    UseSlot(bool),
    Tick { advance_secs: u8 },
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    seed: u64,
    events: Vec<FuzzEvent>,
}

const MSG_TYPES: [MsgType; 6] = [
    MsgType::Encrypted,
    MsgType::Challenge,
    MsgType::Response,
    MsgType::File,
    MsgType::KeyIdOnly,
    MsgType::Key,
];

fuzz_target!(|input: FuzzInput| {
    let env = SimEnv::with_seed(input.seed);
    let mut flash = FlashKeyStore::new(MemoryFlash::default());
    let initial = SessionKey::new(KeyId([1; 8]), &[1; 32], Some(&[2; 32])).unwrap();
    flash.store(&initial).unwrap();

    let mut engine = Engine::new(env.clone(), LinkConfig::new(Role::Responder), flash, NoAuth);
    let mut stats = LinkStats::default();
    let mut frames = 0u64;

    for event in input.events {
        let before = engine.active_key_id();
        let (event, may_rekey) = match event {
            FuzzEvent::RawFrame { msg_type, payload } => {
                let msg_type = MSG_TYPES[usize::from(msg_type) % MSG_TYPES.len()];
                frames += 1;
                (EngineEvent::FrameReceived(Frame::new(msg_type, payload)), msg_type == MsgType::Key)
            },
            FuzzEvent::Provision { key_id, cipher_key, mac_key } => {
                let frame = KeyProvisioning {
                    key_id,
                    cipher_key: &cipher_key,
                    mac_key: mac_key.as_ref().map(|k| &k[..]),
                }
                .to_frame();
                frames += 1;
                (EngineEvent::FrameReceived(frame), true)
            },
            FuzzEvent::SendText(text) => (EngineEvent::Command(Command::SendText(text)), false),
            FuzzEvent::UseSlot(b) => {
                let slot = if b { Slot::B } else { Slot::A };
                (EngineEvent::Command(Command::UseSlot(slot)), true)
            },
            FuzzEvent::Tick { advance_secs } => {
                env.advance(Duration::from_secs(u64::from(advance_secs)));
                (EngineEvent::Tick, false)
            },
        };

        if let Err(err) = engine.handle(event, &mut stats) {
            assert!(!err.is_fatal(), "fatal error: {err}");
        }
        if !may_rekey {
            assert_eq!(engine.active_key_id(), before);
        }
        assert_eq!(stats.packets_received, frames);
    }
});
