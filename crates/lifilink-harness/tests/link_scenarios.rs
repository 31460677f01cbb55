//! End-to-end scenarios over the simulated optical link.

#![allow(clippy::unwrap_used)]

use std::{collections::HashSet, time::Duration};

use lifilink_core::{
    Command, EngineAction, EngineError, HandshakeState, KeySource, PayloadKind, StaticAuth,
};
use lifilink_crypto::{KeyId, SessionKey};
use lifilink_harness::{LinkFaults, Side, SimLink};
use lifilink_proto::MsgType;

fn key(n: u8) -> SessionKey {
    SessionKey::new(KeyId([n; 8]), &[n; 32], Some(&[n ^ 0x5A; 32])).unwrap()
}

fn delivered_texts(actions: &[EngineAction]) -> Vec<Vec<u8>> {
    actions
        .iter()
        .filter_map(|action| match action {
            EngineAction::Delivered { kind: PayloadKind::Text, plaintext } => Some(plaintext.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn rotation_survives_line_noise() {
    let noise = LinkFaults { noise_rate: 1.0, ..LinkFaults::NONE };
    let mut link = SimLink::new(11, Some(key(1)), StaticAuth::new([key(2)])).with_faults(noise);

    link.command(Side::Device, Command::SendText(b"new key".to_vec()));
    link.run_until_idle();
    assert_eq!(link.host().engine().state(), HandshakeState::WaitingForRotationConfirm);

    link.command(Side::Device, Command::SendText(b"yes".to_vec()));
    link.run_until_idle();

    assert_eq!(link.host().engine().active_key_id(), Some(KeyId([2; 8])));
    assert_eq!(link.device().engine().active_key_id(), Some(KeyId([2; 8])));
    assert!(link.host().outputs().contains(&EngineAction::RotationCommitted { key_id: KeyId([2; 8]) }));

    // Every frame was preceded by noise.
    let host = link.host().stats();
    assert_eq!(host.bad_preambles, host.packets_received);
    let device = link.device().stats();
    assert_eq!(device.bad_preambles, device.packets_received);
}

#[test]
fn replayed_frame_is_blocked() {
    let mut link = SimLink::new(12, Some(key(1)), StaticAuth::default());

    link.command(Side::Device, Command::SendText(b"open the door".to_vec()));
    link.run_until_idle();

    let (_, frame) = link
        .sent_frames()
        .iter()
        .find(|(side, frame)| *side == Side::Device && frame.msg_type == MsgType::Encrypted)
        .cloned()
        .unwrap();
    link.inject(Side::Host, frame.to_bytes().unwrap().to_vec());
    link.run_until_idle();

    assert_eq!(delivered_texts(link.host().outputs()), vec![b"open the door".to_vec()]);
    assert_eq!(link.host().stats().replays_blocked, 1);
    assert!(matches!(link.host().errors(), [EngineError::ReplayDetected { .. }]));
}

#[test]
fn crc_failure_leaves_replay_window_untouched() {
    let mut link = SimLink::new(17, Some(key(1)), StaticAuth::default());

    link.drop_next_to(Side::Host);
    link.command(Side::Device, Command::SendText(b"checksum".to_vec()));
    link.run_until_idle();

    let (_, frame) = link.sent_frames().last().cloned().unwrap();
    let genuine = frame.to_bytes().unwrap().to_vec();
    let mut corrupted = genuine.clone();
    *corrupted.last_mut().unwrap() ^= 0x01;

    link.inject(Side::Host, corrupted);
    link.run_until_idle();

    let host = link.host();
    assert_eq!(host.stats().crc_failures, 1);
    assert_eq!(host.stats().packets_received, 0);
    assert!(delivered_texts(host.outputs()).is_empty());
    assert!(host.engine().replay_window().is_empty());

    // The intact copy carries the same nonce and must still be accepted.
    link.inject(Side::Host, genuine);
    link.run_until_idle();

    assert_eq!(delivered_texts(link.host().outputs()), vec![b"checksum".to_vec()]);
    assert_eq!(link.host().stats().replays_blocked, 0);
    assert_eq!(link.host().engine().replay_window().len(), 1);
}

#[test]
fn power_cycled_device_resumes_with_stored_key() {
    let mut link = SimLink::new(13, Some(key(1)), StaticAuth::new([key(2)]));

    link.command(Side::Device, Command::SendText(b"new key -f".to_vec()));
    link.run_until_idle();
    link.command(Side::Device, Command::SendText(b"before".to_vec()));
    link.run_until_idle();

    link.power_cycle_device();
    assert_eq!(link.device().engine().active_key_id(), Some(KeyId([2; 8])));

    link.command(Side::Device, Command::SendText(b"after".to_vec()));
    link.run_until_idle();

    assert_eq!(delivered_texts(link.host().outputs()), vec![b"before".to_vec(), b"after".to_vec()]);
    assert_eq!(link.host().stats().replays_blocked, 0);
    assert_eq!(link.host().stats().decrypt_failures, 0);
}

#[test]
fn bit_flips_never_deliver_corrupted_text() {
    let faults = LinkFaults { bit_flip_rate: 0.01, ..LinkFaults::NONE };
    let mut link = SimLink::new(14, Some(key(1)), StaticAuth::default()).with_faults(faults);

    let sent: Vec<Vec<u8>> = (0..60u8)
        .map(|i| format!("reading {i:02}: {}", "x".repeat(usize::from(i))).into_bytes())
        .collect();
    for text in &sent {
        link.command(Side::Device, Command::SendText(text.clone()));
        link.run_until_idle();
        // Lets a corrupted length field time out instead of swallowing the
        // next frame.
        link.advance(Duration::from_secs(2));
    }

    let genuine: HashSet<&Vec<u8>> = sent.iter().collect();
    let delivered = delivered_texts(link.host().outputs());
    assert!(delivered.iter().all(|text| genuine.contains(text)));
    assert!(delivered.len() < sent.len());

    let stats = link.host().stats();
    let rejected = stats.crc_failures
        + stats.malformed_frames
        + stats.timeouts
        + stats.decrypt_failures
        + stats.bad_preambles;
    assert!(rejected > 0);
}

#[test]
fn lost_ack_is_recovered_by_key_id_broadcast() {
    let mut link = SimLink::new(15, Some(key(1)), StaticAuth::new([key(2)]));

    link.command(Side::Device, Command::SendText(b"new key -f".to_vec()));
    // Host receives the request and sends the key; the device's ACK is lost.
    link.drop_next_to(Side::Host);
    link.step();
    link.run_until_idle();

    assert_eq!(link.device().engine().active_key_id(), Some(KeyId([2; 8])));
    assert_eq!(link.host().engine().state(), HandshakeState::WaitingForRotationAck);

    link.advance(Duration::from_secs(5));
    assert_eq!(link.host().engine().active_key_id(), Some(KeyId([1; 8])));
    assert!(link.host().outputs().contains(&EngineAction::RotationDiscarded { key_id: KeyId([2; 8]) }));

    link.command(Side::Device, Command::SendKeyId);
    link.run_until_idle();

    assert_eq!(link.host().engine().active_key_id(), Some(KeyId([2; 8])));
    assert!(link.host().outputs().contains(&EngineAction::KeyActivated {
        key_id: KeyId([2; 8]),
        source: KeySource::Broadcast
    }));

    link.command(Side::Device, Command::SendText(b"in sync".to_vec()));
    link.run_until_idle();
    assert_eq!(delivered_texts(link.host().outputs()), vec![b"in sync".to_vec()]);
}

#[test]
fn host_challenge_verifies_device() {
    let mut link = SimLink::new(16, Some(key(3)), StaticAuth::default());

    link.command(Side::Host, Command::VerifyKey);
    link.run_until_idle();

    assert!(link.host().outputs().contains(&EngineAction::ChallengeVerified));
    assert!(link.device().outputs().contains(&EngineAction::ChallengeAnswered));
    assert_eq!(link.host().engine().state(), HandshakeState::Idle);
}

#[test]
fn same_seed_same_run() {
    let run = |seed| {
        let mut link = SimLink::new(seed, Some(key(1)), StaticAuth::new([key(2)]))
            .with_faults(LinkFaults::NOISY);
        link.command(Side::Device, Command::SendText(b"new key -f".to_vec()));
        link.run_until_idle();
        for i in 0..10u8 {
            link.command(Side::Device, Command::SendText(vec![b'a' + i; 32]));
            link.run_until_idle();
        }
        link.sent_frames().iter().map(|(_, frame)| frame.to_bytes().unwrap()).collect::<Vec<_>>()
    };

    assert_eq!(run(99), run(99));
}
