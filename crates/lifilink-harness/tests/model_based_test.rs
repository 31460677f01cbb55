//! Model-based property tests.
//!
//! Random operation sequences are applied to the reference model and to a
//! simulated link running the real engines; their observable states must
//! agree after every operation.
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!       ModelLink      RealLink        Compare
//!      (reference)    (SimLink)     ObservableState
//! ```

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use arbitrary::{Arbitrary, Unstructured};
use lifilink_core::{Command, EngineAction, HandshakeState, PayloadKind, StaticAuth};
use lifilink_crypto::{KeyId, SessionKey};
use lifilink_harness::{
    ModelLink, ObservableState, Operation, Side, SimLink, SmallText, model::advance_secs,
};
use proptest::prelude::*;

fn key(generation: u8) -> SessionKey {
    SessionKey::new(KeyId([generation; 8]), &[generation; 32], Some(&[!generation; 32])).unwrap()
}

/// Real system wrapper that mirrors `ModelLink`'s interface.
struct RealLink {
    link: SimLink,
}

impl RealLink {
    fn new(seed: u64, pool: u8) -> Self {
        let auth = StaticAuth::new((2..2 + pool).map(key));
        Self { link: SimLink::new(seed, Some(key(1)), auth) }
    }

    fn device_says(&mut self, text: &[u8]) {
        self.link.command(Side::Device, Command::SendText(text.to_vec()));
        self.link.run_until_idle();
    }

    fn apply(&mut self, op: &Operation) {
        match op {
            Operation::DeviceText(text) => self.device_says(&text.to_bytes()),
            Operation::RequestRotation => self.device_says(b"new key"),
            Operation::ConfirmRotation => self.device_says(b"yes"),
            Operation::ForceRotation => self.device_says(b"new key -f"),
            Operation::VerifyKey => {
                self.link.command(Side::Host, Command::VerifyKey);
                self.link.run_until_idle();
            },
            Operation::AdvanceTime { secs } => {
                self.link.advance(Duration::from_secs(advance_secs(*secs)));
            },
            Operation::PowerCycleDevice => self.link.power_cycle_device(),
        }
    }

    fn observable_state(&self) -> ObservableState {
        let host = self.link.host();
        let device = self.link.device();
        ObservableState {
            host_key: host.engine().active_key_id().map(|id| id.0[0]),
            device_key: device.engine().active_key_id().map(|id| id.0[0]),
            awaiting_confirm: host.engine().state() == HandshakeState::WaitingForRotationConfirm,
            delivered_texts: host
                .outputs()
                .iter()
                .filter(|a| matches!(a, EngineAction::Delivered { kind: PayloadKind::Text, .. }))
                .count(),
            challenges_verified: host
                .outputs()
                .iter()
                .filter(|a| matches!(a, EngineAction::ChallengeVerified))
                .count(),
            rate_limited: host.stats().rate_limited,
        }
    }
}

/// Strategy for generating `SmallText`.
fn small_text_strategy() -> impl Strategy<Value = SmallText> {
    (any::<u8>(), any::<u8>()).prop_map(|(seed, size_class)| SmallText { seed, size_class })
}

/// Strategy for generating operations, weighted towards the handshake.
fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => small_text_strategy().prop_map(Operation::DeviceText),
        3 => Just(Operation::RequestRotation),
        3 => Just(Operation::ConfirmRotation),
        1 => Just(Operation::ForceRotation),
        2 => Just(Operation::VerifyKey),
        3 => any::<u8>().prop_map(|secs| Operation::AdvanceTime { secs }),
        1 => Just(Operation::PowerCycleDevice),
    ]
}

fn check(seed: u64, pool: u8, ops: &[Operation]) -> Result<(), TestCaseError> {
    let mut model = ModelLink::new(pool);
    let mut real = RealLink::new(seed, pool);

    for (i, op) in ops.iter().enumerate() {
        model.apply(op);
        real.apply(op);

        prop_assert_eq!(
            model.observable_state(),
            real.observable_state(),
            "divergence at operation {}: {:?}",
            i,
            op
        );
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_model_matches_real(
        seed in any::<u64>(),
        pool in 0..4u8,
        ops in prop::collection::vec(operation_strategy(), 0..40)
    ) {
        check(seed, pool, &ops)?;
    }

    /// Same comparison, with operations decoded from raw bytes the way a
    /// fuzzer would produce them.
    #[test]
    fn prop_model_matches_real_unstructured(
        seed in any::<u64>(),
        data in prop::collection::vec(any::<u8>(), 0..256)
    ) {
        let mut u = Unstructured::new(&data);
        let pool = u8::arbitrary(&mut u).unwrap_or(0) % 4;
        let ops = Vec::<Operation>::arbitrary(&mut u).unwrap_or_default();
        check(seed, pool, &ops)?;
    }

    /// PROPERTY: both ends always hold the same key on a perfect line.
    #[test]
    fn prop_ends_agree_on_key(
        seed in any::<u64>(),
        ops in prop::collection::vec(operation_strategy(), 0..40)
    ) {
        let mut real = RealLink::new(seed, 3);
        for op in &ops {
            real.apply(op);
            let state = real.observable_state();
            prop_assert_eq!(state.host_key, state.device_key);
        }
    }

    /// PROPERTY: key generations only move forward.
    #[test]
    fn prop_generation_monotonic(ops in prop::collection::vec(operation_strategy(), 0..60)) {
        let mut model = ModelLink::new(3);
        let mut last = 1;
        for op in &ops {
            model.apply(op);
            let generation = model.observable_state().host_key.unwrap();
            prop_assert!(generation >= last);
            prop_assert!(generation <= 4);
            last = generation;
        }
    }
}

#[cfg(test)]
mod smoke_tests {
    use super::*;

    #[test]
    fn request_confirm_rotates_both_ends() {
        let ops = [Operation::RequestRotation, Operation::ConfirmRotation];
        let mut real = RealLink::new(1, 1);
        for op in &ops {
            real.apply(op);
        }
        let state = real.observable_state();
        assert_eq!(state.host_key, Some(2));
        assert_eq!(state.device_key, Some(2));
        assert!(!state.awaiting_confirm);
    }

    #[test]
    fn confirmation_expires_after_timeout() {
        let mut real = RealLink::new(2, 1);
        real.apply(&Operation::RequestRotation);
        real.apply(&Operation::AdvanceTime { secs: 5 });
        real.apply(&Operation::ConfirmRotation);

        let state = real.observable_state();
        assert_eq!(state.host_key, Some(1));
        assert_eq!(state.delivered_texts, 1);
    }

    #[test]
    fn power_cycle_keeps_rotated_key() {
        let mut real = RealLink::new(3, 1);
        real.apply(&Operation::ForceRotation);
        real.apply(&Operation::PowerCycleDevice);
        real.apply(&Operation::VerifyKey);

        let state = real.observable_state();
        assert_eq!(state.device_key, Some(2));
        assert_eq!(state.challenges_verified, 1);
    }
}
