//! Operations for model-based testing.
//!
//! Operations are generated from arbitrary bytes and applied to both the
//! reference model and a real simulated link.

use arbitrary::Arbitrary;

/// Something that can happen on a link.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Device sends application text.
    DeviceText(SmallText),
    /// Device asks for a rotation (`new key`).
    RequestRotation,
    /// Device confirms a rotation (`yes`).
    ConfirmRotation,
    /// Device forces a rotation (`new key -f`).
    ForceRotation,
    /// Host challenges the device.
    VerifyKey,
    /// Advance simulation time.
    AdvanceTime {
        /// Seconds to advance (taken modulo 20).
        secs: u8,
    },
    /// Device loses power and reboots from flash.
    PowerCycleDevice,
}

/// Compact application text.
///
/// Always rendered with a `msg-` prefix so it can never collide with a
/// control record.
#[derive(Debug, Clone, Copy, Arbitrary)]
pub struct SmallText {
    /// Content seed.
    pub seed: u8,
    /// Length hint (0-3 maps to short/medium/long/very long).
    pub size_class: u8,
}

impl SmallText {
    /// Expand to bytes.
    pub fn to_bytes(self) -> Vec<u8> {
        let len = match self.size_class % 4 {
            0 => 1,
            1 => 16,
            2 => 200,
            _ => 2000,
        };
        let mut text = b"msg-".to_vec();
        text.extend((0..len).map(|i: usize| b'a' + (self.seed.wrapping_add(i.to_le_bytes()[0]) % 26)));
        text
    }
}

/// Seconds an `AdvanceTime` actually advances.
pub fn advance_secs(secs: u8) -> u64 {
    u64::from(secs % 20)
}
