//! CRC-16/CCITT-FALSE.

/// CCITT polynomial.
const POLY: u16 = 0x1021;

/// Initial register value.
const INIT: u16 = 0xFFFF;

/// Incremental CRC-16/CCITT (poly `0x1021`, init `0xFFFF`, no reflection, no
/// final xor).
///
/// The decoder feeds bytes as they arrive so it never has to re-buffer the
/// header to check the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    /// Fresh register.
    pub const fn new() -> Self {
        Self { value: INIT }
    }

    /// Feed one byte.
    pub fn update_byte(&mut self, byte: u8) {
        self.value ^= u16::from(byte) << 8;
        for _ in 0..8 {
            self.value = if self.value & 0x8000 != 0 {
                (self.value << 1) ^ POLY
            } else {
                self.value << 1
            };
        }
    }

    /// Feed a slice.
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.update_byte(byte);
        }
    }

    /// Current checksum.
    pub const fn finish(&self) -> u16 {
        self.value
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot CRC-16/CCITT over `data`.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(data);
    crc.finish()
}
