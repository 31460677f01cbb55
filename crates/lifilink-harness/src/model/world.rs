//! Reference model of one link.
//!
//! Assumes a perfect line: every handshake that can complete does so before
//! the next operation. Keys are identified by generation number; generation
//! `n` is the key whose ID bytes are all `n`.

use super::operation::{Operation, advance_secs};

/// Rotation cooldown, seconds.
const COOLDOWN: u64 = 15;

/// Handshake timeout, seconds.
const HANDSHAKE_TIMEOUT: u64 = 5;

/// Subset of link state compared between model and real link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Host's active key generation.
    pub host_key: Option<u8>,
    /// Device's active key generation.
    pub device_key: Option<u8>,
    /// Whether the host is waiting for a rotation confirmation.
    pub awaiting_confirm: bool,
    /// Texts delivered to the host.
    pub delivered_texts: usize,
    /// Successful challenges.
    pub challenges_verified: usize,
    /// Rotation requests dropped by the cooldown.
    pub rate_limited: u64,
}

/// The reference implementation.
#[derive(Debug, Clone)]
pub struct ModelLink {
    now: u64,
    generation: u8,
    pool: u8,
    last_request: Option<u64>,
    confirm_deadline: Option<u64>,
    delivered_texts: usize,
    challenges_verified: usize,
    rate_limited: u64,
}

impl ModelLink {
    /// Both ends share generation 1; Auth holds `pool` more keys
    /// (generations 2, 3, ...).
    pub fn new(pool: u8) -> Self {
        Self {
            now: 0,
            generation: 1,
            pool,
            last_request: None,
            confirm_deadline: None,
            delivered_texts: 0,
            challenges_verified: 0,
            rate_limited: 0,
        }
    }

    /// Apply one operation.
    pub fn apply(&mut self, op: &Operation) {
        self.expire();
        match op {
            Operation::DeviceText(_) => self.delivered_texts += 1,
            Operation::RequestRotation => self.request_rotation(),
            Operation::ConfirmRotation => {
                if self.confirm_deadline.is_some() {
                    self.stage();
                } else {
                    // Not expected: plain text.
                    self.delivered_texts += 1;
                }
            },
            Operation::ForceRotation => self.stage(),
            Operation::VerifyKey => {
                if self.confirm_deadline.is_none() {
                    self.challenges_verified += 1;
                }
            },
            Operation::AdvanceTime { secs } => {
                self.now += advance_secs(*secs);
                self.expire();
            },
            Operation::PowerCycleDevice => {},
        }
    }

    /// Current observable state.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            host_key: Some(self.generation),
            device_key: Some(self.generation),
            awaiting_confirm: self.confirm_deadline.is_some(),
            delivered_texts: self.delivered_texts,
            challenges_verified: self.challenges_verified,
            rate_limited: self.rate_limited,
        }
    }

    fn expire(&mut self) {
        if self.confirm_deadline.is_some_and(|deadline| self.now >= deadline) {
            self.confirm_deadline = None;
        }
    }

    fn request_rotation(&mut self) {
        if self.last_request.is_some_and(|last| self.now - last < COOLDOWN) {
            self.rate_limited += 1;
            return;
        }
        if self.confirm_deadline.is_some() {
            return;
        }
        self.last_request = Some(self.now);
        self.confirm_deadline = Some(self.now + HANDSHAKE_TIMEOUT);
    }

    /// Fetch, send and commit a key in one go. Without keys nothing changes,
    /// not even a pending confirmation.
    fn stage(&mut self) {
        if self.pool == 0 {
            return;
        }
        self.pool -= 1;
        self.generation += 1;
        self.confirm_deadline = None;
    }
}
