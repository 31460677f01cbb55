//! Nonce replay window.
//!
//! A bounded recency cache of accepted nonces. It stops exact-duplicate
//! retransmission and replay of recently seen frames. A nonce older than the
//! window depth is forgotten and would be accepted again; that residual risk
//! is accepted because nonces are never reused by an honest sender.

use std::collections::{HashSet, VecDeque};

use lifilink_crypto::NONCE_SIZE;

/// Recently accepted nonces, oldest first.
///
/// # Invariants
///
/// - `order.len() == members.len() <= capacity`
/// - Every nonce appears at most once
#[derive(Debug, Clone)]
pub struct ReplayWindow {
    capacity: usize,
    order: VecDeque<[u8; NONCE_SIZE]>,
    members: HashSet<[u8; NONCE_SIZE]>,
}

impl ReplayWindow {
    /// Empty window remembering up to `capacity` nonces.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Returns true if `nonce` is in the window.
    pub fn seen(&self, nonce: &[u8; NONCE_SIZE]) -> bool {
        self.members.contains(nonce)
    }

    /// Insert `nonce`, evicting the oldest entry when full.
    ///
    /// Call only after the frame carrying `nonce` authenticated, otherwise
    /// forged frames could flush genuine nonces out of the window.
    pub fn record(&mut self, nonce: [u8; NONCE_SIZE]) {
        if self.capacity == 0 || !self.members.insert(nonce) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(nonce);
    }

    /// Number of nonces held.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Maximum number of nonces held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
