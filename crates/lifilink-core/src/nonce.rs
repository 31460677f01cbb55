//! Per-sender GCM nonce construction.
//!
//! Nonce layout: `boot_salt(8) ++ counter(4, big-endian)`. The salt is drawn
//! from the environment's CSPRNG whenever the generator is (re)started, which
//! happens at session start and on every session key change. Uniqueness is
//! scoped per (key, salt), so the counter only has to be monotonic within one
//! salt.

use lifilink_crypto::NONCE_SIZE;
use thiserror::Error;

use crate::env::Environment;

/// Salt length.
pub const SALT_SIZE: usize = 8;

/// The 32-bit counter wrapped under the current salt.
///
/// Fatal for the current key: nothing more may be sent until the key (and
/// with it the salt) changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("nonce counter exhausted for current key")]
pub struct NonceExhaustion;

/// Monotonic nonce source for one sender.
///
/// # Invariants
///
/// - No nonce is returned twice for the same salt
/// - Once exhausted, every call fails until `rekey`
#[derive(Debug)]
pub struct NonceGenerator {
    salt: [u8; SALT_SIZE],
    counter: u32,
    exhausted: bool,
}

impl NonceGenerator {
    /// Start a generator with a fresh salt.
    pub fn new(env: &impl Environment) -> Self {
        let mut generator = Self { salt: [0; SALT_SIZE], counter: 0, exhausted: false };
        generator.rekey(env);
        generator
    }

    /// Start a generator from an explicit salt and counter.
    ///
    /// Used to test wraparound without issuing four billion nonces.
    pub fn with_state(salt: [u8; SALT_SIZE], counter: u32) -> Self {
        Self { salt, counter, exhausted: false }
    }

    /// Draw a new salt and reset the counter. Required on every key change.
    pub fn rekey(&mut self, env: &impl Environment) {
        env.random_bytes(&mut self.salt);
        self.counter = 0;
        self.exhausted = false;
        tracing::debug!("nonce generator rekeyed");
    }

    /// Next unique nonce.
    ///
    /// # Errors
    ///
    /// - `NonceExhaustion` once every counter value under this salt has been
    ///   used
    pub fn next_nonce(&mut self) -> Result<[u8; NONCE_SIZE], NonceExhaustion> {
        if self.exhausted {
            return Err(NonceExhaustion);
        }

        let counter = self.counter;
        match self.counter.checked_add(1) {
            Some(next) => self.counter = next,
            None => self.exhausted = true,
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..SALT_SIZE].copy_from_slice(&self.salt);
        nonce[SALT_SIZE..].copy_from_slice(&counter.to_be_bytes());
        Ok(nonce)
    }

    /// Number of nonces issued under the current salt.
    pub fn issued(&self) -> u64 {
        if self.exhausted { u64::from(u32::MAX) + 1 } else { u64::from(self.counter) }
    }

    /// Current salt.
    pub fn salt(&self) -> [u8; SALT_SIZE] {
        self.salt
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        future::Future,
        sync::{
            Arc,
            atomic::{AtomicU8, Ordering},
        },
        time::{Duration, Instant},
    };

    use super::*;

    /// Counts up from a shared byte so every rekey sees a different salt
    #[derive(Clone, Default)]
    struct CountingEnv(Arc<AtomicU8>);

    impl Environment for CountingEnv {
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let base = self.0.fetch_add(1, Ordering::Relaxed);
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = base.wrapping_add(u8::try_from(i).unwrap_or(0));
            }
        }
    }

    #[test]
    fn layout_is_salt_then_counter() {
        let mut generator = NonceGenerator::with_state([7; SALT_SIZE], 0);
        let first = generator.next_nonce().unwrap();
        let second = generator.next_nonce().unwrap();

        assert_eq!(&first[..8], &[7; 8]);
        assert_eq!(&first[8..], &[0, 0, 0, 0]);
        assert_eq!(&second[8..], &[0, 0, 0, 1]);
        assert_eq!(generator.issued(), 2);
    }

    #[test]
    fn wraparound_is_fatal_until_rekey() {
        let env = CountingEnv::default();
        let mut generator = NonceGenerator::with_state([1; SALT_SIZE], u32::MAX);

        let last = generator.next_nonce().unwrap();
        assert_eq!(&last[8..], &[0xFF; 4]);
        assert_eq!(generator.next_nonce(), Err(NonceExhaustion));
        assert_eq!(generator.next_nonce(), Err(NonceExhaustion));

        generator.rekey(&env);
        let fresh = generator.next_nonce().unwrap();
        assert_eq!(&fresh[8..], &[0, 0, 0, 0]);
        assert_ne!(&fresh[..8], &[1; 8]);
    }

    #[test]
    fn rekey_draws_new_salt() {
        let env = CountingEnv::default();
        let mut generator = NonceGenerator::new(&env);
        let before = generator.salt();
        generator.next_nonce().unwrap();

        generator.rekey(&env);
        assert_ne!(generator.salt(), before);
        assert_eq!(generator.issued(), 0);
    }
}
