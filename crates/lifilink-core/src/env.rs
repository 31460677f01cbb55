//! Environment abstraction for deterministic testing.
//!
//! The engine never reads the clock or the OS entropy pool directly. It asks
//! an `Environment`, which is a thin wrapper over the system in production
//! and a seeded RNG plus virtual clock in simulation.
//!
//! Implementations keep `now()` monotonic. Simulated ones replay the same
//! byte stream for the same seed, so a failing link scenario reruns exactly.

use std::time::{Duration, Instant};

/// Time, randomness and sleeping for the engine and its drivers.
///
/// # Security
///
/// Production implementations MUST fill `random_bytes` from the OS CSPRNG.
/// Boot salts and challenges are drawn from it.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current monotonic time.
    fn now(&self) -> Instant;

    /// Sleep for `duration`.
    ///
    /// Only driver code sleeps. The engine compares deadlines against
    /// `now()` instead.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64`, mostly useful for test seeds and IDs.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
