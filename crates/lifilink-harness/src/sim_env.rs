//! Simulated environment: seeded RNG and a virtual clock.

use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use lifilink_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic environment.
///
/// Time only moves when the test says so ([`SimEnv::advance`] or
/// [`Environment::sleep`]). Clones share the clock and the RNG stream;
/// [`SimEnv::fork`] shares the clock but gets its own stream, which is what
/// two endpoints of one simulated link need.
#[derive(Debug, Clone)]
pub struct SimEnv {
    base: Instant,
    elapsed: Arc<Mutex<Duration>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Environment seeded with `seed`, clock at zero.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            base: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Same clock, independent RNG stream derived from this one.
    #[must_use]
    pub fn fork(&self) -> Self {
        let seed = self.random_u64();
        Self {
            base: self.base,
            elapsed: Arc::clone(&self.elapsed),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed += by;
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the RNG, for fault decisions that must follow the seed.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut ChaCha8Rng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.with_rng(|rng| rng.fill_bytes(buffer));
    }
}
