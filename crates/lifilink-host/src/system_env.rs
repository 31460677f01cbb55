//! Production environment: system clock and OS randomness.

use std::time::{Duration, Instant};

use lifilink_core::Environment;

/// Environment backed by the system.
///
/// - `std::time::Instant::now()` for time
/// - `tokio::time::sleep()` for the driver's tick
/// - `getrandom` for nonce salts and challenges
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a system environment.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(err) = getrandom::fill(buffer) {
            // A predictable salt repeats nonces across restarts.
            tracing::error!(%err, "OS randomness unavailable");
            std::process::abort();
        }
    }
}
