//! Host runtime for the LiFi secure link.
//!
//! ## Architecture
//!
//! ```text
//! lifilink-host
//!   ├─ SystemEnv    (production Environment impl)
//!   ├─ LinkDriver   (decoder + engine over an async byte duplex)
//!   ├─ KeyCache     (CBOR key file acting as the Auth collaborator)
//!   └─ console      (operator input and output)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod console;
mod driver;
mod error;
mod key_cache;
mod system_env;

use std::{path::PathBuf, time::Duration};

pub use driver::{DEFAULT_TICK, LinkDriver};
pub use error::HostError;
pub use key_cache::KeyCache;
use lifilink_core::{Engine, LinkConfig, MemoryKeyTable};
pub use system_env::SystemEnv;

/// Runtime configuration of the host binary.
#[derive(Debug, Clone)]
pub struct HostRuntimeConfig {
    /// Serial device (or any read/write file) carrying the link.
    pub device_path: PathBuf,
    /// CBOR key cache.
    pub key_cache_path: PathBuf,
    /// Engine configuration.
    pub link: LinkConfig,
    /// Driver tick interval.
    pub tick: Duration,
}

impl Default for HostRuntimeConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/ttyUSB0"),
            key_cache_path: PathBuf::from("lifilink-keys.cbor"),
            link: LinkConfig::default(),
            tick: DEFAULT_TICK,
        }
    }
}

/// Engine type run by the host: keys held in memory, Auth served from the
/// local cache.
pub type HostEngine = Engine<SystemEnv, MemoryKeyTable, KeyCache>;

/// Build the host engine from `config`.
///
/// The key the device last confirmed becomes active. Other cached keys stay
/// with the cache and are resolved through it when the device announces one.
///
/// # Errors
///
/// - `HostError::Cache` if the key cache cannot be opened
pub fn build_engine(config: &HostRuntimeConfig) -> Result<HostEngine, HostError> {
    let cache = KeyCache::open(&config.key_cache_path)?;
    let store = MemoryKeyTable::with_keys(cache.active_key().cloned());
    Ok(Engine::new(SystemEnv::new(), config.link.clone(), store, cache))
}
