//! Session protocol engine for the LiFi secure link.
//!
//! Everything here is Sans-IO: the engine consumes decoded frames, framing
//! errors, operator commands and clock ticks, and returns actions for the
//! caller to execute. Time and randomness come from an [`Environment`], so
//! the same engine runs against a serial port in production and a seeded,
//! virtual-clock link in simulation.
//!
//! # Components
//!
//! ```text
//! Engine
//!   ├─ ReplayWindow     (recent nonce cache)
//!   ├─ NonceGenerator   (boot salt ++ counter)
//!   ├─ KeyStore         (flash slots or in-memory table)
//!   ├─ AuthService      (external key distribution)
//!   └─ Handshake        (rotation + challenge state machine)
//! ```
//!
//! # Invariants
//!
//! - A nonce enters the replay window only after its frame decrypted.
//! - A (key, nonce) pair is never reused: any key change re-draws the salt.
//! - The handshake always returns to `Idle`, and pending secrets are wiped
//!   when it does.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod keystore;
pub mod nonce;
pub mod record;
pub mod replay;
pub mod stats;

pub use auth::{AuthError, AuthService, NoAuth, StaticAuth};
pub use config::{LinkConfig, Role};
pub use engine::{
    Command, Engine, EngineAction, EngineEvent, HandshakeState, KeySource, PayloadKind,
};
pub use env::Environment;
pub use error::EngineError;
pub use keystore::{
    BlockDevice, FlashKeyStore, KeyStore, MemoryFlash, MemoryKeyTable, Slot, SlotReport,
    StoreError,
};
pub use nonce::{NonceExhaustion, NonceGenerator};
pub use record::Record;
pub use replay::ReplayWindow;
pub use stats::LinkStats;
