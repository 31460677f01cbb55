//! Session key storage.
//!
//! Two shapes share the [`KeyStore`] contract:
//!
//! - [`FlashKeyStore`]: the constrained endpoint. Two integrity-checked
//!   flash slots plus an `active_slot` index record, double-buffered so the
//!   only good copy of a key is never overwritten in place.
//! - [`MemoryKeyTable`]: the host endpoint. Keys obtained from Auth, looked
//!   up by ID, nothing persisted.

mod flash;
mod memory;

use std::fmt;

pub use flash::{BlockDevice, FlashKeyStore, KEY_HASH_OFFSET, KEY_RECORD_LEN, MemoryFlash};
use lifilink_crypto::{KeyId, SessionKey};
pub use memory::MemoryKeyTable;
use thiserror::Error;

/// Physical key slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// First slot (block 0).
    A,
    /// Second slot (block 1). Treated as freshest when no index survives.
    B,
}

impl Slot {
    /// The other slot.
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Persisted index value.
    pub(crate) const fn index(self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    pub(crate) const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::A),
            1 => Some(Self::B),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::A => "A",
            Self::B => "B",
        })
    }
}

/// Observable state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotReport {
    /// Which slot.
    pub slot: Slot,
    /// Key ID if the slot validates, `None` if empty or corrupt.
    pub key_id: Option<KeyId>,
    /// Whether the index record selects this slot.
    pub active: bool,
}

/// Errors from key storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The block device rejected an operation.
    #[error("flash {op} failed on block {block}")]
    Device {
        /// Operation attempted.
        op: &'static str,
        /// Block addressed.
        block: usize,
    },

    /// Readback after programming did not match what was written.
    #[error("readback verification failed on block {block}")]
    Verify {
        /// Block that failed to verify.
        block: usize,
    },

    /// A cleared block did not read back as erased.
    #[error("block {block} not erased after clear")]
    NotErased {
        /// Block that kept data.
        block: usize,
    },

    /// The store has no notion of this operation.
    #[error("{op} not supported by this key store")]
    Unsupported {
        /// Operation attempted.
        op: &'static str,
    },
}

/// Key storage contract.
///
/// Calls are serialized by the engine that owns the store; sharing one store
/// between engines requires external locking.
pub trait KeyStore {
    /// Load the current key, if any validates.
    fn load(&mut self) -> Option<SessionKey>;

    /// Persist `key` and make it current.
    ///
    /// On error the previously current key stays current.
    fn store(&mut self, key: &SessionKey) -> Result<(), StoreError>;

    /// Erase `slot`. Stores without slots forget every key.
    fn clear(&mut self, slot: Slot) -> Result<(), StoreError>;

    /// Look up a key by ID.
    fn find(&self, key_id: &KeyId) -> Option<SessionKey>;

    /// Make `slot` current and return its key, or `None` if it is empty.
    fn select(&mut self, slot: Slot) -> Result<Option<SessionKey>, StoreError>;

    /// Per-slot status. Empty for stores without slots.
    fn slot_status(&self) -> Vec<SlotReport>;
}
