//! In-memory key table for the host endpoint.

use lifilink_crypto::{KeyId, SessionKey};

use super::{KeyStore, Slot, SlotReport, StoreError};

/// Keys known to the host, most recently stored last.
#[derive(Debug, Default)]
pub struct MemoryKeyTable {
    keys: Vec<SessionKey>,
}

impl MemoryKeyTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table pre-populated with `keys`; the last one is current.
    pub fn with_keys(keys: impl IntoIterator<Item = SessionKey>) -> Self {
        let mut table = Self::new();
        for key in keys {
            table.insert(key);
        }
        table
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no keys are held.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// All keys, oldest first.
    pub fn keys(&self) -> &[SessionKey] {
        &self.keys
    }

    fn insert(&mut self, key: SessionKey) {
        self.keys.retain(|k| k.key_id() != key.key_id());
        self.keys.push(key);
    }
}

impl KeyStore for MemoryKeyTable {
    fn load(&mut self) -> Option<SessionKey> {
        self.keys.last().cloned()
    }

    fn store(&mut self, key: &SessionKey) -> Result<(), StoreError> {
        self.insert(key.clone());
        Ok(())
    }

    fn clear(&mut self, _slot: Slot) -> Result<(), StoreError> {
        self.keys.clear();
        Ok(())
    }

    fn find(&self, key_id: &KeyId) -> Option<SessionKey> {
        self.keys.iter().find(|k| k.key_id() == *key_id).cloned()
    }

    fn select(&mut self, _slot: Slot) -> Result<Option<SessionKey>, StoreError> {
        Err(StoreError::Unsupported { op: "slot selection" })
    }

    fn slot_status(&self) -> Vec<SlotReport> {
        Vec::new()
    }
}
