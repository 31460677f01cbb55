//! Dual-slot flash key store.
//!
//! # Layout
//!
//! ```text
//! block 0: slot A  FlashKeyBlock
//! block 1: slot B  FlashKeyBlock
//! block 2: index   SlotIndexRecord
//! ```
//!
//! A slot is valid iff its magic matches and its SHA-256 integrity hash
//! covers the stored key ID and key material. Erased or corrupt slots are
//! indistinguishable from empty ones.
//!
//! # Write protocol
//!
//! `store` writes the slot that does not hold the current valid key (erase,
//! program, read back and compare), and only then repoints the index. A power
//! loss at any point leaves at least the previous key intact.

use std::mem::size_of;

use lifilink_crypto::{KeyId, SessionKey, sha256, tags_equal};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::little_endian::U32,
};
use zeroize::{Zeroize, Zeroizing};

use super::{KeyStore, Slot, SlotReport, StoreError};

/// `"SESS"`, marks a programmed key slot.
const KEY_MAGIC: u32 = 0x5345_5353;

/// Marks a programmed index record.
const INDEX_MAGIC: u8 = 0xA5;

/// Value of an erased flash byte.
const ERASED: u8 = 0xFF;

/// Block holding the `active_slot` record.
const INDEX_BLOCK: usize = 2;

/// Bytes of a slot actually used by the key record.
pub const KEY_RECORD_LEN: usize = size_of::<FlashKeyBlock>();

/// Offset of the integrity hash inside a slot.
pub const KEY_HASH_OFFSET: usize = KEY_RECORD_LEN - 32;

/// Erase/program/read access to fixed-size flash blocks.
///
/// Programming writes from the start of the block. Reads fill `buf` from
/// the start of the block.
pub trait BlockDevice {
    /// Size of one erase unit in bytes.
    fn block_size(&self) -> usize;

    /// Erase `block` to all `0xFF`.
    fn erase(&mut self, block: usize) -> Result<(), StoreError>;

    /// Program `data` at the start of `block`.
    fn program(&mut self, block: usize, data: &[u8]) -> Result<(), StoreError>;

    /// Read `buf.len()` bytes from the start of `block`.
    fn read(&self, block: usize, buf: &mut [u8]) -> Result<(), StoreError>;
}

/// On-flash key slot record.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct FlashKeyBlock {
    magic: U32,
    key_id: [u8; 8],
    cipher_len: u8,
    has_mac: u8,
    reserved: [u8; 2],
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
    hash: [u8; 32],
}

impl FlashKeyBlock {
    fn from_key(key: &SessionKey) -> Self {
        let cipher = key.cipher_key();
        let mut block = Self {
            magic: U32::new(KEY_MAGIC),
            key_id: *key.key_id().as_bytes(),
            // cipher keys are 16 or 32 bytes
            cipher_len: u8::try_from(cipher.len()).unwrap_or(0),
            has_mac: u8::from(key.mac_key().is_some()),
            reserved: [0; 2],
            cipher_key: [0; 32],
            mac_key: key.mac_key().copied().unwrap_or([0; 32]),
            hash: [0; 32],
        };
        block.cipher_key[..cipher.len()].copy_from_slice(cipher);
        block.hash = block.integrity();
        block
    }

    fn cipher(&self) -> Option<&[u8]> {
        match self.cipher_len {
            16 | 32 => Some(&self.cipher_key[..usize::from(self.cipher_len)]),
            _ => None,
        }
    }

    fn mac(&self) -> Option<Option<&[u8]>> {
        match self.has_mac {
            0 => Some(None),
            1 => Some(Some(&self.mac_key[..])),
            _ => None,
        }
    }

    fn integrity(&self) -> [u8; 32] {
        let cipher = self.cipher().unwrap_or(&[]);
        let mac = self.mac().flatten().unwrap_or(&[]);
        sha256(&[&self.key_id[..], &[self.cipher_len, self.has_mac][..], cipher, mac])
    }

    fn to_key(&self) -> Option<SessionKey> {
        if self.magic.get() != KEY_MAGIC {
            return None;
        }
        let cipher = self.cipher()?;
        let mac = self.mac()?;
        if !tags_equal(&self.integrity(), &self.hash) {
            return None;
        }
        SessionKey::new(KeyId(self.key_id), cipher, mac).ok()
    }
}

impl Drop for FlashKeyBlock {
    fn drop(&mut self) {
        self.cipher_key.zeroize();
        self.mac_key.zeroize();
    }
}

/// On-flash `active_slot` record.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct SlotIndexRecord {
    magic: u8,
    slot: u8,
    check: u8,
    reserved: u8,
}

impl SlotIndexRecord {
    fn new(slot: Slot) -> Self {
        Self { magic: INDEX_MAGIC, slot: slot.index(), check: !slot.index(), reserved: 0 }
    }

    fn slot(&self) -> Option<Slot> {
        if self.magic != INDEX_MAGIC || self.check != !self.slot {
            return None;
        }
        Slot::from_index(self.slot)
    }
}

fn slot_block(slot: Slot) -> usize {
    usize::from(slot.index())
}

/// Key store over two flash slots and an index record.
#[derive(Debug)]
pub struct FlashKeyStore<D: BlockDevice> {
    device: D,
    /// Slot selected by the index record, valid or not.
    active: Option<Slot>,
}

impl<D: BlockDevice> FlashKeyStore<D> {
    /// Wrap a device. Call [`KeyStore::load`] to pick up persisted state.
    pub fn new(device: D) -> Self {
        Self { device, active: None }
    }

    /// Currently selected slot.
    pub fn active_slot(&self) -> Option<Slot> {
        self.active
    }

    /// Underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Underlying device, mutably (fault injection in tests).
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Give the device back, e.g. to simulate a power cycle.
    pub fn into_device(self) -> D {
        self.device
    }

    fn read_slot(&self, slot: Slot) -> Option<SessionKey> {
        let mut buf = Zeroizing::new(vec![0u8; KEY_RECORD_LEN]);
        if let Err(err) = self.device.read(slot_block(slot), &mut buf) {
            tracing::warn!(%slot, %err, "slot read failed");
            return None;
        }
        FlashKeyBlock::read_from_bytes(&buf).ok()?.to_key()
    }

    fn read_index(&self) -> Option<Slot> {
        let mut buf = [0u8; size_of::<SlotIndexRecord>()];
        self.device.read(INDEX_BLOCK, &mut buf).ok()?;
        SlotIndexRecord::read_from_bytes(&buf).ok()?.slot()
    }

    fn write_verified(&mut self, block: usize, data: &[u8]) -> Result<(), StoreError> {
        self.device.erase(block)?;
        self.device.program(block, data)?;

        let mut readback = Zeroizing::new(vec![0u8; data.len()]);
        self.device.read(block, &mut readback)?;
        if readback.as_slice() != data {
            tracing::error!(block, "flash readback mismatch");
            return Err(StoreError::Verify { block });
        }
        Ok(())
    }

    fn write_index(&mut self, slot: Slot) -> Result<(), StoreError> {
        self.write_verified(INDEX_BLOCK, SlotIndexRecord::new(slot).as_bytes())
    }

    /// Slot that may be overwritten without losing the current key.
    fn store_target(&self) -> Slot {
        match self.active {
            Some(slot) if self.read_slot(slot).is_some() => slot.other(),
            Some(slot) => slot,
            None if self.read_slot(Slot::A).is_some() => Slot::B,
            None => Slot::A,
        }
    }
}

impl<D: BlockDevice> KeyStore for FlashKeyStore<D> {
    fn load(&mut self) -> Option<SessionKey> {
        if let Some(slot) = self.read_index() {
            if let Some(key) = self.read_slot(slot) {
                self.active = Some(slot);
                tracing::info!(%slot, key_id = %key.key_id(), "loaded key from indexed slot");
                return Some(key);
            }
            tracing::warn!(%slot, "indexed slot invalid, scanning");
        }

        for slot in [Slot::B, Slot::A] {
            if let Some(key) = self.read_slot(slot) {
                self.active = Some(slot);
                tracing::info!(%slot, key_id = %key.key_id(), "loaded key from slot scan");
                return Some(key);
            }
        }

        self.active = None;
        None
    }

    fn store(&mut self, key: &SessionKey) -> Result<(), StoreError> {
        let target = self.store_target();
        let record = FlashKeyBlock::from_key(key);

        self.write_verified(slot_block(target), record.as_bytes())?;
        self.write_index(target)?;
        self.active = Some(target);

        tracing::info!(slot = %target, key_id = %key.key_id(), "key stored");
        Ok(())
    }

    fn clear(&mut self, slot: Slot) -> Result<(), StoreError> {
        let block = slot_block(slot);
        self.device.erase(block)?;

        let mut readback = vec![0u8; self.device.block_size()];
        self.device.read(block, &mut readback)?;
        if readback.iter().any(|&b| b != ERASED) {
            return Err(StoreError::NotErased { block });
        }

        tracing::info!(%slot, "slot cleared");
        Ok(())
    }

    fn find(&self, key_id: &KeyId) -> Option<SessionKey> {
        [Slot::B, Slot::A]
            .into_iter()
            .filter_map(|slot| self.read_slot(slot))
            .find(|key| key.key_id() == *key_id)
    }

    fn select(&mut self, slot: Slot) -> Result<Option<SessionKey>, StoreError> {
        // An empty slot is only selected in RAM; the index keeps pointing at
        // the last valid key so a power cycle restores it.
        let key = self.read_slot(slot);
        if key.is_some() {
            self.write_index(slot)?;
        }
        self.active = Some(slot);
        Ok(key)
    }

    fn slot_status(&self) -> Vec<SlotReport> {
        [Slot::A, Slot::B]
            .into_iter()
            .map(|slot| SlotReport {
                slot,
                key_id: self.read_slot(slot).map(|k| k.key_id()),
                active: self.active == Some(slot),
            })
            .collect()
    }
}

/// Pending fault for the next device operation.
#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    fail_erase: bool,
    fail_program: bool,
    corrupt_program: bool,
}

/// RAM-backed NOR flash with fault injection.
///
/// Programming can only clear bits, as on real NOR flash, so programming a
/// block without erasing it first corrupts the data.
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    blocks: Vec<Vec<u8>>,
    block_size: usize,
    faults: Faults,
}

impl MemoryFlash {
    /// Device with `block_count` erased blocks of `block_size` bytes.
    pub fn new(block_count: usize, block_size: usize) -> Self {
        Self {
            blocks: vec![vec![ERASED; block_size]; block_count],
            block_size,
            faults: Faults::default(),
        }
    }

    /// Make the next erase fail.
    pub fn fail_next_erase(&mut self) {
        self.faults.fail_erase = true;
    }

    /// Make the next program fail without touching the block.
    pub fn fail_next_program(&mut self) {
        self.faults.fail_program = true;
    }

    /// Make the next program silently flip a bit, so readback verification
    /// fails.
    pub fn corrupt_next_program(&mut self) {
        self.faults.corrupt_program = true;
    }

    /// Flip the low bit of one stored byte.
    pub fn corrupt_byte(&mut self, block: usize, offset: usize) {
        if let Some(byte) = self.blocks.get_mut(block).and_then(|b| b.get_mut(offset)) {
            *byte ^= 0x01;
        }
    }

    /// Raw contents of `block`.
    pub fn block(&self, block: usize) -> Option<&[u8]> {
        self.blocks.get(block).map(Vec::as_slice)
    }
}

impl Default for MemoryFlash {
    /// Two key slots and an index block of 4 KiB sectors.
    fn default() -> Self {
        Self::new(3, 4096)
    }
}

impl BlockDevice for MemoryFlash {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn erase(&mut self, block: usize) -> Result<(), StoreError> {
        if std::mem::take(&mut self.faults.fail_erase) {
            return Err(StoreError::Device { op: "erase", block });
        }
        let cells = self.blocks.get_mut(block).ok_or(StoreError::Device { op: "erase", block })?;
        cells.fill(ERASED);
        Ok(())
    }

    fn program(&mut self, block: usize, data: &[u8]) -> Result<(), StoreError> {
        if std::mem::take(&mut self.faults.fail_program) {
            return Err(StoreError::Device { op: "program", block });
        }
        let cells = self
            .blocks
            .get_mut(block)
            .filter(|cells| data.len() <= cells.len())
            .ok_or(StoreError::Device { op: "program", block })?;

        for (cell, &byte) in cells.iter_mut().zip(data) {
            *cell &= byte;
        }
        if std::mem::take(&mut self.faults.corrupt_program) {
            if let Some(first) = cells.first_mut() {
                *first ^= 0x80;
            }
        }
        Ok(())
    }

    fn read(&self, block: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        let cells = self
            .blocks
            .get(block)
            .filter(|cells| buf.len() <= cells.len())
            .ok_or(StoreError::Device { op: "read", block })?;
        buf.copy_from_slice(&cells[..buf.len()]);
        Ok(())
    }
}
