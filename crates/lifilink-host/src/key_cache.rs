//! Local key cache.
//!
//! Keys issued by Auth for this host are kept in a CBOR file so a restarted
//! host can still resolve a device's key-ID broadcast without reaching Auth.
//! The file has two sections:
//!
//! - `known`: keys that have been handed out, searched by `fetch_by_id`
//! - `pool`: keys issued ahead of time, consumed in order by `fetch_new`
//! - `active`: ID of the last key the device confirmed holding
//!
//! Every mutation is written back before the key is returned, so a key is
//! never handed out twice across restarts.

use std::{
    collections::VecDeque,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use lifilink_core::{AuthError, AuthService, Environment};
use lifilink_crypto::{KEY_ID_SIZE, KeyId, KeySize, MAC_KEY_SIZE, SessionKey};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::HostError;

/// On-disk format version.
const CACHE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct CachedKey {
    key_id: [u8; KEY_ID_SIZE],
    cipher_key: Vec<u8>,
    mac_key: Option<Vec<u8>>,
}

impl From<&SessionKey> for CachedKey {
    fn from(key: &SessionKey) -> Self {
        Self {
            key_id: key.key_id().0,
            cipher_key: key.cipher_key().to_vec(),
            mac_key: key.mac_key().map(|k| k.to_vec()),
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct CacheFile {
    version: u32,
    known: Vec<CachedKey>,
    pool: Vec<CachedKey>,
    #[serde(default)]
    active: Option<[u8; KEY_ID_SIZE]>,
}

/// CBOR-backed key cache acting as the host's Auth collaborator.
#[derive(Debug)]
pub struct KeyCache {
    path: PathBuf,
    known: Vec<SessionKey>,
    pool: VecDeque<SessionKey>,
    active: Option<KeyId>,
}

impl KeyCache {
    /// Open the cache at `path`. A missing file is an empty cache.
    ///
    /// # Errors
    ///
    /// - `HostError::Cache` if the file exists but cannot be read or decoded,
    ///   has an unknown version, or holds a key with invalid lengths
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HostError> {
        let path = path.into();
        let file = match fs::read(&path) {
            Ok(bytes) => ciborium::de::from_reader::<CacheFile, _>(bytes.as_slice())
                .map_err(|e| cache_error(&path, e))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no key cache yet, starting empty");
                CacheFile { version: CACHE_VERSION, ..CacheFile::default() }
            },
            Err(err) => return Err(cache_error(&path, err)),
        };

        if file.version != CACHE_VERSION {
            return Err(cache_error(&path, format!("unsupported version {}", file.version)));
        }

        let decode = |entries: &[CachedKey]| -> Result<Vec<SessionKey>, HostError> {
            entries
                .iter()
                .map(|k| {
                    SessionKey::new(KeyId(k.key_id), &k.cipher_key, k.mac_key.as_deref())
                        .map_err(|e| cache_error(&path, e))
                })
                .collect()
        };
        let known = decode(&file.known)?;
        let pool = decode(&file.pool)?.into();

        let cache = Self { path, known, pool, active: file.active.map(KeyId) };
        tracing::info!(
            known = cache.known.len(),
            pool = cache.pool.len(),
            "key cache loaded"
        );
        Ok(cache)
    }

    /// Cache file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys handed out so far, oldest first.
    pub fn known_keys(&self) -> &[SessionKey] {
        &self.known
    }

    /// Last key the device confirmed, if it is still known.
    ///
    /// A key issued by `fetch_new` whose rotation was never ACKed is not
    /// returned here, so a restarted host does not start on a key the device
    /// never installed.
    pub fn active_key(&self) -> Option<&SessionKey> {
        let active = self.active?;
        self.known.iter().find(|k| k.key_id() == active)
    }

    /// Number of keys left in the pool.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Record `key` as known, replacing any entry with the same ID.
    pub fn remember(&mut self, key: SessionKey) {
        self.known.retain(|k| k.key_id() != key.key_id());
        self.known.push(key);
    }

    /// Append keys to the pool.
    pub fn add_to_pool(&mut self, keys: impl IntoIterator<Item = SessionKey>) {
        self.pool.extend(keys);
    }

    /// Generate `count` random keys of `size` into the pool.
    ///
    /// This makes the host its own key authority, which is what a bench
    /// setup without an Auth service needs.
    pub fn generate(
        &mut self,
        env: &impl Environment,
        count: usize,
        size: KeySize,
    ) -> Result<Vec<KeyId>, HostError> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let mut key_id = [0u8; KEY_ID_SIZE];
            let mut cipher = Zeroizing::new(vec![0u8; size.byte_len()]);
            let mut mac = Zeroizing::new([0u8; MAC_KEY_SIZE]);
            env.random_bytes(&mut key_id);
            env.random_bytes(&mut cipher);
            env.random_bytes(mac.as_mut_slice());

            let key = SessionKey::new(KeyId(key_id), &cipher, Some(mac.as_slice()))
                .map_err(|e| cache_error(&self.path, e))?;
            ids.push(key.key_id());
            self.pool.push_back(key);
        }
        Ok(ids)
    }

    /// Write the cache back to disk.
    ///
    /// The new contents go to a sibling temp file first and are renamed into
    /// place, so a crash never leaves a half-written cache.
    ///
    /// # Errors
    ///
    /// - `HostError::Cache` if encoding or any filesystem step fails
    pub fn save(&self) -> Result<(), HostError> {
        let file = CacheFile {
            version: CACHE_VERSION,
            known: self.known.iter().map(CachedKey::from).collect(),
            pool: self.pool.iter().map(CachedKey::from).collect(),
            active: self.active.map(|id| id.0),
        };

        let mut bytes = Zeroizing::new(Vec::new());
        ciborium::ser::into_writer(&file, &mut *bytes).map_err(|e| cache_error(&self.path, e))?;

        let tmp = self.path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let mut out = fs::File::create(&tmp)?;
            out.write_all(&bytes)?;
            out.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| cache_error(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), "key cache saved");
        Ok(())
    }
}

impl AuthService for KeyCache {
    fn fetch_new(&mut self) -> Result<Vec<SessionKey>, AuthError> {
        let Some(key) = self.pool.pop_front() else {
            return Err(AuthError::Exhausted);
        };
        self.remember(key.clone());

        if let Err(err) = self.save() {
            // Put it back so the pool stays consistent with the file.
            self.known.retain(|k| k.key_id() != key.key_id());
            self.pool.push_front(key);
            return Err(AuthError::Unavailable { reason: err.to_string() });
        }

        tracing::info!(key_id = %key.key_id(), remaining = self.pool.len(), "issued key from pool");
        Ok(vec![key])
    }

    fn fetch_by_id(&mut self, key_id: &KeyId) -> Result<Option<SessionKey>, AuthError> {
        Ok(self.known.iter().find(|k| k.key_id() == *key_id).cloned())
    }

    fn key_confirmed(&mut self, key_id: &KeyId) {
        if self.active == Some(*key_id) {
            return;
        }
        self.active = Some(*key_id);
        // The link already runs on this key; a stale marker only costs a
        // key-ID broadcast after restart.
        if let Err(err) = self.save() {
            tracing::warn!(%key_id, %err, "could not persist active key");
        }
    }
}

fn cache_error(path: &Path, err: impl std::fmt::Display) -> HostError {
    HostError::Cache { path: path.to_path_buf(), reason: err.to_string() }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::SystemEnv;

    fn key(n: u8) -> SessionKey {
        SessionKey::new(KeyId([n; 8]), &[n; 32], Some(&[n; 32])).unwrap()
    }

    #[test]
    fn missing_file_is_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KeyCache::open(dir.path().join("keys.cbor")).unwrap();

        assert!(cache.known_keys().is_empty());
        assert_eq!(cache.pool_len(), 0);
    }

    #[test]
    fn pool_keys_survive_restart_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.cbor");

        let mut cache = KeyCache::open(&path).unwrap();
        cache.add_to_pool([key(1), key(2)]);
        cache.save().unwrap();

        let issued = cache.fetch_new().unwrap();
        assert_eq!(issued[0].key_id(), KeyId([1; 8]));

        let mut reopened = KeyCache::open(&path).unwrap();
        assert_eq!(reopened.pool_len(), 1);
        assert_eq!(reopened.known_keys(), &[key(1)]);
        assert_eq!(reopened.fetch_by_id(&KeyId([1; 8])).unwrap(), Some(key(1)));
        assert_eq!(reopened.fetch_new().unwrap()[0].key_id(), KeyId([2; 8]));
        assert_eq!(reopened.fetch_new(), Err(AuthError::Exhausted));
    }

    #[test]
    fn only_confirmed_key_is_active_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.cbor");

        let mut cache = KeyCache::open(&path).unwrap();
        cache.add_to_pool([key(1), key(2)]);
        cache.fetch_new().unwrap();
        cache.key_confirmed(&KeyId([1; 8]));

        // Issued but never ACKed.
        cache.fetch_new().unwrap();

        let reopened = KeyCache::open(&path).unwrap();
        assert_eq!(reopened.known_keys().len(), 2);
        assert_eq!(reopened.active_key(), Some(&key(1)));
    }

    #[test]
    fn issued_key_is_not_active_until_confirmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.cbor");

        let mut cache = KeyCache::open(&path).unwrap();
        cache.add_to_pool([key(1)]);
        cache.fetch_new().unwrap();
        assert!(cache.active_key().is_none());

        let mut reopened = KeyCache::open(&path).unwrap();
        assert!(reopened.active_key().is_none());
        assert_eq!(reopened.fetch_by_id(&KeyId([1; 8])).unwrap(), Some(key(1)));
    }

    #[test]
    fn unknown_id_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = KeyCache::open(dir.path().join("keys.cbor")).unwrap();
        cache.remember(key(1));

        assert_eq!(cache.fetch_by_id(&KeyId([9; 8])).unwrap(), None);
    }

    #[test]
    fn generated_keys_have_requested_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = KeyCache::open(dir.path().join("keys.cbor")).unwrap();

        let ids = cache.generate(&SystemEnv::new(), 3, KeySize::Aes128).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(cache.pool_len(), 3);

        let key = cache.fetch_new().unwrap().remove(0);
        assert_eq!(key.key_size(), KeySize::Aes128);
        assert!(key.mac_key().is_some());
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.cbor");
        fs::write(&path, b"\xFF\x00 not cbor").unwrap();

        assert!(matches!(KeyCache::open(&path), Err(HostError::Cache { .. })));
    }
}
