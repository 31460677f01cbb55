//! Auth collaborator contract.
//!
//! Auth is the external key distribution service. The engine needs two
//! calls from it: a fresh key for rotation, and a key by ID when the peer
//! announces one the local store does not hold. It also reports back which
//! key both ends ended up on.

use std::collections::VecDeque;

use lifilink_crypto::{KeyId, SessionKey};
use thiserror::Error;

/// Errors from the Auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The service could not be reached or refused the request.
    #[error("auth unavailable: {reason}")]
    Unavailable {
        /// What went wrong.
        reason: String,
    },

    /// The service has no more keys to hand out.
    #[error("auth has no keys left")]
    Exhausted,
}

/// Key distribution service.
pub trait AuthService {
    /// Fetch new session keys for this link's entity. The first is used.
    fn fetch_new(&mut self) -> Result<Vec<SessionKey>, AuthError>;

    /// Look up a key by ID. `Ok(None)` means Auth answered but does not know
    /// the ID.
    fn fetch_by_id(&mut self, key_id: &KeyId) -> Result<Option<SessionKey>, AuthError>;

    /// The peer holds `key_id`: a rotation was ACKed or the peer announced
    /// it. Keys handed out by `fetch_new` are unconfirmed until this call.
    fn key_confirmed(&mut self, _key_id: &KeyId) {}
}

/// Auth backed by a fixed list of keys.
///
/// `fetch_new` hands keys out in order; `fetch_by_id` answers for every key
/// the service has ever held.
#[derive(Debug, Default)]
pub struct StaticAuth {
    fresh: VecDeque<SessionKey>,
    known: Vec<SessionKey>,
    confirmed: Option<KeyId>,
}

impl StaticAuth {
    /// Service that will issue `keys` in order.
    pub fn new(keys: impl IntoIterator<Item = SessionKey>) -> Self {
        let fresh: VecDeque<_> = keys.into_iter().collect();
        let known = fresh.iter().cloned().collect();
        Self { fresh, known, confirmed: None }
    }

    /// Make `key` resolvable by ID without issuing it as fresh.
    pub fn with_known(mut self, key: SessionKey) -> Self {
        self.known.push(key);
        self
    }

    /// Keys not yet issued.
    pub fn remaining(&self) -> usize {
        self.fresh.len()
    }

    /// Last key reported as held by the peer.
    pub fn confirmed(&self) -> Option<KeyId> {
        self.confirmed
    }
}

impl AuthService for StaticAuth {
    fn fetch_new(&mut self) -> Result<Vec<SessionKey>, AuthError> {
        self.fresh.pop_front().map(|key| vec![key]).ok_or(AuthError::Exhausted)
    }

    fn fetch_by_id(&mut self, key_id: &KeyId) -> Result<Option<SessionKey>, AuthError> {
        Ok(self.known.iter().find(|k| k.key_id() == *key_id).cloned())
    }

    fn key_confirmed(&mut self, key_id: &KeyId) {
        self.confirmed = Some(*key_id);
    }
}

/// Auth for endpoints that never talk to the service (the device).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl AuthService for NoAuth {
    fn fetch_new(&mut self) -> Result<Vec<SessionKey>, AuthError> {
        Err(AuthError::Unavailable { reason: "no auth service on this endpoint".to_string() })
    }

    fn fetch_by_id(&mut self, _key_id: &KeyId) -> Result<Option<SessionKey>, AuthError> {
        Err(AuthError::Unavailable { reason: "no auth service on this endpoint".to_string() })
    }
}
