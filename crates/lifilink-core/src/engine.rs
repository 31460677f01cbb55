//! Link engine and handshake state machine.
//!
//! One `Engine` drives one link. It is a pure state machine: the caller feeds
//! it [`EngineEvent`]s and executes the returned [`EngineAction`]s. Deadlines
//! are compared against [`Environment::now`], never slept on.
//!
//! # Handshake
//!
//! ```text
//!                 "new key" (cooldown ok)
//!   Idle ──────────────────────────────> WaitingForRotationConfirm
//!    │  ^                                        │ "yes"
//!    │  │ ACK / timeout        stage + send KEY  v
//!    │  └──────────────── WaitingForRotationAck <─── "new key -f" (from Idle)
//!    │
//!    │ "verify key"                        HMAC response / timeout
//!    └──────────> WaitingForChallengeResponse ──────────────────────> Idle
//! ```
//!
//! # Invariants
//!
//! - A nonce enters the replay window only after its frame authenticated.
//! - `pending_key` and `pending_challenge` exist only in their wait states
//!   and are wiped on the way back to `Idle`.
//! - Any change of active key re-draws the nonce salt.

use std::time::{Duration, Instant};

use bytes::Bytes;
use lifilink_crypto::{
    AuthFailure, CryptoError, KeyId, SessionKey, decrypt, encrypt, hmac_sha256, verify_hmac,
};
use lifilink_proto::{
    Frame, FrameError, MsgType,
    payloads::{
        EncryptedPayload, KeyProvisioning, MIN_ENCRYPTED_LEN, key_id_frame, parse_challenge,
        parse_key_id,
    },
};
use zeroize::Zeroizing;

use crate::{
    auth::AuthService,
    config::{LinkConfig, Role},
    env::Environment,
    error::EngineError,
    keystore::{KeyStore, Slot, SlotReport},
    nonce::NonceGenerator,
    record::{self, Record},
    replay::ReplayWindow,
    stats::LinkStats,
};

/// Handshake state. Terminal state is always `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// No handshake in progress.
    Idle,
    /// A `new key` request was accepted; waiting for `yes`.
    WaitingForRotationConfirm,
    /// A provisioning frame was sent; waiting for the peer's ACK.
    WaitingForRotationAck,
    /// A challenge was sent; waiting for the HMAC response.
    WaitingForChallengeResponse,
}

/// Payload class of delivered application data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Encrypted text or command record.
    Text,
    /// Encrypted file contents (still compressed, if the sender compressed).
    File,
}

/// How a key became active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Received in a provisioning frame.
    Provisioned,
    /// Committed by a rotation ACK.
    Rotation,
    /// Resolved from a peer's key-ID announcement.
    Broadcast,
    /// Selected from a flash slot.
    Slot,
}

impl KeySource {
    /// Whether activation consumes a new key from the deployment's supply.
    const fn is_new_key(self) -> bool {
        matches!(self, Self::Provisioned | Self::Rotation | Self::Broadcast)
    }
}

/// Operator commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Encrypt and send text (this also carries control records such as
    /// `new key` from the responder).
    SendText(Vec<u8>),
    /// Encrypt and send file contents as a `FILE` frame.
    SendFile(Vec<u8>),
    /// Challenge the peer to prove it holds the MAC key.
    VerifyKey,
    /// Announce the active key ID in the clear.
    SendKeyId,
    /// Erase one key slot.
    ClearSlot(Slot),
    /// Erase both key slots.
    ClearAllSlots,
    /// Switch to the key in a slot (or to no key if it is empty).
    UseSlot(Slot),
    /// Report slot contents.
    SlotStatus,
    /// Reset link statistics (keys-consumed survives).
    ResetStats,
}

/// Input to the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The decoder produced a valid frame.
    FrameReceived(Frame),
    /// The decoder reported a framing fault.
    FrameError(FrameError),
    /// Periodic clock check.
    Tick,
    /// Operator command.
    Command(Command),
}

/// Output of the engine, executed or rendered by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Write this frame to the transport.
    Send(Frame),
    /// Authenticated application data.
    Delivered {
        /// Frame class it arrived in.
        kind: PayloadKind,
        /// Decrypted bytes.
        plaintext: Vec<u8>,
    },
    /// A rotation request was accepted; waiting for confirmation.
    RotationConfirmArmed,
    /// No confirmation arrived in time.
    RotationConfirmExpired,
    /// A new key was fetched and sent; waiting for ACK.
    RotationStaged {
        /// Pending key.
        key_id: KeyId,
    },
    /// The peer acknowledged; the pending key is now active.
    RotationCommitted {
        /// New active key.
        key_id: KeyId,
    },
    /// No ACK arrived in time; the pending key was wiped.
    RotationDiscarded {
        /// Discarded key.
        key_id: KeyId,
    },
    /// A rotation request arrived inside the cooldown.
    RateLimited {
        /// Time until requests are accepted again.
        retry_after: Duration,
    },
    /// A challenge was sent.
    ChallengeSent,
    /// A received challenge was answered.
    ChallengeAnswered,
    /// The peer proved possession of the MAC key.
    ChallengeVerified,
    /// The peer's response did not match.
    ChallengeFailed,
    /// The peer did not respond in time.
    ChallengeTimedOut,
    /// A key became active.
    KeyActivated {
        /// Active key.
        key_id: KeyId,
        /// Where it came from.
        source: KeySource,
    },
    /// The active key was removed; encrypted traffic is refused until a new
    /// one arrives.
    KeyCleared,
    /// Slot report requested by [`Command::SlotStatus`].
    SlotStatus(Vec<SlotReport>),
}

/// Handshake state plus the secrets that only live while it is not `Idle`.
#[derive(Debug)]
struct Handshake {
    state: HandshakeState,
    deadline: Option<Instant>,
    pending_key: Option<SessionKey>,
    pending_challenge: Option<Zeroizing<Vec<u8>>>,
}

impl Handshake {
    const fn idle() -> Self {
        Self { state: HandshakeState::Idle, deadline: None, pending_key: None, pending_challenge: None }
    }

    fn enter(&mut self, state: HandshakeState, deadline: Instant) {
        self.state = state;
        self.deadline = Some(deadline);
    }

    /// Back to `Idle`, dropping (and thereby zeroizing) pending secrets.
    fn reset(&mut self) {
        *self = Self::idle();
    }

    fn pending_for_ack(&self) -> Option<&SessionKey> {
        match self.state {
            HandshakeState::WaitingForRotationAck => self.pending_key.as_ref(),
            _ => None,
        }
    }
}

/// Session protocol engine for one link.
///
/// # Type Parameters
///
/// - `E`: time and randomness
/// - `S`: key storage (flash slots on the device, a table on the host)
/// - `A`: Auth collaborator
pub struct Engine<E: Environment, S: KeyStore, A: AuthService> {
    env: E,
    config: LinkConfig,
    store: S,
    auth: A,
    active: Option<SessionKey>,
    handshake: Handshake,
    replay: ReplayWindow,
    nonces: NonceGenerator,
    last_rotation_request: Option<Instant>,
}

impl<E: Environment, S: KeyStore, A: AuthService> Engine<E, S, A> {
    /// Create an engine, loading the current key from `store`.
    pub fn new(env: E, config: LinkConfig, mut store: S, auth: A) -> Self {
        let active = store.load();
        let nonces = NonceGenerator::new(&env);
        let replay = ReplayWindow::new(config.replay_capacity);

        tracing::info!(
            role = ?config.role,
            key_id = ?active.as_ref().map(SessionKey::key_id),
            "engine started"
        );

        Self {
            env,
            config,
            store,
            auth,
            active,
            handshake: Handshake::idle(),
            replay,
            nonces,
            last_rotation_request: None,
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        self.handshake.state
    }

    /// Deadline of the current handshake wait, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.handshake.deadline
    }

    /// ID of the active key.
    pub fn active_key_id(&self) -> Option<KeyId> {
        self.active.as_ref().map(SessionKey::key_id)
    }

    /// ID of the key staged for rotation.
    pub fn pending_key_id(&self) -> Option<KeyId> {
        self.handshake.pending_key.as_ref().map(SessionKey::key_id)
    }

    /// Environment the engine reads time and randomness from.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Link configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Key store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Key store, mutably.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Auth collaborator.
    pub fn auth(&self) -> &A {
        &self.auth
    }

    /// Replay window.
    pub fn replay_window(&self) -> &ReplayWindow {
        &self.replay
    }

    /// Nonce generator (exposed for exhaustion tests and diagnostics).
    pub fn nonce_generator_mut(&mut self) -> &mut NonceGenerator {
        &mut self.nonces
    }

    /// Process one event.
    ///
    /// Expired handshake deadlines are handled first, so a late ACK or
    /// response can never complete a handshake that already timed out.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the event was discarded. Only
    /// `EngineError::NonceExhaustion` is fatal (see
    /// [`EngineError::is_fatal`]).
    pub fn handle(
        &mut self,
        event: EngineEvent,
        stats: &mut LinkStats,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let mut actions = self.expire_handshake(stats);

        let result = match event {
            EngineEvent::Tick => Ok(Vec::new()),
            EngineEvent::FrameReceived(frame) => self.handle_frame(frame, stats),
            EngineEvent::FrameError(err) => {
                Self::handle_frame_error(&err, stats);
                Ok(Vec::new())
            },
            EngineEvent::Command(command) => self.handle_command(command, stats),
        };

        match result {
            Ok(more) => {
                actions.extend(more);
                Ok(actions)
            },
            Err(err) if actions.is_empty() || err.is_fatal() => Err(err),
            Err(err) => {
                tracing::warn!(%err, "event discarded after handshake expiry");
                Ok(actions)
            },
        }
    }

    fn expire_handshake(&mut self, stats: &mut LinkStats) -> Vec<EngineAction> {
        let Some(deadline) = self.handshake.deadline else {
            return Vec::new();
        };
        if self.env.now() < deadline {
            return Vec::new();
        }

        stats.handshake_timeouts += 1;
        let state = self.handshake.state;
        let pending = self.pending_key_id();
        self.handshake.reset();

        let action = match (state, pending) {
            (HandshakeState::WaitingForRotationConfirm, _) => {
                tracing::info!("rotation confirmation timed out");
                EngineAction::RotationConfirmExpired
            },
            (HandshakeState::WaitingForRotationAck, Some(key_id)) => {
                tracing::warn!(%key_id, "no ACK for staged key, keeping previous key");
                EngineAction::RotationDiscarded { key_id }
            },
            (HandshakeState::WaitingForChallengeResponse, _) => {
                tracing::warn!("challenge timed out");
                EngineAction::ChallengeTimedOut
            },
            _ => return Vec::new(),
        };
        vec![action]
    }

    fn handle_frame_error(err: &FrameError, stats: &mut LinkStats) {
        match err {
            FrameError::BadSync { skipped } => {
                stats.bad_preambles += 1;
                tracing::debug!(skipped, "resynchronized");
            },
            FrameError::Timeout { field } => {
                stats.timeouts += 1;
                tracing::debug!(%field, "frame read timed out");
            },
            FrameError::Crc { .. } => {
                stats.crc_failures += 1;
                tracing::warn!(%err, "frame dropped");
            },
            FrameError::PayloadTooLarge { .. }
            | FrameError::UnknownType(_)
            | FrameError::Malformed { .. } => {
                stats.malformed_frames += 1;
                tracing::warn!(%err, "frame dropped");
            },
        }
    }

    fn handle_frame(
        &mut self,
        frame: Frame,
        stats: &mut LinkStats,
    ) -> Result<Vec<EngineAction>, EngineError> {
        stats.packets_received += 1;

        match (frame.msg_type, self.config.role) {
            (MsgType::Encrypted | MsgType::File, _) => self.handle_encrypted(&frame, stats),
            (MsgType::KeyIdOnly, Role::Initiator) => self.handle_key_id(&frame, stats),
            (MsgType::Response, Role::Initiator) => self.handle_raw_response(&frame),
            (MsgType::Key, Role::Responder) => self.handle_provisioning(&frame, stats),
            (MsgType::Challenge, Role::Responder) => self.answer_challenge(&frame, stats),
            (msg_type, role) => {
                tracing::warn!(?msg_type, ?role, "frame class not consumed by this role");
                Err(EngineError::UnexpectedFrame { msg_type, role })
            },
        }
    }

    fn handle_encrypted(
        &mut self,
        frame: &Frame,
        stats: &mut LinkStats,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let kind = match frame.msg_type {
            MsgType::File => PayloadKind::File,
            _ => PayloadKind::Text,
        };
        let payload = EncryptedPayload::parse(frame.msg_type, &frame.payload)
            .map_err(|err| malformed(err, stats))?;

        if self.replay.seen(&payload.nonce) {
            stats.replays_blocked += 1;
            tracing::warn!(nonce = %hex::encode(payload.nonce), "replay blocked");
            return Err(EngineError::ReplayDetected { nonce: payload.nonce });
        }

        let (plaintext, under_pending) = match self.open(&payload) {
            Ok(opened) => opened,
            Err(err) => {
                if matches!(err, EngineError::AuthFailure(_)) {
                    stats.decrypt_failures += 1;
                    tracing::warn!("decryption failed");
                }
                return Err(err);
            },
        };

        self.replay.record(payload.nonce);
        stats.decrypt_success += 1;

        if kind == PayloadKind::File {
            return Ok(vec![EngineAction::Delivered { kind, plaintext }]);
        }

        if under_pending {
            if Record::parse(&plaintext) == Record::Ack {
                return self.commit_rotation(stats);
            }
            return Ok(vec![EngineAction::Delivered { kind, plaintext }]);
        }

        match self.config.role {
            Role::Initiator => self.dispatch_record(plaintext, stats),
            Role::Responder => Ok(vec![EngineAction::Delivered { kind, plaintext }]),
        }
    }

    /// Decrypt under the active key, then under the pending key while an
    /// ACK is awaited. Returns the plaintext and whether the pending key
    /// opened it.
    fn open(&self, payload: &EncryptedPayload) -> Result<(Vec<u8>, bool), EngineError> {
        let pending = self.handshake.pending_for_ack();
        if self.active.is_none() && pending.is_none() {
            return Err(EngineError::KeyUnavailable { reason: "no active session key" });
        }

        let candidates = self.active.iter().map(|k| (k, false)).chain(pending.map(|k| (k, true)));
        for (key, is_pending) in candidates {
            if let Ok(plaintext) = decrypt(key, &payload.nonce, &payload.ciphertext, &payload.tag)
            {
                return Ok((plaintext, is_pending));
            }
        }
        Err(EngineError::AuthFailure(AuthFailure))
    }

    fn dispatch_record(
        &mut self,
        plaintext: Vec<u8>,
        stats: &mut LinkStats,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let state = self.handshake.state;
        match Record::parse(&plaintext) {
            Record::NewKey => self.request_rotation(stats),
            Record::NewKeyForced => self.stage_rotation(),
            Record::Confirm if state == HandshakeState::WaitingForRotationConfirm => {
                self.stage_rotation()
            },
            Record::Ack if state == HandshakeState::WaitingForRotationAck => {
                self.commit_rotation(stats)
            },
            Record::VerifyKey => self.start_challenge(),
            Record::HmacResponse(hex) if state == HandshakeState::WaitingForChallengeResponse => {
                match hex::decode(hex) {
                    Ok(tag) => Ok(self.finish_challenge(&tag)),
                    Err(err) => {
                        stats.malformed_responses += 1;
                        tracing::warn!(%err, "challenge reply is not valid hex");
                        Ok(self.finish_challenge(&[]))
                    },
                }
            },
            _ => Ok(vec![EngineAction::Delivered { kind: PayloadKind::Text, plaintext }]),
        }
    }

    fn request_rotation(&mut self, stats: &mut LinkStats) -> Result<Vec<EngineAction>, EngineError> {
        let now = self.env.now();
        if let Some(last) = self.last_rotation_request {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.config.rotation_cooldown {
                stats.rate_limited += 1;
                let retry_after = self.config.rotation_cooldown - elapsed;
                tracing::info!(?retry_after, "rotation request rate limited");
                return Ok(vec![EngineAction::RateLimited { retry_after }]);
            }
        }
        if self.handshake.state != HandshakeState::Idle {
            return Err(EngineError::Busy { state: self.handshake.state });
        }

        self.last_rotation_request = Some(now);
        self.handshake.enter(
            HandshakeState::WaitingForRotationConfirm,
            now + self.config.handshake_timeout,
        );
        tracing::info!("rotation requested, waiting for confirmation");
        Ok(vec![EngineAction::RotationConfirmArmed])
    }

    /// Fetch a fresh key from Auth, send it, and wait for the ACK.
    fn stage_rotation(&mut self) -> Result<Vec<EngineAction>, EngineError> {
        match self.handshake.state {
            HandshakeState::Idle | HandshakeState::WaitingForRotationConfirm => {},
            state => return Err(EngineError::Busy { state }),
        }

        let key = self
            .auth
            .fetch_new()?
            .into_iter()
            .next()
            .ok_or(EngineError::KeyUnavailable { reason: "auth returned no keys" })?;
        if key.key_size() != self.config.key_size {
            return Err(EngineError::KeySizeMismatch {
                expected: self.config.key_size,
                actual: key.key_size(),
            });
        }

        let frame = KeyProvisioning {
            key_id: *key.key_id().as_bytes(),
            cipher_key: key.cipher_key(),
            mac_key: key.mac_key().map(|k| &k[..]),
        }
        .to_frame();
        let key_id = key.key_id();

        self.handshake.reset();
        self.handshake.pending_key = Some(key);
        self.handshake.enter(
            HandshakeState::WaitingForRotationAck,
            self.env.now() + self.config.handshake_timeout,
        );

        tracing::info!(%key_id, "new key sent, waiting for ACK");
        Ok(vec![EngineAction::Send(frame), EngineAction::RotationStaged { key_id }])
    }

    fn commit_rotation(&mut self, stats: &mut LinkStats) -> Result<Vec<EngineAction>, EngineError> {
        let Some(key) = self.handshake.pending_key.take() else {
            return Err(EngineError::KeyUnavailable { reason: "no pending key" });
        };
        self.handshake.reset();

        if let Err(err) = self.store.store(&key) {
            tracing::error!(%err, "failed to persist rotated key, keeping previous key");
            return Err(err.into());
        }

        let key_id = key.key_id();
        let activated = self.activate(key, KeySource::Rotation, stats);
        self.auth.key_confirmed(&key_id);
        tracing::info!(%key_id, "rotation committed");
        Ok(vec![EngineAction::RotationCommitted { key_id }, activated])
    }

    fn start_challenge(&mut self) -> Result<Vec<EngineAction>, EngineError> {
        if self.config.role != Role::Initiator {
            return Err(EngineError::WrongRole { op: "challenge", role: self.config.role });
        }
        if self.handshake.state != HandshakeState::Idle {
            return Err(EngineError::Busy { state: self.handshake.state });
        }
        let key = self
            .active
            .as_ref()
            .ok_or(EngineError::KeyUnavailable { reason: "no active session key" })?;
        if key.mac_key().is_none() {
            return Err(CryptoError::MissingMacKey.into());
        }

        let mut challenge = Zeroizing::new(vec![0u8; self.config.challenge_size]);
        self.env.random_bytes(&mut challenge);
        let frame = Frame::new(MsgType::Challenge, Bytes::copy_from_slice(&challenge));

        self.handshake.pending_challenge = Some(challenge);
        self.handshake.enter(
            HandshakeState::WaitingForChallengeResponse,
            self.env.now() + self.config.handshake_timeout,
        );

        tracing::info!("challenge sent");
        Ok(vec![EngineAction::Send(frame), EngineAction::ChallengeSent])
    }

    fn finish_challenge(&mut self, tag: &[u8]) -> Vec<EngineAction> {
        let challenge = self.handshake.pending_challenge.take();
        self.handshake.reset();

        let mac_key = self.active.as_ref().and_then(SessionKey::mac_key);
        let verified = match (challenge, mac_key) {
            (Some(challenge), Some(mac_key)) => verify_hmac(mac_key, &challenge, tag).is_ok(),
            _ => false,
        };

        if verified {
            tracing::info!("challenge verified: peer holds the session key");
            vec![EngineAction::ChallengeVerified]
        } else {
            tracing::warn!("challenge failed: peer does not hold the session key");
            vec![EngineAction::ChallengeFailed]
        }
    }

    /// Legacy responders answer with a bare `RESPONSE` frame carrying the tag.
    fn handle_raw_response(&mut self, frame: &Frame) -> Result<Vec<EngineAction>, EngineError> {
        if self.handshake.state != HandshakeState::WaitingForChallengeResponse {
            return Err(EngineError::UnexpectedFrame {
                msg_type: frame.msg_type,
                role: self.config.role,
            });
        }
        Ok(self.finish_challenge(&frame.payload))
    }

    fn answer_challenge(
        &mut self,
        frame: &Frame,
        stats: &mut LinkStats,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let challenge = parse_challenge(&frame.payload, self.config.challenge_size)
            .map_err(|err| malformed(err, stats))?;
        let key = self
            .active
            .as_ref()
            .ok_or(EngineError::KeyUnavailable { reason: "no active session key" })?;
        let mac_key = key.mac_key().ok_or(CryptoError::MissingMacKey)?;

        let response = record::hmac_response(&hmac_sha256(mac_key, challenge));
        let frame = self.seal(MsgType::Encrypted, &response)?;

        tracing::info!("challenge answered");
        Ok(vec![EngineAction::Send(frame), EngineAction::ChallengeAnswered])
    }

    fn handle_provisioning(
        &mut self,
        frame: &Frame,
        stats: &mut LinkStats,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let provisioning =
            KeyProvisioning::parse(&frame.payload, self.config.key_size.byte_len())
                .map_err(|err| malformed(err, stats))?;
        let key = SessionKey::new(
            KeyId(provisioning.key_id),
            provisioning.cipher_key,
            provisioning.mac_key,
        )?;

        if let Err(err) = self.store.store(&key) {
            tracing::error!(%err, "failed to persist provisioned key, keeping previous key");
            return Err(err.into());
        }

        let activated = self.activate(key, KeySource::Provisioned, stats);
        let ack = self.seal(MsgType::Encrypted, record::ACK)?;
        Ok(vec![activated, EngineAction::Send(ack)])
    }

    fn handle_key_id(
        &mut self,
        frame: &Frame,
        stats: &mut LinkStats,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let key_id = KeyId(parse_key_id(&frame.payload).map_err(|err| malformed(err, stats))?);
        if self.active_key_id() == Some(key_id) {
            tracing::debug!(%key_id, "announced key already active");
            return Ok(Vec::new());
        }

        let key = if let Some(key) = self.store.find(&key_id) {
            key
        } else {
            let Some(key) = self.auth.fetch_by_id(&key_id)? else {
                tracing::warn!(%key_id, "announced key unknown");
                return Err(EngineError::KeyNotFound { key_id });
            };
            if key.key_size() != self.config.key_size {
                return Err(EngineError::KeySizeMismatch {
                    expected: self.config.key_size,
                    actual: key.key_size(),
                });
            }
            self.store.store(&key)?;
            key
        };

        let activated = self.activate(key, KeySource::Broadcast, stats);
        self.auth.key_confirmed(&key_id);
        Ok(vec![activated])
    }

    fn handle_command(
        &mut self,
        command: Command,
        stats: &mut LinkStats,
    ) -> Result<Vec<EngineAction>, EngineError> {
        match command {
            Command::SendText(text) => {
                Ok(vec![EngineAction::Send(self.seal(MsgType::Encrypted, &text)?)])
            },
            Command::SendFile(data) => {
                Ok(vec![EngineAction::Send(self.seal(MsgType::File, &data)?)])
            },
            Command::VerifyKey => self.start_challenge(),
            Command::SendKeyId => {
                let key_id = self
                    .active_key_id()
                    .ok_or(EngineError::KeyUnavailable { reason: "no active session key" })?;
                Ok(vec![EngineAction::Send(key_id_frame(key_id.0))])
            },
            Command::ClearSlot(slot) => self.clear_slots(&[slot]),
            Command::ClearAllSlots => self.clear_slots(&[Slot::A, Slot::B]),
            Command::UseSlot(slot) => self.use_slot(slot, stats),
            Command::SlotStatus => Ok(vec![EngineAction::SlotStatus(self.store.slot_status())]),
            Command::ResetStats => {
                stats.reset();
                Ok(Vec::new())
            },
        }
    }

    fn clear_slots(&mut self, slots: &[Slot]) -> Result<Vec<EngineAction>, EngineError> {
        let reports = self.store.slot_status();
        let active_id = self.active_key_id();
        let holds_active = |slot: Slot| {
            reports.is_empty()
                || reports.iter().any(|r| r.slot == slot && r.key_id.is_some() && r.key_id == active_id)
        };

        let mut cleared_active = false;
        for &slot in slots {
            cleared_active |= holds_active(slot);
            self.store.clear(slot)?;
        }

        if cleared_active && self.active.take().is_some() {
            self.nonces.rekey(&self.env);
            tracing::info!("active key cleared");
            return Ok(vec![EngineAction::KeyCleared]);
        }
        Ok(Vec::new())
    }

    fn use_slot(&mut self, slot: Slot, stats: &mut LinkStats) -> Result<Vec<EngineAction>, EngineError> {
        match self.store.select(slot)? {
            Some(key) if Some(key.key_id()) == self.active_key_id() => Ok(Vec::new()),
            Some(key) => Ok(vec![self.activate(key, KeySource::Slot, stats)]),
            None => {
                self.active = None;
                self.nonces.rekey(&self.env);
                tracing::info!(%slot, "switched to empty slot");
                Ok(vec![EngineAction::KeyCleared])
            },
        }
    }

    fn activate(&mut self, key: SessionKey, source: KeySource, stats: &mut LinkStats) -> EngineAction {
        let key_id = key.key_id();
        self.active = Some(key);
        self.nonces.rekey(&self.env);
        if source.is_new_key() {
            stats.keys_consumed += 1;
        }
        tracing::info!(%key_id, ?source, "key activated");
        EngineAction::KeyActivated { key_id, source }
    }

    /// Encrypt `plaintext` under the active key into a frame of `msg_type`.
    fn seal(&mut self, msg_type: MsgType, plaintext: &[u8]) -> Result<Frame, EngineError> {
        let key = self
            .active
            .as_ref()
            .ok_or(EngineError::KeyUnavailable { reason: "no active session key" })?;

        let len = MIN_ENCRYPTED_LEN + plaintext.len();
        if len > self.config.max_payload_len {
            return Err(FrameError::PayloadTooLarge { len, max: self.config.max_payload_len }.into());
        }

        let nonce = self.nonces.next_nonce()?;
        let (ciphertext, tag) = encrypt(key, &nonce, plaintext)?;
        Ok(EncryptedPayload { nonce, ciphertext: Bytes::from(ciphertext), tag }.into_frame(msg_type))
    }
}

impl<E: Environment, S: KeyStore + std::fmt::Debug, A: AuthService + std::fmt::Debug> std::fmt::Debug
    for Engine<E, S, A>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("role", &self.config.role)
            .field("state", &self.handshake.state)
            .field("active", &self.active)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

fn malformed(err: FrameError, stats: &mut LinkStats) -> EngineError {
    stats.malformed_frames += 1;
    tracing::warn!(%err, "malformed payload");
    err.into()
}
