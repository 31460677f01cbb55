//! Simulated point-to-point link between a host and a device.
//!
//! Both endpoints run the real engine and the real frame decoder. Frames are
//! encoded to bytes, optionally damaged, queued, and fed to the other side's
//! decoder when the test steps the link. Nothing happens in the background:
//! delivery order and timing are fully under the test's control.
//!
//! ```text
//!   host (initiator)                              device (responder)
//!   MemoryKeyTable + StaticAuth                   FlashKeyStore<MemoryFlash>
//!         │  Send ──> encode ──> faults ──> queue ──> decoder ──>  │
//!         │  <── decoder <── queue <── faults <── encode <── Send  │
//! ```

use std::{collections::VecDeque, time::Duration};

use lifilink_core::{
    AuthService, Command, Engine, EngineAction, EngineError, EngineEvent, Environment,
    FlashKeyStore, KeyStore, LinkConfig, LinkStats, MemoryFlash, MemoryKeyTable, NoAuth, Role,
    StaticAuth,
};
use lifilink_crypto::SessionKey;
use lifilink_proto::{Frame, FrameDecoder};
use rand::Rng;

use crate::sim_env::SimEnv;

/// Engine run by the simulated host.
pub type HostEngine = Engine<SimEnv, MemoryKeyTable, StaticAuth>;

/// Engine run by the simulated device.
pub type DeviceEngine = Engine<SimEnv, FlashKeyStore<MemoryFlash>, NoAuth>;

/// One end of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Initiator: key distribution and challenges.
    Host,
    /// Responder: flash key storage.
    Device,
}

impl Side {
    /// The opposite end.
    pub const fn other(self) -> Self {
        match self {
            Self::Host => Self::Device,
            Self::Device => Self::Host,
        }
    }
}

/// Damage applied to frames in flight. Rates are probabilities in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkFaults {
    /// Chance that a whole frame is lost.
    pub drop_rate: f64,
    /// Chance, per byte, that one bit is flipped.
    pub bit_flip_rate: f64,
    /// Chance that a burst of 1..=8 random bytes precedes a frame.
    pub noise_rate: f64,
}

impl LinkFaults {
    /// A perfect line.
    pub const NONE: Self = Self { drop_rate: 0.0, bit_flip_rate: 0.0, noise_rate: 0.0 };

    /// Ambient light interference: frequent noise, rare corruption, no loss.
    pub const NOISY: Self = Self { drop_rate: 0.0, bit_flip_rate: 0.001, noise_rate: 0.3 };
}

/// Engine plus decoder plus everything the engine produced.
#[derive(Debug)]
pub struct Endpoint<S: KeyStore, A: AuthService> {
    engine: Engine<SimEnv, S, A>,
    decoder: FrameDecoder,
    stats: LinkStats,
    outputs: Vec<EngineAction>,
    errors: Vec<EngineError>,
}

impl<S: KeyStore, A: AuthService> Endpoint<S, A> {
    fn new(engine: Engine<SimEnv, S, A>) -> Self {
        let decoder = FrameDecoder::new(engine.config().decoder());
        Self {
            engine,
            decoder,
            stats: LinkStats::default(),
            outputs: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// The engine.
    pub fn engine(&self) -> &Engine<SimEnv, S, A> {
        &self.engine
    }

    /// The engine, mutably (fault injection on its store).
    pub fn engine_mut(&mut self) -> &mut Engine<SimEnv, S, A> {
        &mut self.engine
    }

    /// Statistics.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Non-`Send` actions produced so far.
    pub fn outputs(&self) -> &[EngineAction] {
        &self.outputs
    }

    /// Drain the recorded actions.
    pub fn take_outputs(&mut self) -> Vec<EngineAction> {
        std::mem::take(&mut self.outputs)
    }

    /// Errors returned by the engine so far.
    pub fn errors(&self) -> &[EngineError] {
        &self.errors
    }

    fn handle(&mut self, event: EngineEvent) -> Vec<Frame> {
        let mut frames = Vec::new();
        match self.engine.handle(event, &mut self.stats) {
            Ok(actions) => {
                for action in actions {
                    match action {
                        EngineAction::Send(frame) => frames.push(frame),
                        other => self.outputs.push(other),
                    }
                }
            },
            Err(err) => {
                tracing::debug!(%err, role = ?self.engine.config().role, "event discarded");
                self.errors.push(err);
            },
        }
        frames
    }

    fn receive(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let now = self.engine_now();
        let mut frames = Vec::new();
        for result in self.decoder.feed(bytes, now) {
            let event = match result {
                Ok(frame) => EngineEvent::FrameReceived(frame),
                Err(err) => EngineEvent::FrameError(err),
            };
            frames.extend(self.handle(event));
        }
        frames
    }

    fn tick(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if let Some(err) = self.decoder.poll_timeout(self.engine_now()) {
            frames.extend(self.handle(EngineEvent::FrameError(err)));
        }
        frames.extend(self.handle(EngineEvent::Tick));
        frames
    }

    fn engine_now(&self) -> std::time::Instant {
        self.engine.env().now()
    }
}

/// Upper bound on deliveries per `run_until_idle`, against ping-pong loops.
const MAX_STEPS: usize = 10_000;

/// A host and a device joined by a simulated optical link.
#[derive(Debug)]
pub struct SimLink {
    env: SimEnv,
    host: Endpoint<MemoryKeyTable, StaticAuth>,
    device: Endpoint<FlashKeyStore<MemoryFlash>, NoAuth>,
    in_flight: VecDeque<(Side, Vec<u8>)>,
    sent: Vec<(Side, Frame)>,
    faults: LinkFaults,
    drop_next: Option<Side>,
}

impl SimLink {
    /// Link whose endpoints both start with `shared` (if any). The host's
    /// Auth issues `auth` keys in order.
    pub fn new(seed: u64, shared: Option<SessionKey>, auth: StaticAuth) -> Self {
        Self::with_configs(
            seed,
            shared,
            auth,
            LinkConfig::new(Role::Initiator),
            LinkConfig::new(Role::Responder),
        )
    }

    /// Like [`SimLink::new`] with explicit configurations.
    pub fn with_configs(
        seed: u64,
        shared: Option<SessionKey>,
        auth: StaticAuth,
        host_config: LinkConfig,
        device_config: LinkConfig,
    ) -> Self {
        let env = SimEnv::with_seed(seed);

        let mut flash = FlashKeyStore::new(MemoryFlash::default());
        if let Some(key) = &shared {
            if let Err(err) = flash.store(key) {
                tracing::error!(%err, "initial flash write failed");
            }
        }
        let table = MemoryKeyTable::with_keys(shared);

        let host = Endpoint::new(Engine::new(env.fork(), host_config, table, auth));
        let device = Endpoint::new(Engine::new(env.fork(), device_config, flash, NoAuth));

        Self {
            env,
            host,
            device,
            in_flight: VecDeque::new(),
            sent: Vec::new(),
            faults: LinkFaults::NONE,
            drop_next: None,
        }
    }

    /// Damage frames in flight from now on.
    #[must_use]
    pub fn with_faults(mut self, faults: LinkFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Change fault settings mid-run.
    pub fn set_faults(&mut self, faults: LinkFaults) {
        self.faults = faults;
    }

    /// Shared environment (clock and fault RNG).
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Host endpoint.
    pub fn host(&self) -> &Endpoint<MemoryKeyTable, StaticAuth> {
        &self.host
    }

    /// Host endpoint, mutably.
    pub fn host_mut(&mut self) -> &mut Endpoint<MemoryKeyTable, StaticAuth> {
        &mut self.host
    }

    /// Device endpoint.
    pub fn device(&self) -> &Endpoint<FlashKeyStore<MemoryFlash>, NoAuth> {
        &self.device
    }

    /// Device endpoint, mutably.
    pub fn device_mut(&mut self) -> &mut Endpoint<FlashKeyStore<MemoryFlash>, NoAuth> {
        &mut self.device
    }

    /// Every frame either side has sent, in order, before any damage.
    pub fn sent_frames(&self) -> &[(Side, Frame)] {
        &self.sent
    }

    /// Frames queued and not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Lose the next frame addressed to `to`.
    pub fn drop_next_to(&mut self, to: Side) {
        self.drop_next = Some(to);
    }

    /// Give `side` an operator command.
    pub fn command(&mut self, side: Side, command: Command) {
        let frames = match side {
            Side::Host => self.host.handle(EngineEvent::Command(command)),
            Side::Device => self.device.handle(EngineEvent::Command(command)),
        };
        self.transmit(side, frames);
    }

    /// Put raw bytes on the line towards `to`, bypassing faults.
    pub fn inject(&mut self, to: Side, bytes: impl Into<Vec<u8>>) {
        self.in_flight.push_back((to, bytes.into()));
    }

    /// Deliver one queued transmission. Returns false if nothing was queued.
    pub fn step(&mut self) -> bool {
        let Some((to, bytes)) = self.in_flight.pop_front() else {
            return false;
        };
        let replies = match to {
            Side::Host => self.host.receive(&bytes),
            Side::Device => self.device.receive(&bytes),
        };
        self.transmit(to, replies);
        true
    }

    /// Deliver until the line is quiet. Returns the number of deliveries.
    pub fn run_until_idle(&mut self) -> usize {
        let mut steps = 0;
        while steps < MAX_STEPS && self.step() {
            steps += 1;
        }
        steps
    }

    /// Move the clock forward, then tick both endpoints and deliver whatever
    /// that produced.
    pub fn advance(&mut self, by: Duration) {
        self.env.advance(by);
        let frames = self.host.tick();
        self.transmit(Side::Host, frames);
        let frames = self.device.tick();
        self.transmit(Side::Device, frames);
        self.run_until_idle();
    }

    /// Power-cycle the device: RAM state is lost, flash contents survive.
    pub fn power_cycle_device(&mut self) {
        let flash = self.device.engine().store().device().clone();
        let config = self.device.engine().config().clone();
        let engine = Engine::new(self.env.fork(), config, FlashKeyStore::new(flash), NoAuth);
        tracing::info!(key_id = ?engine.active_key_id(), "device rebooted");

        let stats = self.device.stats.clone();
        self.device = Endpoint::new(engine);
        self.device.stats = stats;
    }

    fn transmit(&mut self, from: Side, frames: Vec<Frame>) {
        let to = from.other();
        for frame in frames {
            let mut bytes = match frame.to_bytes() {
                Ok(bytes) => bytes.to_vec(),
                Err(err) => {
                    tracing::error!(%err, "unencodable frame");
                    continue;
                },
            };
            self.sent.push((from, frame));

            if self.drop_next == Some(to) {
                self.drop_next = None;
                tracing::debug!(?to, "frame dropped on request");
                continue;
            }

            let faults = self.faults;
            let lost = self.env.with_rng(|rng| {
                if rng.gen_bool(clamp(faults.drop_rate)) {
                    return true;
                }
                for byte in &mut bytes {
                    if rng.gen_bool(clamp(faults.bit_flip_rate)) {
                        *byte ^= 1 << rng.gen_range(0..8u8);
                    }
                }
                if rng.gen_bool(clamp(faults.noise_rate)) {
                    let len = rng.gen_range(1..=8usize);
                    let mut burst: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
                    burst.append(&mut bytes);
                    bytes = burst;
                }
                false
            });

            if lost {
                tracing::debug!(?to, "frame lost");
                continue;
            }
            self.in_flight.push_back((to, bytes));
        }
    }
}

fn clamp(rate: f64) -> f64 {
    if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) }
}
