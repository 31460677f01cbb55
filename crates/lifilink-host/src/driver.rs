//! Async link driver.
//!
//! Owns the frame decoder and the engine, and connects them to a byte-duplex
//! transport (a serial device, a TCP bridge, an in-memory pipe in tests).
//! The driver only does I/O; every protocol decision is the engine's.
//!
//! # Loop
//!
//! ```text
//! transport bytes ──> FrameDecoder ──> Engine ──> Send ──> transport
//! operator command ─────────────────> Engine ──> other ──> outputs
//! tick ──> decoder deadlines + Engine::Tick
//! ```
//!
//! Field read deadlines are enforced by the decoder against the
//! environment's clock; the tick only makes sure they are checked while the
//! line is silent.

use std::time::Duration;

use lifilink_core::{
    AuthService, Command, Engine, EngineAction, EngineError, EngineEvent, Environment, KeyStore,
    LinkStats,
};
use lifilink_proto::{FrameDecoder, FrameError};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

use crate::error::HostError;

/// Default interval between ticks.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// Transport read buffer size.
const READ_CHUNK: usize = 512;

/// Runs one engine against one transport.
pub struct LinkDriver<E: Environment, S: KeyStore, A: AuthService> {
    env: E,
    engine: Engine<E, S, A>,
    decoder: FrameDecoder,
    stats: LinkStats,
    tick: Duration,
}

impl<E: Environment, S: KeyStore, A: AuthService> LinkDriver<E, S, A> {
    /// Wrap `engine`. The decoder is configured from the engine's link
    /// configuration.
    pub fn new(engine: Engine<E, S, A>) -> Self {
        let env = engine.env().clone();
        let decoder = FrameDecoder::new(engine.config().decoder());
        Self { env, engine, decoder, stats: LinkStats::default(), tick: DEFAULT_TICK }
    }

    /// Override the tick interval.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Link statistics so far.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &Engine<E, S, A> {
        &self.engine
    }

    /// Feed received bytes through the decoder and the engine.
    ///
    /// # Errors
    ///
    /// - `HostError::Engine` only for fatal engine errors
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<Vec<EngineAction>, HostError> {
        let mut actions = Vec::new();
        for result in self.decoder.feed(bytes, self.env.now()) {
            let event = match result {
                Ok(frame) => EngineEvent::FrameReceived(frame),
                Err(err) => EngineEvent::FrameError(err),
            };
            actions.extend(self.dispatch(event)?);
        }
        Ok(actions)
    }

    /// Check decoder deadlines, then let the engine check its own.
    ///
    /// # Errors
    ///
    /// - `HostError::Engine` only for fatal engine errors
    pub fn on_tick(&mut self) -> Result<Vec<EngineAction>, HostError> {
        let mut actions = Vec::new();
        if let Some(err) = self.decoder.poll_timeout(self.env.now()) {
            actions.extend(self.dispatch(EngineEvent::FrameError(err))?);
        }
        actions.extend(self.dispatch(EngineEvent::Tick)?);
        Ok(actions)
    }

    /// Run an operator command.
    ///
    /// # Errors
    ///
    /// - `HostError::Engine` only for fatal engine errors
    pub fn on_command(&mut self, command: Command) -> Result<Vec<EngineAction>, HostError> {
        self.dispatch(EngineEvent::Command(command))
    }

    fn dispatch(&mut self, event: EngineEvent) -> Result<Vec<EngineAction>, HostError> {
        match self.engine.handle(event, &mut self.stats) {
            Ok(actions) => Ok(actions),
            Err(err) if err.is_fatal() => {
                tracing::error!(%err, "fatal engine error");
                Err(err.into())
            },
            Err(err) => {
                log_discarded(&err);
                Ok(Vec::new())
            },
        }
    }

    /// Drive the link until the transport closes or `commands` is closed.
    ///
    /// Non-`Send` actions are forwarded to `outputs`; a closed `outputs`
    /// channel is not an error.
    ///
    /// # Errors
    ///
    /// - `HostError::Io` if the transport fails
    /// - `HostError::Engine` on a fatal engine error
    pub async fn run<R, W>(
        mut self,
        mut reader: R,
        mut writer: W,
        mut commands: mpsc::Receiver<Command>,
        outputs: mpsc::Sender<EngineAction>,
    ) -> Result<LinkStats, HostError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let env = self.env.clone();
        let tick = env.sleep(self.tick);
        tokio::pin!(tick);
        let mut buf = [0u8; READ_CHUNK];

        tracing::info!(role = ?self.engine.config().role, "link driver started");

        loop {
            let actions = tokio::select! {
                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        tracing::info!("transport closed");
                        break;
                    }
                    self.on_bytes(&buf[..n])?
                },
                command = commands.recv() => {
                    let Some(command) = command else {
                        tracing::info!("command channel closed");
                        break;
                    };
                    self.on_command(command)?
                },
                () = &mut tick => {
                    tick.set(env.sleep(self.tick));
                    self.on_tick()?
                },
            };

            for action in actions {
                match action {
                    EngineAction::Send(frame) => {
                        let bytes = frame.to_bytes().map_err(EngineError::Frame)?;
                        writer.write_all(&bytes).await?;
                        writer.flush().await?;
                    },
                    other => {
                        if outputs.send(other).await.is_err() {
                            tracing::debug!("output receiver dropped");
                        }
                    },
                }
            }
        }

        tracing::info!(stats = ?self.stats, "link driver stopped");
        Ok(self.stats)
    }
}

fn log_discarded(err: &EngineError) {
    match err {
        EngineError::Frame(FrameError::Malformed { .. })
        | EngineError::AuthFailure(_)
        | EngineError::ReplayDetected { .. } => {
            tracing::warn!(%err, "frame discarded");
        },
        _ => tracing::info!(%err, "event discarded"),
    }
}
