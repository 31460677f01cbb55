//! LiFi secure link host binary.
//!
//! # Usage
//!
//! ```bash
//! # Put ten fresh keys in the local pool (bench setup without Auth)
//! lifilink-host --key-cache keys.cbor generate-keys --count 10
//!
//! # Run the link over a serial device (configure the baud rate with stty)
//! lifilink-host --device /dev/ttyUSB0 --key-cache keys.cbor
//! ```

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use lifilink_core::{Command, LinkConfig, Role};
use lifilink_crypto::KeySize;
use lifilink_host::{
    HostError, HostRuntimeConfig, KeyCache, LinkDriver, SystemEnv, build_engine,
    console::{self, ConsoleInput},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// LiFi secure link host
#[derive(Parser, Debug)]
#[command(name = "lifilink-host")]
#[command(about = "Host endpoint of the LiFi secure link")]
#[command(version)]
struct Args {
    /// Serial device carrying the link
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    device: PathBuf,

    /// Key cache file (CBOR)
    #[arg(short, long, default_value = "lifilink-keys.cbor")]
    key_cache: PathBuf,

    /// Which end of the link this host plays
    #[arg(long, value_enum, default_value_t = RoleArg::Initiator)]
    role: RoleArg,

    /// Session key size in bits
    #[arg(long, default_value_t = 256)]
    key_bits: u16,

    /// Seconds between accepted rotation requests
    #[arg(long, default_value_t = 15)]
    rotation_cooldown: u64,

    /// Seconds to wait for a handshake reply
    #[arg(long, default_value_t = 5)]
    handshake_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Subcmd>,
}

#[derive(Subcommand, Debug)]
enum Subcmd {
    /// Generate random keys into the cache's pool
    GenerateKeys {
        /// Number of keys
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RoleArg {
    Initiator,
    Responder,
}

impl Args {
    fn key_size(&self) -> Result<KeySize, HostError> {
        match self.key_bits {
            128 => Ok(KeySize::Aes128),
            256 => Ok(KeySize::Aes256),
            other => Err(HostError::Config(format!("key size must be 128 or 256, got {other}"))),
        }
    }

    fn runtime_config(&self) -> Result<HostRuntimeConfig, HostError> {
        let role = match self.role {
            RoleArg::Initiator => Role::Initiator,
            RoleArg::Responder => Role::Responder,
        };
        let link = LinkConfig {
            key_size: self.key_size()?,
            rotation_cooldown: Duration::from_secs(self.rotation_cooldown),
            handshake_timeout: Duration::from_secs(self.handshake_timeout),
            ..LinkConfig::new(role)
        };
        Ok(HostRuntimeConfig {
            device_path: self.device.clone(),
            key_cache_path: self.key_cache.clone(),
            link,
            ..HostRuntimeConfig::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if let Some(Subcmd::GenerateKeys { count }) = &args.command {
        let mut cache = KeyCache::open(&args.key_cache)?;
        let ids = cache.generate(&SystemEnv::new(), *count, args.key_size()?)?;
        cache.save()?;
        tracing::info!(count = ids.len(), pool = cache.pool_len(), "keys generated");
        return Ok(());
    }

    let config = args.runtime_config()?;
    let engine = build_engine(&config)?;

    tracing::info!(device = %config.device_path.display(), "opening link");
    let device =
        tokio::fs::OpenOptions::new().read(true).write(true).open(&config.device_path).await?;
    let (reader, writer) = tokio::io::split(device);

    let (command_tx, command_rx) = mpsc::channel(32);
    let (output_tx, mut output_rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(action) = output_rx.recv().await {
            if let Err(err) = console::show(&mut stdout, &action).await {
                tracing::warn!(%err, "console write failed");
            }
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let command = match console::parse_line(&line) {
                Ok(Some(ConsoleInput::Command(command))) => command,
                Ok(Some(ConsoleInput::SendFile(path))) => match tokio::fs::read(&path).await {
                    Ok(data) => Command::SendFile(data),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "cannot read file");
                        continue;
                    },
                },
                Ok(Some(ConsoleInput::Quit)) => break,
                Ok(None) => continue,
                Err(usage) => {
                    tracing::warn!("{usage}");
                    continue;
                },
            };
            if command_tx.send(command).await.is_err() {
                break;
            }
        }
    });

    let stats = LinkDriver::new(engine)
        .with_tick(config.tick)
        .run(reader, writer, command_rx, output_tx)
        .await?;

    tracing::info!(
        received = stats.packets_received,
        decrypted = stats.decrypt_success,
        failures = stats.decrypt_failures,
        replays = stats.replays_blocked,
        keys_consumed = stats.keys_consumed,
        "link closed"
    );

    Ok(())
}
