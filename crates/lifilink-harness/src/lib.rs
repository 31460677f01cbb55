//! Deterministic simulation harness for the LiFi secure link.
//!
//! Runs a host engine and a device engine against each other over a
//! simulated optical link with a virtual clock and a seeded RNG. Same seed,
//! same run: every fault, salt and challenge is reproducible.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation. Operations are
//! applied to both the model and a [`SimLink`], and their observable states
//! are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod sim_env;
pub mod sim_link;

pub use model::{ModelLink, ObservableState, Operation, SmallText};
pub use sim_env::SimEnv;
pub use sim_link::{DeviceEngine, Endpoint, HostEngine, LinkFaults, Side, SimLink};
