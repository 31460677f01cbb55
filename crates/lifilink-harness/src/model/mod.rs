//! Reference model for model-based testing.
//!
//! The model captures what a link should do, without cryptography or
//! framing. It is the oracle the real simulated link is checked against.

mod operation;
mod world;

pub use operation::{Operation, SmallText, advance_secs};
pub use world::{ModelLink, ObservableState};
