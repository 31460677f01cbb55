//! Wire format for the LiFi secure link protocol.
//!
//! The optical channel is a plain UART: no framing, no ordering, no error
//! detection. Everything needed to recover messages from that byte stream
//! lives here.
//!
//! # Frame layout
//!
//! ```text
//! +-------------+------+-----------+-------------------+-----------+
//! | SYNC        | TYPE | LEN (BE)  | PAYLOAD           | CRC16(BE) |
//! | AB CD EF 12 | 1 B  | 2 B       | LEN bytes         | 2 B       |
//! +-------------+------+-----------+-------------------+-----------+
//! ```
//!
//! The CRC is CRC-16/CCITT (poly `0x1021`, init `0xFFFF`) over
//! `TYPE ++ LEN ++ PAYLOAD`.
//!
//! # Components
//!
//! - [`Frame`] / [`MsgType`]: a validated frame and its message class
//! - [`FrameDecoder`]: byte-at-a-time, resynchronizing, time-bounded decoder
//! - [`payloads`]: typed views over the payload of each message class
//!
//! # Invariants
//!
//! - `LEN` is checked against the configured maximum before any payload
//!   buffer is allocated.
//! - A decoder error never leaves partial state behind: the next byte starts a
//!   fresh sync search.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod crc;
mod decoder;
mod errors;
mod frame;
pub mod payloads;

pub use crc::{Crc16, crc16_ccitt};
pub use decoder::{DecoderConfig, FrameDecoder};
pub use errors::{FrameError, FrameField};
pub use frame::{
    CRC_SIZE, Frame, HEADER_SIZE, MAX_PAYLOAD_LEN, MsgType, SYNC_SIZE, SYNC_WORD,
};
