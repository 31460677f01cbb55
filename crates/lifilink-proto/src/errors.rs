//! Framing errors.
//!
//! Every variant is recoverable: the decoder resynchronizes on the next sync
//! word and the link keeps running.

use thiserror::Error;

use crate::frame::MsgType;

/// Field of the frame being read when a timeout fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameField {
    /// Message type byte.
    Type,
    /// Two-byte length.
    Length,
    /// Payload bytes.
    Payload,
    /// Two-byte CRC trailer.
    Crc,
}

impl std::fmt::Display for FrameField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Type => "type",
            Self::Length => "length",
            Self::Payload => "payload",
            Self::Crc => "crc",
        };
        f.write_str(name)
    }
}

/// Errors produced while encoding, decoding or interpreting frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Bytes were discarded before a sync word was found.
    #[error("skipped {skipped} bytes before sync word")]
    BadSync {
        /// Number of bytes that were not part of any sync word.
        skipped: usize,
    },

    /// Declared payload length exceeds the protocol maximum.
    #[error("payload length {len} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared (or attempted) payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A field was not completed before its read deadline.
    #[error("timed out reading frame {field}")]
    Timeout {
        /// Field being read when the deadline passed.
        field: FrameField,
    },

    /// Trailer does not match the checksum of the received bytes.
    #[error("crc mismatch: computed {computed:#06x}, received {received:#06x}")]
    Crc {
        /// CRC computed over the received bytes.
        computed: u16,
        /// CRC carried in the trailer.
        received: u16,
    },

    /// Message type byte is not one this deployment defines.
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),

    /// Payload does not have the layout its message type requires.
    #[error("malformed {msg_type:?} payload: {reason}")]
    Malformed {
        /// Message class of the offending frame.
        msg_type: MsgType,
        /// What was wrong.
        reason: &'static str,
    },
}

impl FrameError {
    /// Returns true if this error was a read deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
