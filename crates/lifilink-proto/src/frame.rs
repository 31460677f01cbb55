//! Frame type and encoder.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{crc::Crc16, errors::FrameError};

/// Sync word that opens every frame.
pub const SYNC_WORD: [u8; 4] = [0xAB, 0xCD, 0xEF, 0x12];

/// Size of the sync word.
pub const SYNC_SIZE: usize = SYNC_WORD.len();

/// Bytes between the sync word and the payload (type + length).
pub const HEADER_SIZE: usize = 3;

/// Size of the CRC trailer.
pub const CRC_SIZE: usize = 2;

/// Protocol-wide maximum payload length.
pub const MAX_PAYLOAD_LEN: usize = 8192;

/// Message class carried in the frame's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    /// `NONCE(12) | CIPHERTEXT | TAG(16)` application record.
    Encrypted = 0x02,
    /// Random challenge for HMAC device authentication.
    Challenge = 0x04,
    /// Raw HMAC response (legacy; current responders answer through an
    /// encrypted record).
    Response = 0x05,
    /// Encrypted record whose plaintext is a compressed file.
    File = 0x06,
    /// Plaintext announcement of the sender's active key ID.
    KeyIdOnly = 0x07,
    /// Key provisioning: `KEY_ID(8) | CIPHER_KEY | [MAC_KEY(32)]`.
    Key = 0x10,
}

impl MsgType {
    /// Wire value.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Self::Encrypted),
            0x04 => Some(Self::Challenge),
            0x05 => Some(Self::Response),
            0x06 => Some(Self::File),
            0x07 => Some(Self::KeyIdOnly),
            0x10 => Some(Self::Key),
            _ => None,
        }
    }

    /// Returns true for classes whose payload is an AEAD record.
    pub const fn is_encrypted(self) -> bool {
        matches!(self, Self::Encrypted | Self::File)
    }
}

impl TryFrom<u8> for MsgType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(FrameError::UnknownType(value))
    }
}

/// A validated frame.
///
/// Holding a `Frame` means the sync word, length bound and CRC all checked
/// out (when decoded) or will be produced correctly (when encoded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message class.
    pub msg_type: MsgType,
    /// Payload bytes (no trailer).
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame.
    pub fn new(msg_type: MsgType, payload: impl Into<Bytes>) -> Self {
        Self { msg_type, payload: payload.into() }
    }

    /// Total encoded size including sync word and trailer.
    pub fn encoded_len(&self) -> usize {
        SYNC_SIZE + HEADER_SIZE + self.payload.len() + CRC_SIZE
    }

    /// Append the wire encoding of this frame to `dst`.
    ///
    /// Every frame class carries the CRC trailer.
    ///
    /// # Errors
    ///
    /// - `FrameError::PayloadTooLarge` if the payload exceeds
    ///   [`MAX_PAYLOAD_LEN`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), FrameError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge { len, max: MAX_PAYLOAD_LEN });
        }
        let len_bytes = u16::try_from(len)
            .map_err(|_| FrameError::PayloadTooLarge { len, max: MAX_PAYLOAD_LEN })?
            .to_be_bytes();

        let mut crc = Crc16::new();
        crc.update_byte(self.msg_type.to_u8());
        crc.update(&len_bytes);
        crc.update(&self.payload);

        dst.put_slice(&SYNC_WORD);
        dst.put_u8(self.msg_type.to_u8());
        dst.put_slice(&len_bytes);
        dst.put_slice(&self.payload);
        dst.put_u16(crc.finish());
        Ok(())
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}
