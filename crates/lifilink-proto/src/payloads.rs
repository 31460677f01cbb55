//! Typed payload layouts for each message class.
//!
//! Parsers borrow from the frame payload where possible so key material is
//! not copied until it reaches zeroizing storage.

use bytes::{BufMut, Bytes, BytesMut};
pub use lifilink_crypto::{KEY_ID_SIZE, MAC_KEY_SIZE, NONCE_SIZE, TAG_SIZE};

use crate::{
    errors::FrameError,
    frame::{Frame, MsgType},
};

/// Smallest valid encrypted payload (empty plaintext).
pub const MIN_ENCRYPTED_LEN: usize = NONCE_SIZE + TAG_SIZE;

/// Encrypted application record: `NONCE(12) | CIPHERTEXT(N) | TAG(16)`.
///
/// Carried by both [`MsgType::Encrypted`] and [`MsgType::File`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Per-message GCM IV.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext, same length as the plaintext.
    pub ciphertext: Bytes,
    /// GCM authentication tag.
    pub tag: [u8; TAG_SIZE],
}

impl EncryptedPayload {
    /// Split a frame payload into nonce, ciphertext and tag.
    ///
    /// # Errors
    ///
    /// - `FrameError::Malformed` if the payload is shorter than
    ///   [`MIN_ENCRYPTED_LEN`]
    pub fn parse(msg_type: MsgType, payload: &Bytes) -> Result<Self, FrameError> {
        if payload.len() < MIN_ENCRYPTED_LEN {
            return Err(FrameError::Malformed {
                msg_type,
                reason: "shorter than nonce and tag",
            });
        }

        let tag_start = payload.len() - TAG_SIZE;
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&payload[..NONCE_SIZE]);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&payload[tag_start..]);

        Ok(Self { nonce, ciphertext: payload.slice(NONCE_SIZE..tag_start), tag })
    }

    /// Serialize to the wire layout.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MIN_ENCRYPTED_LEN + self.ciphertext.len());
        buf.put_slice(&self.nonce);
        buf.put_slice(&self.ciphertext);
        buf.put_slice(&self.tag);
        buf.freeze()
    }

    /// Wrap in a frame of the given class.
    pub fn into_frame(self, msg_type: MsgType) -> Frame {
        Frame::new(msg_type, self.to_bytes())
    }
}

/// Key provisioning record: `KEY_ID(8) | CIPHER_KEY | [MAC_KEY(32)]`.
///
/// The cipher key length is fixed per deployment, so parsing needs it to
/// tell an absent MAC key from a size mismatch.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyProvisioning<'a> {
    /// Identifier of the key being provisioned.
    pub key_id: [u8; KEY_ID_SIZE],
    /// AEAD key bytes.
    pub cipher_key: &'a [u8],
    /// Optional HMAC key.
    pub mac_key: Option<&'a [u8]>,
}

impl<'a> KeyProvisioning<'a> {
    /// Parse a provisioning payload for a deployment using
    /// `cipher_key_len`-byte keys.
    ///
    /// # Errors
    ///
    /// - `FrameError::Malformed` if the length is neither
    ///   `8 + cipher_key_len` nor `8 + cipher_key_len + 32`
    pub fn parse(payload: &'a [u8], cipher_key_len: usize) -> Result<Self, FrameError> {
        let bare = KEY_ID_SIZE + cipher_key_len;
        let with_mac = bare + MAC_KEY_SIZE;
        if payload.len() != bare && payload.len() != with_mac {
            return Err(FrameError::Malformed {
                msg_type: MsgType::Key,
                reason: "key size does not match deployment",
            });
        }

        let mut key_id = [0u8; KEY_ID_SIZE];
        key_id.copy_from_slice(&payload[..KEY_ID_SIZE]);
        let cipher_key = &payload[KEY_ID_SIZE..bare];
        let mac_key = (payload.len() == with_mac).then(|| &payload[bare..]);

        Ok(Self { key_id, cipher_key, mac_key })
    }

    /// Build the provisioning frame.
    pub fn to_frame(&self) -> Frame {
        let len = KEY_ID_SIZE + self.cipher_key.len() + self.mac_key.map_or(0, <[u8]>::len);
        let mut buf = BytesMut::with_capacity(len);
        buf.put_slice(&self.key_id);
        buf.put_slice(self.cipher_key);
        if let Some(mac_key) = self.mac_key {
            buf.put_slice(mac_key);
        }
        Frame::new(MsgType::Key, buf.freeze())
    }
}

impl std::fmt::Debug for KeyProvisioning<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyProvisioning")
            .field("key_id", &self.key_id)
            .field("cipher_key", &format!("<redacted {} bytes>", self.cipher_key.len()))
            .field("mac_key", &self.mac_key.map(|k| format!("<redacted {} bytes>", k.len())))
            .finish()
    }
}

/// Parse a plaintext key-ID announcement.
///
/// # Errors
///
/// - `FrameError::Malformed` unless the payload is exactly 8 bytes
pub fn parse_key_id(payload: &[u8]) -> Result<[u8; KEY_ID_SIZE], FrameError> {
    payload.try_into().map_err(|_| FrameError::Malformed {
        msg_type: MsgType::KeyIdOnly,
        reason: "key id must be 8 bytes",
    })
}

/// Build a plaintext key-ID announcement frame.
pub fn key_id_frame(key_id: [u8; KEY_ID_SIZE]) -> Frame {
    Frame::new(MsgType::KeyIdOnly, Bytes::copy_from_slice(&key_id))
}

/// Check a challenge payload against the configured challenge size.
///
/// # Errors
///
/// - `FrameError::Malformed` if the length differs from `expected_len`
pub fn parse_challenge(payload: &[u8], expected_len: usize) -> Result<&[u8], FrameError> {
    if payload.len() != expected_len {
        return Err(FrameError::Malformed {
            msg_type: MsgType::Challenge,
            reason: "challenge size mismatch",
        });
    }
    Ok(payload)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_payload_split() {
        let mut raw = vec![1u8; NONCE_SIZE];
        raw.extend_from_slice(b"cipher");
        raw.extend_from_slice(&[2u8; TAG_SIZE]);
        let raw = Bytes::from(raw);

        let parsed = EncryptedPayload::parse(MsgType::Encrypted, &raw).unwrap();
        assert_eq!(parsed.nonce, [1; NONCE_SIZE]);
        assert_eq!(parsed.ciphertext.as_ref(), b"cipher");
        assert_eq!(parsed.tag, [2; TAG_SIZE]);
        assert_eq!(parsed.to_bytes(), raw);
    }

    #[test]
    fn cipher_output_fits_encrypted_layout() {
        let key =
            lifilink_crypto::SessionKey::new(lifilink_crypto::KeyId([1; KEY_ID_SIZE]), &[1; 16], None)
                .unwrap();
        let nonce = [6u8; NONCE_SIZE];
        let (ciphertext, tag) = lifilink_crypto::encrypt(&key, &nonce, b"lamp on").unwrap();

        let wire =
            EncryptedPayload { nonce, ciphertext: Bytes::from(ciphertext), tag }.to_bytes();
        assert_eq!(wire.len(), MIN_ENCRYPTED_LEN + b"lamp on".len());

        let parsed = EncryptedPayload::parse(MsgType::Encrypted, &wire).unwrap();
        let plaintext =
            lifilink_crypto::decrypt(&key, &parsed.nonce, &parsed.ciphertext, &parsed.tag).unwrap();
        assert_eq!(plaintext, b"lamp on");
    }

    #[test]
    fn encrypted_payload_too_short() {
        let raw = Bytes::from(vec![0u8; MIN_ENCRYPTED_LEN - 1]);
        let err = EncryptedPayload::parse(MsgType::File, &raw).unwrap_err();
        assert!(matches!(err, FrameError::Malformed { msg_type: MsgType::File, .. }));
    }

    #[test]
    fn empty_ciphertext_allowed() {
        let raw = Bytes::from(vec![0u8; MIN_ENCRYPTED_LEN]);
        let parsed = EncryptedPayload::parse(MsgType::Encrypted, &raw).unwrap();
        assert!(parsed.ciphertext.is_empty());
    }

    #[test]
    fn provisioning_with_and_without_mac() {
        let mut raw = vec![9u8; KEY_ID_SIZE];
        raw.extend_from_slice(&[3u8; 32]);

        let bare = KeyProvisioning::parse(&raw, 32).unwrap();
        assert_eq!(bare.key_id, [9; KEY_ID_SIZE]);
        assert_eq!(bare.cipher_key, &[3u8; 32]);
        assert!(bare.mac_key.is_none());

        raw.extend_from_slice(&[4u8; MAC_KEY_SIZE]);
        let full = KeyProvisioning::parse(&raw, 32).unwrap();
        assert_eq!(full.mac_key, Some(&[4u8; MAC_KEY_SIZE][..]));
        assert_eq!(full.to_frame().payload.as_ref(), raw.as_slice());
    }

    #[test]
    fn provisioning_size_mismatch_rejected() {
        let mut raw = vec![9u8; KEY_ID_SIZE];
        raw.extend_from_slice(&[3u8; 16]);
        assert!(KeyProvisioning::parse(&raw, 32).is_err());
        assert!(KeyProvisioning::parse(&raw, 16).is_ok());
    }

    #[test]
    fn provisioning_debug_redacts_keys() {
        let raw = [7u8; KEY_ID_SIZE + 16 + MAC_KEY_SIZE];
        let parsed = KeyProvisioning::parse(&raw, 16).unwrap();
        let debug = format!("{parsed:?}");
        assert!(debug.contains("<redacted 16 bytes>"));
        assert!(debug.contains("<redacted 32 bytes>"));
    }

    #[test]
    fn key_id_exact_length() {
        assert_eq!(parse_key_id(&[5; 8]).unwrap(), [5; 8]);
        assert!(parse_key_id(&[5; 7]).is_err());
        assert!(parse_key_id(&[5; 9]).is_err());
        assert_eq!(key_id_frame([5; 8]).payload.as_ref(), &[5; 8]);
    }

    #[test]
    fn challenge_length_checked() {
        assert!(parse_challenge(&[0; 32], 32).is_ok());
        assert!(parse_challenge(&[0; 31], 32).is_err());
    }
}
