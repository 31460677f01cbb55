//! Text records carried inside encrypted frames.
//!
//! Control traffic between the endpoints is plain ASCII inside the AEAD
//! envelope: rotation requests, confirmations, acknowledgements and HMAC
//! responses.

use lifilink_crypto::HMAC_SIZE;

/// Request a key rotation, subject to the cooldown.
pub const NEW_KEY: &[u8] = b"new key";

/// Request an immediate rotation, bypassing the cooldown.
pub const NEW_KEY_FORCED: &[u8] = b"new key -f";

/// Confirm a pending rotation request.
pub const CONFIRM: &[u8] = b"yes";

/// Acknowledge a provisioned key (canonical form).
pub const ACK: &[u8] = b"ACK";

/// Accepted acknowledgement spellings.
pub const ACK_TOKENS: [&[u8]; 3] = [ACK, b"KEY_OK", b"I have the key"];

/// Ask the peer to run a challenge.
pub const VERIFY_KEY: &[u8] = b"verify key";

/// Prefix of an HMAC challenge response.
pub const HMAC_PREFIX: &[u8] = b"HMAC:";

/// A decoded text record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record<'a> {
    /// `new key`
    NewKey,
    /// `new key -f`
    NewKeyForced,
    /// `yes`
    Confirm,
    /// `ACK`, `KEY_OK` or `I have the key`
    Ack,
    /// `verify key`
    VerifyKey,
    /// `HMAC:` followed by the hex tag (not yet decoded).
    HmacResponse(&'a [u8]),
    /// Anything else: application text.
    Text(&'a [u8]),
}

impl<'a> Record<'a> {
    /// Classify a decrypted plaintext.
    ///
    /// Surrounding ASCII whitespace and trailing NULs are ignored.
    pub fn parse(plaintext: &'a [u8]) -> Self {
        let trimmed = trim(plaintext);
        if trimmed == NEW_KEY {
            Self::NewKey
        } else if trimmed == NEW_KEY_FORCED {
            Self::NewKeyForced
        } else if trimmed == CONFIRM {
            Self::Confirm
        } else if ACK_TOKENS.contains(&trimmed) {
            Self::Ack
        } else if trimmed == VERIFY_KEY {
            Self::VerifyKey
        } else if let Some(hex) = trimmed.strip_prefix(HMAC_PREFIX) {
            Self::HmacResponse(hex)
        } else {
            Self::Text(plaintext)
        }
    }
}

/// Encode an HMAC tag as a response record: `HMAC:` ++ uppercase hex.
pub fn hmac_response(tag: &[u8; HMAC_SIZE]) -> Vec<u8> {
    let mut record = HMAC_PREFIX.to_vec();
    record.extend_from_slice(hex::encode_upper(tag).as_bytes());
    record
}

fn trim(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    bytes[..end].trim_ascii()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_tokens() {
        assert_eq!(Record::parse(b"new key"), Record::NewKey);
        assert_eq!(Record::parse(b" new key\n"), Record::NewKey);
        assert_eq!(Record::parse(b"new key -f"), Record::NewKeyForced);
        assert_eq!(Record::parse(b"yes\0"), Record::Confirm);
        assert_eq!(Record::parse(b"KEY_OK"), Record::Ack);
        assert_eq!(Record::parse(b"I have the key"), Record::Ack);
        assert_eq!(Record::parse(b"verify key"), Record::VerifyKey);
    }

    #[test]
    fn text_keeps_original_bytes() {
        assert_eq!(Record::parse(b" hello "), Record::Text(b" hello "));
        assert_eq!(Record::parse(b"new keys"), Record::Text(b"new keys"));
    }

    #[test]
    fn hmac_response_roundtrip() {
        let tag = [0xABu8; HMAC_SIZE];
        let record = hmac_response(&tag);
        assert!(record.starts_with(b"HMAC:ABAB"));
        match Record::parse(&record) {
            Record::HmacResponse(hex) => assert_eq!(hex.len(), HMAC_SIZE * 2),
            other => unreachable!("unexpected record {other:?}"),
        }
    }
}
