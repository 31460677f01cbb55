//! HMAC-SHA256 and hashing helpers.

use hmac::{
    Hmac, Mac,
    digest::{KeyInit, generic_array::GenericArray},
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::AuthFailure;

/// HMAC-SHA256 output length.
pub const HMAC_SIZE: usize = 32;

/// SHA-256 block size; HMAC zero-pads shorter keys to this length.
const BLOCK_SIZE: usize = 64;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 of `message` under `key`.
pub fn hmac_sha256(key: &[u8; 32], message: &[u8]) -> [u8; HMAC_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[..key.len()].copy_from_slice(key);
    let mut mac = <HmacSha256 as KeyInit>::new(GenericArray::from_slice(&block));
    block.zeroize();
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Verify an HMAC tag in constant time.
///
/// # Errors
///
/// - `AuthFailure` if `tag` is not the HMAC of `message` under `key`
pub fn verify_hmac(key: &[u8; 32], message: &[u8], tag: &[u8]) -> Result<(), AuthFailure> {
    let expected = hmac_sha256(key, message);
    if tags_equal(&expected, tag) { Ok(()) } else { Err(AuthFailure) }
}

/// Constant-time equality over byte strings. Length mismatch is not secret.
pub fn tags_equal(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn hmac_rfc4231_case2_prefix_key() {
        // RFC 4231 case 2 uses a 4-byte key; pad it to 32 with zeros, which
        // HMAC treats identically (keys are zero-padded to the block size)
        let mut key = [0u8; 32];
        key[..4].copy_from_slice(b"Jefe");
        let tag = hmac_sha256(&key, b"what do ya want for nothing?");
        assert_eq!(tag, hex!("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"));
    }

    #[test]
    fn verify_rejects_flipped_bit() {
        let key = [9u8; 32];
        let mut tag = hmac_sha256(&key, b"challenge");
        assert!(verify_hmac(&key, b"challenge", &tag).is_ok());
        tag[0] ^= 0x80;
        assert_eq!(verify_hmac(&key, b"challenge", &tag), Err(AuthFailure));
        assert!(verify_hmac(&key, b"challenge", &tag[..31]).is_err());
    }

    #[test]
    fn sha256_concatenates() {
        assert_eq!(sha256(&[&b"ab"[..], &b"c"[..]]), sha256(&[&b"abc"[..]]));
        assert_eq!(
            sha256(&[&b"abc"[..]]),
            hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }
}
