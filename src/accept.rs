//! # Accept key
//!
//! Derivation of the `Sec-WebSocket-Accept` proof described in
//! [RFC 6455 Section 4.2.2](https://datatracker.ietf.org/doc/html/rfc6455#section-4.2.2):
//! the client nonce is concatenated with a fixed GUID, hashed with SHA-1 and the
//! 20-byte digest is base64 encoded, which always yields 28 ASCII characters.
//!
//! ```rust
//! use spws::accept;
//!
//! let accept = accept::derive_string("dGhlIHNhbXBsZSBub25jZQ==");
//! assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
//! assert!(accept::verify(b"dGhlIHNhbXBsZSBub25jZQ==", accept.as_bytes()));
//! ```
use base64::prelude::*;
use sha1::{Digest, Sha1};

/// GUID appended to the client key before hashing.
pub const MAGIC_STRING: &[u8; 36] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Length of a derived accept key: base64 of a 160-bit digest.
pub const ACCEPT_KEY_LEN: usize = 28;

/// Number of raw bytes a client nonce must decode to.
pub const KEY_NONCE_LEN: usize = 16;

/// Computes the accept key for `key` into a fixed-size array.
pub fn derive(key: impl AsRef<[u8]>) -> [u8; ACCEPT_KEY_LEN] {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_ref());
    sha1.update(MAGIC_STRING);
    let digest = sha1.finalize();

    let mut out = [0u8; ACCEPT_KEY_LEN];
    let written = BASE64_STANDARD
        .encode_slice(digest, &mut out)
        .unwrap_or_default();
    debug_assert_eq!(written, ACCEPT_KEY_LEN);
    out
}

/// Same as [`derive`], returned as an owned string.
pub fn derive_string(key: impl AsRef<[u8]>) -> String {
    // base64 output is always ASCII
    String::from_utf8_lossy(&derive(key)).into_owned()
}

/// Checks `candidate` against the accept key derived from `key`.
///
/// The comparison is byte-exact; the values are public so timing is not a concern.
pub fn verify(key: impl AsRef<[u8]>, candidate: impl AsRef<[u8]>) -> bool {
    derive(key)[..] == *candidate.as_ref()
}

/// Generates a fresh `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub fn generate_key() -> String {
    let input: [u8; KEY_NONCE_LEN] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Whether `key` is a base64 string decoding to exactly 16 bytes.
pub fn is_valid_key(key: &[u8]) -> bool {
    // 16 bytes always encode to 24 characters; reject early so the decode
    // buffer below cannot be overrun by longer input.
    if key.len() != 24 {
        return false;
    }
    let mut raw = [0u8; 18];
    matches!(
        BASE64_STANDARD.decode_slice(key, &mut raw),
        Ok(KEY_NONCE_LEN)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc_sample() {
        let accept = derive("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(&accept, b"s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(
            derive_string("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_verify() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert!(verify(key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        assert!(!verify(key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOp="));
        assert!(!verify(key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo"));
        assert!(!verify(key, ""));
        assert!(!verify("x3JJHMbDL1EzLkh9GBhXDw==", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[test]
    fn test_generate_key() {
        let a = generate_key();
        let b = generate_key();
        assert_eq!(a.len(), 24);
        assert!(is_valid_key(a.as_bytes()));
        assert!(is_valid_key(b.as_bytes()));
        assert_ne!(a, b);
        assert_eq!(derive(&a).len(), ACCEPT_KEY_LEN);
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key(b"dGhlIHNhbXBsZSBub25jZQ=="));
        // truncated
        assert!(!is_valid_key(b"dGhlIHNhbXBsZSBub25jZQ="));
        // 18 bytes
        assert!(!is_valid_key(b"dGhlIHNhbXBsZSBub25jZQ2Y"));
        assert!(!is_valid_key(b"not base64 at all!!!!!!!"));
        assert!(!is_valid_key(b""));
    }
}
