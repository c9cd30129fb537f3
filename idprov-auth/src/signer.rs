//! HMAC-SHA256 message signatures.
//!
//! The key is the UTF-8 bytes of the OOB secret. An empty secret is a valid
//! key: it yields the HMAC of a zero-length key, which is what certificate
//! authenticated exchanges are signed with.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Length of a raw HMAC-SHA256 tag.
pub const TAG_LEN: usize = 32;

/// Errors from [`verify`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SignatureError {
    /// The signature is not valid base64 or has the wrong length.
    #[error("malformed signature")]
    Malformed,

    /// The signature does not match the message under the given secret.
    #[error("signature mismatch")]
    Mismatch,
}

fn tag(message: &[u8], secret: &str) -> [u8; TAG_LEN] {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Sign `message` with `secret`, returning the standard base64 of the tag.
#[must_use]
pub fn sign(message: &[u8], secret: &str) -> String {
    STANDARD.encode(tag(message, secret))
}

/// Verify a base64 signature produced by [`sign`].
///
/// The tag comparison is constant-time.
pub fn verify(message: &[u8], secret: &str, signature: &str) -> Result<(), SignatureError> {
    let provided = STANDARD
        .decode(signature)
        .map_err(|_| SignatureError::Malformed)?;
    if provided.len() != TAG_LEN {
        return Err(SignatureError::Malformed);
    }

    let expected = tag(message, secret);
    if expected.ct_eq(provided.as_slice()).into() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
