// Token verifier for the handshake `auth` command.
//
// Validates a signed token of the form `payload.signature`: `payload` is
// base64url-encoded JSON, `signature` is a hex-encoded HMAC-SHA256 over the
// raw (still-encoded) payload bytes. Pure: no I/O, no shared state.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,

    #[error("signature mismatch")]
    BadSignature,

    #[error("token expired")]
    Expired,
}

/// Claims carried by the signed payload. `exp` is optional: tokens without
/// an expiry never expire (the embedded signing library is treated as a
/// black box per spec §4.B; this crate only enforces `exp` when present).
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Verify a `payload.signature` token against `secret`, returning its claims.
///
/// `now` is injected so callers (and tests) control the expiry check rather
/// than this function reaching for the wall clock itself.
pub fn verify(token: &str, secret: &[u8], now: i64) -> Result<Claims, AuthError> {
    let (payload_b64, signature_hex) = token.split_once('.').ok_or(AuthError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| AuthError::Malformed)?;
    mac.update(payload_b64.as_bytes());
    let expected = mac.finalize().into_bytes();
    let expected_hex = hex_encode(&expected);

    if !constant_time_eq(expected_hex.as_bytes(), signature_hex.as_bytes()) {
        return Err(AuthError::BadSignature);
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::Malformed)?;
    let claims: Claims = serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::Malformed)?;

    if let Some(exp) = claims.exp {
        if exp <= now {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Constant-time comparison so signature checking doesn't leak timing
/// information about how many leading bytes matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
