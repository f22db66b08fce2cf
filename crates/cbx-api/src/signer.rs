//! Request signing.
//!
//! The server recomputes the exact same prehash string, so its layout is
//! fixed:
//!
//! ```text
//! prehash   = timestamp + METHOD + request_path + body
//! signature = base64( HMAC-SHA256( base64_decode(secret), prehash ) )
//! ```
//!
//! `timestamp` is whole seconds since the epoch in decimal, `METHOD` is
//! upper-cased, and `body` is the JSON serialization of the request body or
//! the empty string when there is none.

use std::sync::Arc;

use base64::Engine;
use base64::engine::GeneralPurpose;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use cbx_core::config::Credential;
use cbx_core::time_util;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// A signature and the timestamp it was computed for.
///
/// Only valid for that timestamp; never re-sign or edit one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// Base64 HMAC-SHA256 digest.
    pub signature: String,
    /// Whole seconds since Unix epoch.
    pub timestamp: u64,
}

/// Signs requests with the configured credential.
#[derive(Clone)]
pub struct Signer {
    credential: Arc<Credential>,
    key: Arc<[u8]>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("credential", &self.credential)
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl Signer {
    /// Build a signer. The secret is decoded once here; an absent, empty or
    /// malformed secret yields a zero-length key.
    pub fn new(credential: Arc<Credential>) -> Self {
        let key = decode_secret(credential.secret_key.as_deref());
        Self { credential, key: key.into() }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Sign a request at the current wall-clock second.
    pub fn sign(&self, request_path: &str, method: &str, body: Option<&serde_json::Value>) -> SignedRequest {
        self.sign_at(time_util::now_secs(), request_path, method, body)
    }

    /// Sign a request at a fixed `timestamp` (seconds).
    pub fn sign_at(
        &self,
        timestamp: u64,
        request_path: &str,
        method: &str,
        body: Option<&serde_json::Value>,
    ) -> SignedRequest {
        let message = prehash(timestamp, method, request_path, body);
        SignedRequest { signature: hmac_sha256_base64(&self.key, &message), timestamp }
    }
}

/// Assemble the string that gets signed.
pub fn prehash(timestamp: u64, method: &str, request_path: &str, body: Option<&serde_json::Value>) -> String {
    let body = body.map(|b| b.to_string()).unwrap_or_default();
    format!("{timestamp}{}{request_path}{body}", method.to_uppercase())
}

/// Compute an HMAC-SHA256 over `message` and return it Base64-encoded.
pub fn hmac_sha256_base64(key: &[u8], message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Decode the secret, accepting padded or unpadded, standard or URL-safe
/// alphabets.
fn decode_secret(secret: Option<&str>) -> Vec<u8> {
    let s = match secret.map(str::trim) {
        None | Some("") => return Vec::new(),
        Some(s) => s,
    };
    let engines: [&GeneralPurpose; 4] = [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD];
    let mut last_err = None;
    for engine in engines {
        match engine.decode(s) {
            Ok(key) => return key,
            Err(e) => last_err = Some(e),
        }
    }
    if let Some(e) = last_err {
        warn!("secret key is not valid base64 ({e}); signing with an empty key");
    }
    Vec::new()
}
