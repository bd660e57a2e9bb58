//! Webhook signatures: hex-encoded HMAC-SHA256 of the raw request body.
//!
//! Receivers recompute the HMAC with their listener secret and compare it
//! to `X-Webhook-Signature` with [`verify`].

use hmac::{Hmac, Mac, digest::InvalidLength};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const DELIVERY_HEADER: &str = "X-Webhook-Delivery";
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Sign `body` with `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, InvalidLength> {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
  mac.update(body);
  Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature against `body`.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
  let Ok(expected) = hex::decode(signature.trim()) else {
    return false;
  };
  let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
    return false;
  };
  mac.update(body);
  mac.verify_slice(&expected).is_ok()
}

/// Constant-time equality for shared secrets such as access tokens. Both
/// sides are MACed under `expected` so the comparison never depends on where
/// (or whether) their lengths differ.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
  let Ok(mut reference) = HmacSha256::new_from_slice(expected.as_bytes()) else {
    return false;
  };
  let mut candidate = reference.clone();
  reference.update(expected.as_bytes());
  candidate.update(presented.as_bytes());
  candidate.verify_slice(&reference.finalize().into_bytes()).is_ok()
}

/// 32 random bytes, hex-encoded.
pub fn generate_secret() -> String {
  let mut bytes = [0u8; 32];
  OsRng.fill_bytes(&mut bytes);
  hex::encode(bytes)
}
