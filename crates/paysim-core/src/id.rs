//! Opaque, prefixed identifiers.
//!
//! Every stored entity gets `<prefix>_<uuid-v4 simple>`. The prefix makes ids
//! self-describing in logs and webhook payloads; nothing parses it back.

use uuid::Uuid;

pub const PAYMENT: &str = "pay";
pub const SUBSCRIPTION: &str = "pre";
pub const PLAN: &str = "plan";
pub const RULE: &str = "rule";
pub const WEBHOOK: &str = "wh";
pub const DELIVERY: &str = "dlv";
pub const EVENT: &str = "evt";

/// Generate a fresh identifier with the given prefix.
pub fn generate(prefix: &str) -> String {
  format!("{prefix}_{}", Uuid::new_v4().simple())
}
