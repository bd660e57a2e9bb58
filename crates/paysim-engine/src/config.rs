//! Runtime knobs for a [`Gateway`](crate::Gateway).

use std::time::Duration;

use crate::signature;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
  /// Reported in every envelope's `api_version`.
  pub api_version:         String,
  /// Base for the `ticket_url`/`init_point` links handed to payers.
  pub public_url:          String,
  /// Signs deliveries to per-payment `notification_url`s, which have no
  /// listener secret of their own.
  pub notification_secret: String,
  pub webhook_timeout:     Duration,
  /// Characters of each response body kept in the delivery log.
  pub response_body_limit: usize,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      api_version:         "v1".to_owned(),
      public_url:          "http://127.0.0.1:8080".to_owned(),
      notification_secret: signature::generate_secret(),
      webhook_timeout:     Duration::from_millis(5000),
      response_body_limit: 1000,
    }
  }
}
