//! Server configuration, deserialised from `paysim.toml` and `PAYSIM_*`
//! environment variables.

use std::{path::PathBuf, time::Duration};

use paysim_engine::{GatewayConfig, signature};
use serde::Deserialize;

/// Runtime server configuration. Every field has a default, so an empty
/// file (or no file at all) is a valid configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                String,
  pub port:                u16,
  /// Base URL handed to payers in `ticket_url`/`init_point`. Derived from
  /// `host` and `port` when unset.
  pub public_url:          Option<String>,
  pub store_path:          PathBuf,
  /// When set, every `/api/*` route requires `Authorization: Bearer <token>`.
  pub access_token:        Option<String>,
  pub api_version:         String,
  pub webhook_timeout_ms:  u64,
  /// Signs deliveries to per-payment `notification_url`s. Random per process
  /// when unset.
  pub notification_secret: Option<String>,
  pub response_body_limit: usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                "127.0.0.1".to_string(),
      port:                8080,
      public_url:          None,
      store_path:          PathBuf::from("paysim.db"),
      access_token:        None,
      api_version:         "v1".to_string(),
      webhook_timeout_ms:  5000,
      notification_secret: None,
      response_body_limit: 1000,
    }
  }
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn public_url(&self) -> String {
    match self.public_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
      Some(url) => url.trim_end_matches('/').to_string(),
      None => format!("http://{}", self.address()),
    }
  }

  /// An empty token counts as no token.
  pub fn access_token(&self) -> Option<&str> {
    self.access_token.as_deref().filter(|t| !t.is_empty())
  }

  pub fn gateway_config(&self) -> GatewayConfig {
    GatewayConfig {
      api_version:         self.api_version.clone(),
      public_url:          self.public_url(),
      notification_secret: self
        .notification_secret
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(signature::generate_secret),
      webhook_timeout:     Duration::from_millis(self.webhook_timeout_ms),
      response_body_limit: self.response_body_limit,
    }
  }
}
