//! Error types for `paysim-core`.

use thiserror::Error;

use crate::{payment::PaymentStatus, subscription::SubscriptionStatus};

#[derive(Debug, Error)]
pub enum Error {
  #[error("payment not found: {0}")]
  PaymentNotFound(String),

  #[error("preapproval not found: {0}")]
  SubscriptionNotFound(String),

  #[error("preapproval plan not found: {0}")]
  PlanNotFound(String),

  #[error("rule not found: {0}")]
  RuleNotFound(String),

  #[error("webhook not found: {0}")]
  WebhookNotFound(String),

  #[error("invalid request: {0}")]
  Validation(String),

  #[error("payment {id} cannot move from {from} to {to}")]
  InvalidTransition {
    id:   String,
    from: PaymentStatus,
    to:   PaymentStatus,
  },

  #[error("payment {id} is {status}; only pending payments can be checked out")]
  NotPending {
    id:     String,
    status: PaymentStatus,
  },

  #[error("preapproval {id} cannot move from {from} to {to}")]
  InvalidSubscriptionTransition {
    id:   String,
    from: SubscriptionStatus,
    to:   SubscriptionStatus,
  },

  #[error("preapproval {id} is {status}; only authorized preapprovals can be charged")]
  NotChargeable {
    id:     String,
    status: SubscriptionStatus,
  },

  #[error("preapproval {0} has already been charged for every quota")]
  QuotasExhausted(String),

  /// A compare-and-set write lost against a concurrent writer.
  #[error("{0} was modified concurrently; retry the request")]
  ConcurrentUpdate(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Coarse classification used by the HTTP layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  NotFound,
  Validation,
  Conflict,
  Internal,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::PaymentNotFound(_)
      | Self::SubscriptionNotFound(_)
      | Self::PlanNotFound(_)
      | Self::RuleNotFound(_)
      | Self::WebhookNotFound(_) => ErrorKind::NotFound,
      Self::Validation(_) => ErrorKind::Validation,
      Self::InvalidTransition { .. }
      | Self::NotPending { .. }
      | Self::InvalidSubscriptionTransition { .. }
      | Self::NotChargeable { .. }
      | Self::QuotasExhausted(_)
      | Self::ConcurrentUpdate(_) => ErrorKind::Conflict,
      Self::Serialization(_) => ErrorKind::Internal,
    }
  }

  /// Shorthand for building a [`Error::Validation`].
  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
