//! The simulator's engine: payment creation and transitions, subscriptions
//! and the recurring charge generator, and signed webhook delivery.
//!
//! Everything hangs off [`Gateway`], which owns a store handle and an
//! explicit [`GatewayConfig`]. Two gateways over two stores never share
//! state.

mod admin;
mod recurring;

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod signature;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use gateway::{CheckoutForm, Gateway, PixConfirmation, SimulateRequest};
pub use recurring::{ChargeRequest, SubscriptionUpdate};

#[cfg(any(test, feature = "test_utils"))]
pub mod testing;
