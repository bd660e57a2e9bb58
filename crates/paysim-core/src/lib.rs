//! Core types and trait definitions for the payment-gateway simulator.
//!
//! This crate holds the outcome-determination rules, the rule matcher, the
//! payment and subscription state machines and the storage abstraction. It is
//! deliberately free of HTTP and database dependencies; every other crate in
//! the workspace depends on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod billing;
pub mod card;
pub mod error;
pub mod id;
pub mod outcome;
pub mod payment;
pub mod rule;
pub mod store;
pub mod subscription;
pub mod webhook;

pub use error::{Error, ErrorKind, Result};
