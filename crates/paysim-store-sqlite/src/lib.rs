//! SQLite backend for the gateway simulator's store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every record is kept as a JSON
//! document next to the handful of columns that queries and compare-and-set
//! updates need.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
