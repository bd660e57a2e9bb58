//! JSON REST API and hosted pages for the payment-gateway simulator.
//!
//! Exposes an axum [`Router`] backed by a [`Gateway`] over any
//! [`GatewayStore`]. TLS and process concerns are the binary's
//! responsibility.

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod hosted;
pub mod html;
pub mod payments;
pub mod preapproval;
pub mod rules;
pub mod webhooks;

pub use config::ServerConfig;
pub use error::ApiError;

use std::sync::Arc;

use axum::{
  Json, Router, middleware,
  routing::{get, post},
};
use paysim_core::store::GatewayStore;
use paysim_engine::Gateway;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub gateway: Gateway<S>,
  pub config:  Arc<ServerConfig>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { gateway: self.gateway.clone(), config: self.config.clone() }
  }
}

impl<S: GatewayStore + 'static> AppState<S> {
  /// Build the gateway from `config` over `store`.
  pub fn new(store: Arc<S>, config: ServerConfig) -> paysim_engine::Result<Self> {
    let gateway = Gateway::new(store, config.gateway_config())?;
    Ok(Self { gateway, config: Arc::new(config) })
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the full router: `/api/*`, the hosted pages and `/health`.
pub fn router<S: GatewayStore + 'static>(state: AppState<S>) -> Router {
  let api = Router::new()
    // Payments
    .route("/payments",               get(payments::list::<S>).post(payments::create::<S>))
    .route("/payments/{id}",          get(payments::get_one::<S>))
    .route("/payments/{id}/capture",  post(payments::capture::<S>))
    .route("/payments/{id}/cancel",   post(payments::cancel::<S>))
    .route("/payments/{id}/refund",   post(payments::refund::<S>))
    .route("/simulate",               post(payments::simulate::<S>))
    // Rules
    .route("/rules",                  get(rules::list::<S>).post(rules::create::<S>))
    .route("/rules/{id}",             get(rules::get_one::<S>).delete(rules::delete_one::<S>))
    // Webhooks
    .route("/webhooks",               get(webhooks::list::<S>).post(webhooks::create::<S>))
    .route("/webhooks/{id}",          get(webhooks::get_one::<S>).delete(webhooks::delete_one::<S>))
    .route("/webhook-logs",           get(webhooks::logs::<S>))
    // Plans & subscriptions
    .route("/preapproval_plan",       get(preapproval::list_plans::<S>).post(preapproval::create_plan::<S>))
    .route("/preapproval_plan/{id}",  get(preapproval::get_plan::<S>))
    .route("/preapproval",            get(preapproval::list::<S>).post(preapproval::create::<S>))
    .route("/preapproval/{id}",       get(preapproval::get_one::<S>).put(preapproval::update::<S>))
    .route("/preapproval/{id}/pay",   post(preapproval::pay::<S>))
    .route("/recurring/charge",       post(preapproval::charge::<S>))
    .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_token::<S>));

  Router::new()
    .route("/health",                 get(health))
    .nest("/api", api)
    .route("/checkout/{id}",          get(hosted::checkout_page::<S>))
    .route("/checkout/{id}/process",  post(hosted::checkout_process::<S>))
    .route("/pix/{id}",               get(hosted::pix_page::<S>))
    .route("/pix/{id}/confirm",       post(hosted::pix_confirm::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }
