//! The `GatewayStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `paysim-store-sqlite`).
//! The engine and the HTTP layer depend on this abstraction, not on any
//! concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
  payment::{Payment, PaymentMethod, PaymentStatus},
  rule::Rule,
  subscription::{Plan, Subscription, SubscriptionStatus},
  webhook::{EventType, WebhookDeliveryLog, WebhookSubscription},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Filters for [`GatewayStore::list_payments`]. Results are newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentQuery {
  pub status:             Option<PaymentStatus>,
  pub payment_method:     Option<PaymentMethod>,
  pub external_reference: Option<String>,
  pub preapproval_id:     Option<String>,
  pub limit:              Option<usize>,
  pub offset:             Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionQuery {
  pub status:              Option<SubscriptionStatus>,
  pub payer_email:         Option<String>,
  pub preapproval_plan_id: Option<String>,
}

/// Filters for [`GatewayStore::list_delivery_logs`]. Results are newest
/// first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryLogQuery {
  pub webhook_subscription_id: Option<String>,
  pub resource_id:             Option<String>,
  pub event:                   Option<EventType>,
  pub success:                 Option<bool>,
  pub limit:                   Option<usize>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Durable records for the simulator.
///
/// Payments and delivery logs are never deleted. Every mutation of an
/// existing record is a compare-and-set against the state the caller read,
/// so two concurrent writers to the same entity cannot both win; a lost
/// race is reported as `false`/`None`, never as an error.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait GatewayStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Payments ──────────────────────────────────────────────────────────

  fn insert_payment<'a>(
    &'a self,
    payment: &'a Payment,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_payment<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Payment>, Self::Error>> + Send + 'a;

  /// Replace a payment if its stored status is still `expected`.
  fn update_payment<'a>(
    &'a self,
    payment: &'a Payment,
    expected: PaymentStatus,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn list_payments<'a>(
    &'a self,
    query: &'a PaymentQuery,
  ) -> impl Future<Output = Result<Vec<Payment>, Self::Error>> + Send + 'a;

  // ── Plans ─────────────────────────────────────────────────────────────

  fn insert_plan<'a>(
    &'a self,
    plan: &'a Plan,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_plan<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Plan>, Self::Error>> + Send + 'a;

  fn list_plans(&self) -> impl Future<Output = Result<Vec<Plan>, Self::Error>> + Send + '_;

  // ── Subscriptions ─────────────────────────────────────────────────────

  fn insert_subscription<'a>(
    &'a self,
    subscription: &'a Subscription,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_subscription<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Subscription>, Self::Error>> + Send + 'a;

  fn list_subscriptions<'a>(
    &'a self,
    query: &'a SubscriptionQuery,
  ) -> impl Future<Output = Result<Vec<Subscription>, Self::Error>> + Send + 'a;

  /// Change only `status` and `last_modified`, if the stored status is
  /// still `from`. Returns the updated record.
  fn set_subscription_status<'a>(
    &'a self,
    id: &'a str,
    from: SubscriptionStatus,
    to: SubscriptionStatus,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Subscription>, Self::Error>> + Send + 'a;

  /// Atomically insert `payment` and replace `subscription`, provided the
  /// stored subscription is still `authorized` with `next_payment_date ==
  /// expected_next`. Either both writes land or neither does.
  fn record_charge<'a>(
    &'a self,
    subscription: &'a Subscription,
    expected_next: DateTime<Utc>,
    payment: &'a Payment,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Rules ─────────────────────────────────────────────────────────────

  fn insert_rule<'a>(
    &'a self,
    rule: &'a Rule,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_rule<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Rule>, Self::Error>> + Send + 'a;

  /// All rules, in creation order.
  fn list_rules(&self) -> impl Future<Output = Result<Vec<Rule>, Self::Error>> + Send + '_;

  /// Returns `false` if no such rule existed.
  fn delete_rule<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Webhook listeners ─────────────────────────────────────────────────

  fn insert_webhook<'a>(
    &'a self,
    webhook: &'a WebhookSubscription,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_webhook<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<WebhookSubscription>, Self::Error>> + Send + 'a;

  /// All listeners, in creation order.
  fn list_webhooks(
    &self,
  ) -> impl Future<Output = Result<Vec<WebhookSubscription>, Self::Error>> + Send + '_;

  fn delete_webhook<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Delivery logs ─────────────────────────────────────────────────────

  fn insert_delivery_log<'a>(
    &'a self,
    log: &'a WebhookDeliveryLog,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn list_delivery_logs<'a>(
    &'a self,
    query: &'a DeliveryLogQuery,
  ) -> impl Future<Output = Result<Vec<WebhookDeliveryLog>, Self::Error>> + Send + 'a;
}
