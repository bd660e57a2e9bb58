//! Plans, subscriptions (preapprovals) and the recurring charge generator.

use chrono::Utc;
use paysim_core::{
  Error as CoreError,
  id,
  outcome::ForcedOutcome,
  payment::{NewPayment, Payer, Payment, PaymentMethod},
  store::{GatewayStore, SubscriptionQuery},
  subscription::{
    Plan, PlanRequest, Subscription, SubscriptionRequest, SubscriptionStatus,
  },
};
use serde::Deserialize;

use crate::{Error, Gateway, Result};

/// Body of `POST /api/recurring/charge` and `POST /api/preapproval/{id}/pay`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeRequest {
  pub preapproval_id:         Option<String>,
  #[serde(rename = "_simulate_status")]
  pub simulate_status:        Option<String>,
  #[serde(rename = "_simulate_status_detail")]
  pub simulate_status_detail: Option<String>,
  pub payment_method_id:      Option<String>,
}

/// Body of `PUT /api/preapproval/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionUpdate {
  pub status: Option<String>,
}

impl<S: GatewayStore + 'static> Gateway<S> {
  // ── Plans ─────────────────────────────────────────────────────────────────

  pub async fn create_plan(&self, request: PlanRequest) -> Result<Plan> {
    let plan = request.into_plan(id::generate(id::PLAN), Utc::now())?;
    self.store.insert_plan(&plan).await.map_err(Error::store)?;
    tracing::info!(plan_id = %plan.id, reason = %plan.reason, "plan created");
    Ok(plan)
  }

  pub async fn get_plan(&self, id: &str) -> Result<Plan> {
    self
      .store
      .get_plan(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| CoreError::PlanNotFound(id.to_owned()).into())
  }

  pub async fn list_plans(&self) -> Result<Vec<Plan>> {
    self.store.list_plans().await.map_err(Error::store)
  }

  // ── Subscriptions ─────────────────────────────────────────────────────────

  pub async fn create_subscription(&self, request: SubscriptionRequest) -> Result<Subscription> {
    let plan = match request.preapproval_plan_id.as_deref() {
      Some(plan_id) if !plan_id.is_empty() => Some(self.get_plan(plan_id).await?),
      _ => None,
    };
    let subscription =
      request.into_subscription(id::generate(id::SUBSCRIPTION), plan.as_ref(), Utc::now())?;
    self
      .store
      .insert_subscription(&subscription)
      .await
      .map_err(Error::store)?;
    tracing::info!(
      preapproval_id = %subscription.id,
      status = %subscription.status,
      next_payment_date = %subscription.next_payment_date,
      "preapproval created"
    );
    Ok(subscription)
  }

  pub async fn get_subscription(&self, id: &str) -> Result<Subscription> {
    self
      .store
      .get_subscription(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| CoreError::SubscriptionNotFound(id.to_owned()).into())
  }

  pub async fn list_subscriptions(&self, query: &SubscriptionQuery) -> Result<Vec<Subscription>> {
    self.store.list_subscriptions(query).await.map_err(Error::store)
  }

  /// `PUT /api/preapproval/{id}`: explicit status change, then a
  /// `subscription_preapproval` notification.
  pub async fn update_subscription(
    &self,
    id: &str,
    update: SubscriptionUpdate,
  ) -> Result<Subscription> {
    let raw = update
      .status
      .ok_or_else(|| CoreError::validation("status is required"))?;
    let to: SubscriptionStatus = raw
      .trim()
      .to_ascii_lowercase()
      .replace("canceled", "cancelled")
      .parse()
      .map_err(|_| CoreError::validation(format!("unknown preapproval status {raw:?}")))?;

    let mut current = self.get_subscription(id).await?;
    let from = current.status;
    let now = Utc::now();
    current.set_status(to, now)?;

    let updated = self
      .store
      .set_subscription_status(id, from, to, now)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| CoreError::ConcurrentUpdate(id.to_owned()))?;

    tracing::info!(preapproval_id = %id, %from, %to, "preapproval status changed");
    self.notify_subscription(&updated).await;
    Ok(updated)
  }

  // ── Charge generator ──────────────────────────────────────────────────────

  /// Simulate one billing tick for a subscription.
  ///
  /// The new payment and the advanced bookkeeping are written in one
  /// transaction that only lands if nobody else charged or paused the
  /// subscription since it was read. `next_payment_date` moves forward one
  /// period whether the charge is approved or not.
  pub async fn charge_subscription(&self, request: ChargeRequest) -> Result<Payment> {
    let id = request
      .preapproval_id
      .filter(|s| !s.is_empty())
      .ok_or_else(|| CoreError::validation("preapproval_id is required"))?;
    let subscription = self.get_subscription(&id).await?;
    subscription.ensure_chargeable()?;

    let method = match request.payment_method_id.as_deref() {
      None | Some("") => subscription.payment_method_id,
      Some(raw) => PaymentMethod::from_method_id(raw)
        .ok_or_else(|| CoreError::validation(format!("unknown payment_method_id {raw:?}")))?,
    };
    let forced = request
      .simulate_status
      .as_deref()
      .map(|s| ForcedOutcome::parse(s, request.simulate_status_detail.as_deref()))
      .transpose()?;

    let payment = self.build_payment(charge_input(&subscription, method, forced)).await?;

    let mut advanced = subscription.clone();
    advanced.record_charge(&payment, Utc::now())?;
    let committed = self
      .store
      .record_charge(&advanced, subscription.next_payment_date, &payment)
      .await
      .map_err(Error::store)?;
    if !committed {
      // Report the state that beat us, if it explains the refusal.
      let latest = self.get_subscription(&id).await?;
      latest.ensure_chargeable()?;
      return Err(CoreError::ConcurrentUpdate(id).into());
    }

    tracing::info!(
      preapproval_id = %advanced.id,
      payment_id = %payment.id,
      status = %payment.status,
      charged_quantity = advanced.summarized.charged_quantity,
      next_payment_date = %advanced.next_payment_date,
      "recurring charge generated"
    );
    self.after_create(&payment).await;
    if advanced.summarized.charged_quantity == 1 {
      self.notify_subscription(&advanced).await;
    }
    Ok(payment)
  }
}

/// The payment a billing tick creates: the subscription's amount and
/// currency, its stored card for card methods, linked back by
/// `preapproval_id`.
fn charge_input(
  subscription: &Subscription,
  method: PaymentMethod,
  forced: Option<ForcedOutcome>,
) -> NewPayment {
  NewPayment {
    amount: subscription.auto_recurring.transaction_amount,
    currency: subscription.auto_recurring.currency_id.clone(),
    payment_method: method,
    card: subscription.card.clone().filter(|_| method.is_card()),
    payer: Payer { email: Some(subscription.payer_email.clone()), ..Payer::default() },
    installments: 1,
    external_reference: subscription.external_reference.clone(),
    description: Some(subscription.reason.clone()),
    items: Vec::new(),
    notification_url: subscription.notification_url.clone(),
    metadata: None,
    preapproval_id: Some(subscription.id.clone()),
    forced,
  }
}

#[cfg(test)]
mod tests {
  use std::str::FromStr;

  use chrono::{TimeZone, Utc};
  use paysim_core::{
    ErrorKind,
    billing::FrequencyType,
    card::CardInput,
    payment::PaymentStatus,
    store::{DeliveryLogQuery, PaymentQuery},
    subscription::AutoRecurring,
    webhook::{EventType, WebhookRequest},
  };
  use rust_decimal::Decimal;

  use super::*;
  use crate::testing::{Receiver, gateway};

  fn monthly() -> AutoRecurring {
    AutoRecurring {
      frequency:          1,
      frequency_type:     FrequencyType::Months,
      transaction_amount: Decimal::from_str("89.90").unwrap(),
      currency_id:        "BRL".into(),
      repetitions:        None,
      start_date:         Some(Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap()),
    }
  }

  fn request(card: Option<&str>) -> SubscriptionRequest {
    SubscriptionRequest {
      reason: Some("Plano Mensal".into()),
      payer_email: Some("aluno@academia.test".into()),
      auto_recurring: Some(monthly()),
      card: card.map(CardInput::new),
      ..SubscriptionRequest::default()
    }
  }

  fn tick(id: &str) -> ChargeRequest {
    ChargeRequest { preapproval_id: Some(id.into()), ..ChargeRequest::default() }
  }

  #[tokio::test]
  async fn rejected_charge_still_advances_one_month() {
    let gw = gateway().await;
    let sub = gw.create_subscription(request(Some("4111111111110002"))).await.unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Authorized);

    let payment = gw.charge_subscription(tick(&sub.id)).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Rejected);
    assert_eq!(payment.preapproval_id.as_deref(), Some(sub.id.as_str()));
    assert_eq!(payment.amount.to_string(), "89.90");

    let after = gw.get_subscription(&sub.id).await.unwrap();
    assert_eq!(after.summarized.charged_quantity, 1);
    assert_eq!(after.summarized.charged_amount.to_string(), "0.00");
    // Jan 31 + 1 month clamps to Feb 28.
    assert_eq!(after.next_payment_date, Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).unwrap());
  }

  #[tokio::test]
  async fn approved_charges_accumulate() {
    let gw = gateway().await;
    let sub = gw.create_subscription(request(Some("4111111111110001"))).await.unwrap();

    gw.charge_subscription(tick(&sub.id)).await.unwrap();
    let mut forced = tick(&sub.id);
    forced.simulate_status = Some("approved".into());
    gw.charge_subscription(forced).await.unwrap();

    let after = gw.get_subscription(&sub.id).await.unwrap();
    assert_eq!(after.summarized.charged_quantity, 2);
    assert_eq!(after.summarized.charged_amount.to_string(), "179.80");
    assert_eq!(
      after.summarized.last_charged_amount.map(|a| a.to_string()).as_deref(),
      Some("89.90")
    );
    assert_eq!(after.next_payment_date, Utc.with_ymd_and_hms(2026, 3, 28, 9, 0, 0).unwrap());

    let children = gw
      .list_payments(&PaymentQuery { preapproval_id: Some(sub.id.clone()), ..PaymentQuery::default() })
      .await
      .unwrap();
    assert_eq!(children.len(), 2);
  }

  #[tokio::test]
  async fn paused_subscription_is_a_conflict_without_mutation() {
    let gw = gateway().await;
    let sub = gw.create_subscription(request(Some("4111111111110001"))).await.unwrap();
    gw.update_subscription(&sub.id, SubscriptionUpdate { status: Some("paused".into()) })
      .await
      .unwrap();

    let err = gw.charge_subscription(tick(&sub.id)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let after = gw.get_subscription(&sub.id).await.unwrap();
    assert_eq!(after.summarized.charged_quantity, 0);
    assert_eq!(after.next_payment_date, sub.next_payment_date);
    assert!(gw.list_payments(&PaymentQuery::default()).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn pending_subscription_cannot_be_charged_until_authorized() {
    let gw = gateway().await;
    let sub = gw.create_subscription(request(None)).await.unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Pending);
    assert_eq!(gw.charge_subscription(tick(&sub.id)).await.unwrap_err().kind(), ErrorKind::Conflict);

    gw.update_subscription(&sub.id, SubscriptionUpdate { status: Some("authorized".into()) })
      .await
      .unwrap();
    let payment = gw.charge_subscription(tick(&sub.id)).await.unwrap();
    // No stored card: the method default applies.
    assert_eq!(payment.status, PaymentStatus::Approved);
  }

  #[tokio::test]
  async fn cancelled_is_terminal() {
    let gw = gateway().await;
    let sub = gw.create_subscription(request(Some("4111111111110001"))).await.unwrap();
    gw.update_subscription(&sub.id, SubscriptionUpdate { status: Some("canceled".into()) })
      .await
      .unwrap();
    let err = gw
      .update_subscription(&sub.id, SubscriptionUpdate { status: Some("authorized".into()) })
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
  }

  #[tokio::test]
  async fn quotas_are_enforced() {
    let gw = gateway().await;
    let mut req = request(Some("4111111111110001"));
    let mut recurring = monthly();
    recurring.repetitions = Some(1);
    req.auto_recurring = Some(recurring);
    let sub = gw.create_subscription(req).await.unwrap();

    gw.charge_subscription(tick(&sub.id)).await.unwrap();
    let err = gw.charge_subscription(tick(&sub.id)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let after = gw.get_subscription(&sub.id).await.unwrap();
    assert_eq!(after.status, SubscriptionStatus::Authorized);
  }

  #[tokio::test]
  async fn concurrent_ticks_advance_exactly_once() {
    let gw = gateway().await;
    let sub = gw.create_subscription(request(Some("4111111111110001"))).await.unwrap();

    let (a, b) = tokio::join!(
      gw.charge_subscription(tick(&sub.id)),
      gw.charge_subscription(tick(&sub.id)),
    );
    let after = gw.get_subscription(&sub.id).await.unwrap();
    let wins = [a.is_ok(), b.is_ok()].into_iter().filter(|ok| *ok).count();
    assert_eq!(after.summarized.charged_quantity as usize, wins);
    assert!(wins >= 1);
    let payments = gw.list_payments(&PaymentQuery::default()).await.unwrap();
    assert_eq!(payments.len(), wins);
  }

  #[tokio::test]
  async fn first_charge_announces_the_subscription() {
    let gw = gateway().await;
    let receiver = Receiver::start().await;
    gw.create_webhook(WebhookRequest {
      url: Some(receiver.url("/all")),
      ..WebhookRequest::default()
    })
    .await
    .unwrap();

    let sub = gw.create_subscription(request(Some("4111111111110001"))).await.unwrap();
    gw.charge_subscription(tick(&sub.id)).await.unwrap();
    gw.charge_subscription(tick(&sub.id)).await.unwrap();

    let types: Vec<String> = receiver
      .hits()
      .iter()
      .map(|h| h.json()["type"].as_str().unwrap().to_owned())
      .collect();
    assert_eq!(types, ["payment.created", "subscription_preapproval", "payment.created"]);

    let announce = &receiver.hits()[1];
    assert_eq!(announce.json()["preapproval"]["id"], sub.id.as_str());
    assert_eq!(announce.json()["data"]["id"], sub.id.as_str());

    let sub_logs = gw
      .list_delivery_logs(&DeliveryLogQuery {
        event: Some(EventType::SubscriptionPreapproval),
        ..DeliveryLogQuery::default()
      })
      .await
      .unwrap();
    assert_eq!(sub_logs.len(), 1);
  }

  #[tokio::test]
  async fn plan_backed_subscription() {
    let gw = gateway().await;
    let plan = gw
      .create_plan(PlanRequest {
        reason: Some("Plano Trimestral".into()),
        auto_recurring: Some(AutoRecurring { frequency: 3, ..monthly() }),
        back_url: None,
      })
      .await
      .unwrap();

    let sub = gw
      .create_subscription(SubscriptionRequest {
        preapproval_plan_id: Some(plan.id.clone()),
        payer_email: Some("aluno@academia.test".into()),
        status: Some("authorized".into()),
        ..SubscriptionRequest::default()
      })
      .await
      .unwrap();
    assert_eq!(sub.reason, "Plano Trimestral");
    assert_eq!(sub.auto_recurring.frequency, 3);

    let missing = gw
      .create_subscription(SubscriptionRequest {
        preapproval_plan_id: Some("plan_nope".into()),
        payer_email: Some("aluno@academia.test".into()),
        ..SubscriptionRequest::default()
      })
      .await
      .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
  }
}
