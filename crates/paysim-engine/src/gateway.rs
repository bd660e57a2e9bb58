//! [`Gateway`]: payment creation and every later payment transition.
//!
//! Creation runs the outcome resolver once and persists the result; later
//! changes go through [`Payment::transition`] and a compare-and-set write,
//! so a replayed capture is a conflict rather than a second delivery.

use std::sync::Arc;

use chrono::Utc;
use paysim_core::{
  Error as CoreError,
  card::CardInput,
  id,
  outcome::{self, OutcomeSource, parse_status_alias},
  payment::{
    NewPayment, Payment, PaymentMethod, PaymentRequest, PaymentStatus, PointOfInteraction,
  },
  store::{GatewayStore, PaymentQuery},
  subscription::Subscription,
  webhook::{EventType, WebhookEnvelope},
};
use serde::Deserialize;

use crate::{Error, GatewayConfig, Result, dispatcher::Dispatcher};

/// Body of `POST /api/simulate`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulateRequest {
  pub payment_id:    Option<String>,
  pub status:        Option<String>,
  pub status_detail: Option<String>,
}

/// Fields posted by the hosted checkout page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutForm {
  pub card_number:     Option<String>,
  pub cardholder_name: Option<String>,
  /// `credit_card` or `debit_card`; defaults to the payment's own method.
  pub payment_method:  Option<String>,
}

/// Body of `POST /pix/{id}/confirm`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PixConfirmation {
  pub status: Option<String>,
}

pub struct Gateway<S> {
  pub(crate) store:      Arc<S>,
  pub(crate) config:     Arc<GatewayConfig>,
  pub(crate) dispatcher: Dispatcher,
}

impl<S> Clone for Gateway<S> {
  fn clone(&self) -> Self {
    Self {
      store:      self.store.clone(),
      config:     self.config.clone(),
      dispatcher: self.dispatcher.clone(),
    }
  }
}

impl<S: GatewayStore + 'static> Gateway<S> {
  pub fn new(store: Arc<S>, config: GatewayConfig) -> Result<Self> {
    let dispatcher = Dispatcher::new(&config)?;
    Ok(Self { store, config: Arc::new(config), dispatcher })
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &GatewayConfig { &self.config }

  // ── Creation ──────────────────────────────────────────────────────────────

  /// `POST /api/payments`: validate, resolve, persist, notify.
  pub async fn create_payment(&self, request: PaymentRequest) -> Result<Payment> {
    let new = request.validate()?;
    let payment = self.build_payment(new).await?;
    self.store.insert_payment(&payment).await.map_err(Error::store)?;
    self.after_create(&payment).await;
    Ok(payment)
  }

  /// Resolve a draft without persisting it.
  pub(crate) async fn build_payment(&self, mut new: NewPayment) -> Result<Payment> {
    let forced = new.forced.take();
    let mut payment = Payment::new(id::generate(id::PAYMENT), new, Utc::now());
    let rules = if forced.is_some() {
      Vec::new()
    } else {
      self.store.list_rules().await.map_err(Error::store)?
    };
    let resolution = outcome::resolve(&payment, forced.as_ref(), &rules)?;
    payment.apply_resolution(resolution);
    payment.point_of_interaction = self.point_of_interaction(&payment);
    Ok(payment)
  }

  /// Notifications and follow-ups for a payment that was just stored.
  pub(crate) async fn after_create(&self, payment: &Payment) {
    tracing::info!(
      payment_id = %payment.id,
      status = %payment.status,
      status_detail = %payment.status_detail,
      source = %payment.simulation.source,
      rule_id = ?payment.simulation.rule_id,
      "payment created"
    );
    self.notify_payment(EventType::PaymentCreated, payment).await;
  }

  fn point_of_interaction(&self, payment: &Payment) -> Option<PointOfInteraction> {
    let base = self.config.public_url.trim_end_matches('/');
    match payment.payment_method {
      PaymentMethod::Pix => Some(PointOfInteraction {
        qr_code: Some(pix_code(payment)),
        ticket_url: Some(format!("{base}/pix/{}", payment.id)),
        ..PointOfInteraction::default()
      }),
      PaymentMethod::Boleto => Some(PointOfInteraction {
        barcode: Some(boleto_line(payment)),
        ..PointOfInteraction::default()
      }),
      m if m.is_card() && payment.status == PaymentStatus::Pending => Some(PointOfInteraction {
        init_point: Some(format!("{base}/checkout/{}", payment.id)),
        ..PointOfInteraction::default()
      }),
      _ => None,
    }
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn get_payment(&self, id: &str) -> Result<Payment> {
    self
      .store
      .get_payment(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| CoreError::PaymentNotFound(id.to_owned()).into())
  }

  pub async fn list_payments(&self, query: &PaymentQuery) -> Result<Vec<Payment>> {
    self.store.list_payments(query).await.map_err(Error::store)
  }

  // ── Transitions ───────────────────────────────────────────────────────────

  /// Move `id` to `to` and dispatch `payment.updated`. Illegal edges and
  /// lost races are conflicts; nothing is written or sent for them.
  pub async fn transition(
    &self,
    id: &str,
    to: PaymentStatus,
    detail: Option<&str>,
  ) -> Result<Payment> {
    let mut payment = self.get_payment(id).await?;
    let from = payment.status;
    payment.transition(to, detail, OutcomeSource::Manual, Utc::now())?;
    self.commit_transition(&payment, from).await?;
    Ok(payment)
  }

  async fn commit_transition(&self, payment: &Payment, from: PaymentStatus) -> Result<()> {
    let written = self
      .store
      .update_payment(payment, from)
      .await
      .map_err(Error::store)?;
    if !written {
      return Err(CoreError::ConcurrentUpdate(payment.id.clone()).into());
    }
    tracing::info!(
      payment_id = %payment.id,
      %from,
      to = %payment.status,
      status_detail = %payment.status_detail,
      "payment transitioned"
    );
    self.notify_payment(EventType::PaymentUpdated, payment).await;
    Ok(())
  }

  pub async fn capture(&self, id: &str) -> Result<Payment> {
    self.transition(id, PaymentStatus::Approved, None).await
  }

  pub async fn cancel(&self, id: &str) -> Result<Payment> {
    self.transition(id, PaymentStatus::Cancelled, None).await
  }

  pub async fn refund(&self, id: &str) -> Result<Payment> {
    self.transition(id, PaymentStatus::Refunded, None).await
  }

  /// `POST /api/simulate`: force an existing payment's status. Accepts the
  /// same vocabulary as `_simulate_status`.
  pub async fn simulate(&self, request: SimulateRequest) -> Result<Payment> {
    let id = request
      .payment_id
      .filter(|s| !s.is_empty())
      .ok_or_else(|| CoreError::validation("payment_id is required"))?;
    let raw = request
      .status
      .ok_or_else(|| CoreError::validation("status is required"))?;
    let (status, implied) = parse_status_alias(&raw)
      .ok_or_else(|| CoreError::validation(format!("unknown simulated status {raw:?}")))?;
    let detail = request.status_detail.as_deref().or(implied);
    self.transition(&id, status, detail).await
  }

  // ── Hosted pages ──────────────────────────────────────────────────────────

  /// `POST /checkout/{id}/process`: resolve a pending card payment with the
  /// card the payer typed in. The form may switch between credit and debit
  /// but never away from a card method. A result that is still `pending`
  /// changes nothing.
  pub async fn process_checkout(&self, id: &str, form: CheckoutForm) -> Result<Payment> {
    let mut payment = self.get_payment(id).await?;
    if !payment.payment_method.is_card() {
      return Err(CoreError::validation(format!("payment {id} is not a card payment")).into());
    }
    let from = payment.status;
    if from != PaymentStatus::Pending {
      return Err(CoreError::NotPending { id: payment.id, status: from }.into());
    }

    let method = match form.payment_method.as_deref() {
      None | Some("") => payment.payment_method,
      Some(raw) => PaymentMethod::from_method_id(raw)
        .filter(|m| m.is_card())
        .ok_or_else(|| CoreError::validation(format!("{raw:?} is not a card method")))?,
    };
    let number = form
      .card_number
      .filter(|n| !n.trim().is_empty())
      .ok_or_else(|| CoreError::validation("card_number is required"))?;
    let card = CardInput {
      holder_name: form.cardholder_name,
      ..CardInput::new(number)
    }
    .summarize()?;

    payment.payment_method = method;
    payment.card = Some(card);

    let rules = self.store.list_rules().await.map_err(Error::store)?;
    let resolution = outcome::resolve(&payment, None, &rules)?;
    if resolution.status == PaymentStatus::Pending {
      return self.get_payment(id).await;
    }

    payment.transition(
      resolution.status,
      Some(&resolution.status_detail),
      resolution.source,
      Utc::now(),
    )?;
    payment.simulation.rule_id = resolution.rule_id;
    payment.chargeback_scheduled = resolution.chargeback;
    payment.point_of_interaction = None;
    self.commit_transition(&payment, from).await?;
    Ok(payment)
  }

  /// `POST /pix/{id}/confirm`: settle a pending PIX payment. The outcome
  /// defaults to `approved` and may be `rejected` or `cancelled`.
  pub async fn confirm_pix(&self, id: &str, confirmation: PixConfirmation) -> Result<Payment> {
    let payment = self.get_payment(id).await?;
    if payment.payment_method != PaymentMethod::Pix {
      return Err(CoreError::validation(format!("payment {id} is not a PIX payment")).into());
    }
    let to = match confirmation.status.as_deref() {
      None | Some("") => PaymentStatus::Approved,
      Some(raw) => match parse_status_alias(raw) {
        Some((s @ (PaymentStatus::Approved | PaymentStatus::Cancelled), _)) => s,
        Some((PaymentStatus::Rejected, _)) => PaymentStatus::Rejected,
        _ => {
          return Err(
            CoreError::validation(format!(
              "a PIX confirmation can be approved, rejected or cancelled, not {raw:?}"
            ))
            .into(),
          );
        }
      },
    };
    self.transition(id, to, None).await
  }

  // ── Notifications ─────────────────────────────────────────────────────────

  pub(crate) async fn notify_payment(&self, event: EventType, payment: &Payment) {
    let envelope = WebhookEnvelope::for_payment(
      id::generate(id::EVENT),
      event,
      &self.config.api_version,
      payment,
      Utc::now(),
    );
    self
      .dispatcher
      .dispatch(self.store.as_ref(), &envelope, payment.notification_url.as_deref())
      .await;
  }

  pub(crate) async fn notify_subscription(&self, subscription: &Subscription) {
    let envelope = WebhookEnvelope::for_subscription(
      id::generate(id::EVENT),
      &self.config.api_version,
      subscription,
      Utc::now(),
    );
    self
      .dispatcher
      .dispatch(self.store.as_ref(), &envelope, subscription.notification_url.as_deref())
      .await;
  }
}

/// A copy-and-paste PIX payload. Shaped like an EMV "BR Code" but never
/// valid for a real bank.
fn pix_code(payment: &Payment) -> String {
  let amount = payment.amount.to_string();
  format!(
    "00020126360014BR.GOV.BCB.PIX0114paysim{id}5204000053039865404{len:02}{amount}5802BR5906PAYSIM6009SAO PAULO6304",
    id = payment.id,
    len = amount.len(),
  )
}

/// A 47-digit boleto "linha digitável" derived from the payment id and
/// amount.
fn boleto_line(payment: &Payment) -> String {
  let seed: String = payment
    .id
    .bytes()
    .map(|b| char::from(b'0' + b % 10))
    .collect();
  let cents: String = payment.amount.to_string().chars().filter(char::is_ascii_digit).collect();
  let line = format!("23790{seed}{cents:0>10}");
  line.chars().chain(std::iter::repeat('0')).take(47).collect()
}

#[cfg(test)]
mod tests {
  use std::{str::FromStr, time::Duration};

  use paysim_core::{
    card::CardInput,
    payment::{Payer, PaymentRequest},
    rule::RuleRequest,
    store::DeliveryLogQuery,
    webhook::WebhookRequest,
  };
  use paysim_store_sqlite::SqliteStore;
  use rust_decimal::Decimal;
  use serde_json::json;

  use super::*;
  use crate::testing::{Receiver, gateway};

  fn card_payment(number: &str) -> PaymentRequest {
    PaymentRequest {
      amount: Some(Decimal::from_str("150.00").unwrap()),
      payment_method: Some("credit_card".into()),
      card: Some(CardInput::new(number)),
      payer: Some(Payer { email: Some("aluno@academia.test".into()), ..Payer::default() }),
      ..PaymentRequest::default()
    }
  }

  fn pix_payment() -> PaymentRequest {
    PaymentRequest {
      amount: Some(Decimal::from_str("49.90").unwrap()),
      payment_method: Some("pix".into()),
      ..PaymentRequest::default()
    }
  }

  async fn listen(gw: &Gateway<SqliteStore>, url: String, events: &[&str]) {
    gw.create_webhook(WebhookRequest {
      url: Some(url),
      events: Some(events.iter().map(|e| (*e).to_owned()).collect()),
      ..WebhookRequest::default()
    })
    .await
    .unwrap();
  }

  async fn logs_for(gw: &Gateway<SqliteStore>, id: &str) -> usize {
    gw.list_delivery_logs(&DeliveryLogQuery { resource_id: Some(id.into()), ..Default::default() })
      .await
      .unwrap()
      .len()
  }

  #[tokio::test]
  async fn approved_card_payment_notifies_interested_listeners_once() {
    let gw = gateway().await;
    let receiver = Receiver::start().await;
    listen(&gw, receiver.url("/all"), &["*"]).await;
    listen(&gw, receiver.url("/created"), &["payment.created"]).await;
    listen(&gw, receiver.url("/updated"), &["payment.updated"]).await;

    let payment = gw.create_payment(card_payment("4111111111110001")).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    assert_eq!(payment.status_detail, "accredited");
    assert_eq!(payment.card.as_ref().unwrap().last_four_digits, "0001");
    assert!(payment.date_approved.is_some());

    assert_eq!(receiver.hits_for("/all").len(), 1);
    assert_eq!(receiver.hits_for("/created").len(), 1);
    assert!(receiver.hits_for("/updated").is_empty());
    assert_eq!(receiver.hits_for("/all")[0].json()["type"], "payment.created");
    assert_eq!(logs_for(&gw, &payment.id).await, 2);

    let stored = gw.get_payment(&payment.id).await.unwrap();
    assert_eq!(stored, payment);
  }

  #[tokio::test]
  async fn notification_url_without_listeners_logs_one_delivery() {
    let gw = gateway().await;
    let receiver = Receiver::start().await;
    let mut req = pix_payment();
    req.notification_url = Some(receiver.url("/notify"));

    let payment = gw.create_payment(req).await.unwrap();
    let logs = gw
      .list_delivery_logs(&DeliveryLogQuery { resource_id: Some(payment.id.clone()), ..Default::default() })
      .await
      .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].url, receiver.url("/notify"));
    assert!(logs[0].webhook_subscription_id.is_none());
  }

  #[tokio::test]
  async fn failed_delivery_does_not_fail_creation() {
    let gw = gateway().await;
    listen(&gw, "http://127.0.0.1:9/down".into(), &["*"]).await;
    let payment = gw.create_payment(card_payment("4111111111110002")).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Rejected);
    let logs = gw.list_delivery_logs(&DeliveryLogQuery::default()).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
  }

  #[tokio::test]
  async fn override_beats_rule_and_card() {
    let gw = gateway().await;
    gw.create_rule(RuleRequest {
      name: Some("reject big".into()),
      status: Some("rejected".into()),
      conditions: [("amount".to_owned(), json!("150.00"))].into(),
      ..RuleRequest::default()
    })
    .await
    .unwrap();

    let by_rule = gw.create_payment(card_payment("4111111111110001")).await.unwrap();
    assert_eq!(by_rule.status, PaymentStatus::Rejected);
    assert_eq!(by_rule.simulation.source, OutcomeSource::Rule);

    let mut forced = card_payment("4111111111110001");
    forced.simulate_status = Some("in_process".into());
    let by_override = gw.create_payment(forced).await.unwrap();
    assert_eq!(by_override.status, PaymentStatus::InProcess);
    assert_eq!(by_override.simulation.source, OutcomeSource::Override);
  }

  #[tokio::test]
  async fn capture_replay_is_a_conflict_with_no_extra_delivery() {
    let gw = gateway().await;
    let receiver = Receiver::start().await;
    listen(&gw, receiver.url("/all"), &["*"]).await;

    let payment = gw.create_payment(card_payment("4111111111110003")).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(
      payment.point_of_interaction.as_ref().and_then(|p| p.init_point.as_deref()),
      Some(format!("http://paysim.test/checkout/{}", payment.id).as_str())
    );

    let captured = gw.capture(&payment.id).await.unwrap();
    assert_eq!(captured.status, PaymentStatus::Approved);
    assert_eq!(logs_for(&gw, &payment.id).await, 2);

    let err = gw.capture(&payment.id).await.unwrap_err();
    assert_eq!(err.kind(), paysim_core::ErrorKind::Conflict);
    assert_eq!(logs_for(&gw, &payment.id).await, 2);
  }

  #[tokio::test]
  async fn refund_and_terminal_states() {
    let gw = gateway().await;
    let payment = gw.create_payment(card_payment("4111111111110001")).await.unwrap();
    let refunded = gw.refund(&payment.id).await.unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.transaction_amount_refunded, refunded.amount);
    assert!(gw.cancel(&payment.id).await.is_err());

    let rejected = gw.create_payment(card_payment("4111111111110002")).await.unwrap();
    assert_eq!(gw.capture(&rejected.id).await.unwrap_err().kind(), paysim_core::ErrorKind::Conflict);
  }

  #[tokio::test]
  async fn pix_confirm_approves_and_notifies() {
    let gw = gateway().await;
    let receiver = Receiver::start().await;
    listen(&gw, receiver.url("/all"), &["*"]).await;

    let payment = gw.create_payment(pix_payment()).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.status_detail, "pending_waiting_payment");
    let poi = payment.point_of_interaction.clone().unwrap();
    assert!(poi.qr_code.unwrap().contains(&payment.id));
    assert_eq!(poi.ticket_url.unwrap(), format!("http://paysim.test/pix/{}", payment.id));

    let confirmed = gw
      .confirm_pix(&payment.id, PixConfirmation { status: Some("approved".into()) })
      .await
      .unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Approved);
    assert!(confirmed.date_approved.is_some());
    assert_eq!(receiver.hits_for("/all").len(), 2);
    assert_eq!(receiver.hits_for("/all")[1].json()["type"], "payment.updated");

    assert!(gw.confirm_pix(&payment.id, PixConfirmation::default()).await.is_err());
  }

  #[tokio::test]
  async fn pix_confirm_rejects_card_payments() {
    let gw = gateway().await;
    let payment = gw.create_payment(card_payment("4111111111110003")).await.unwrap();
    let err = gw.confirm_pix(&payment.id, PixConfirmation::default()).await.unwrap_err();
    assert_eq!(err.kind(), paysim_core::ErrorKind::Validation);
  }

  #[tokio::test]
  async fn boleto_gets_a_barcode() {
    let gw = gateway().await;
    let mut req = pix_payment();
    req.payment_method = Some("boleto".into());
    let payment = gw.create_payment(req).await.unwrap();
    let barcode = payment.point_of_interaction.unwrap().barcode.unwrap();
    assert_eq!(barcode.len(), 47);
    assert!(barcode.chars().all(|c| c.is_ascii_digit()));
  }

  #[tokio::test]
  async fn checkout_resolves_pending_card_payment() {
    let gw = gateway().await;
    let pending = gw.create_payment(card_payment("4111111111110003")).await.unwrap();

    let still_pending = gw
      .process_checkout(&pending.id, CheckoutForm {
        card_number: Some("4111 1111 1111 0003".into()),
        ..CheckoutForm::default()
      })
      .await
      .unwrap();
    assert_eq!(still_pending, pending);

    let approved = gw
      .process_checkout(&pending.id, CheckoutForm {
        card_number: Some("5031 4332 1540 0001".into()),
        cardholder_name: Some("APRO".into()),
        payment_method: Some("debit_card".into()),
      })
      .await
      .unwrap();
    assert_eq!(approved.status, PaymentStatus::Approved);
    assert_eq!(approved.payment_method, PaymentMethod::DebitCard);
    assert_eq!(approved.simulation.source, OutcomeSource::CardNumber);

    let again = gw
      .process_checkout(&pending.id, CheckoutForm {
        card_number: Some("4111111111110001".into()),
        ..CheckoutForm::default()
      })
      .await
      .unwrap_err();
    assert_eq!(again.kind(), paysim_core::ErrorKind::Conflict);

    // A settled payment is a conflict before the form is even looked at.
    let garbage = gw
      .process_checkout(&pending.id, CheckoutForm {
        card_number: Some("12".into()),
        payment_method: Some("cheque".into()),
        ..CheckoutForm::default()
      })
      .await
      .unwrap_err();
    assert_eq!(garbage.kind(), paysim_core::ErrorKind::Conflict);
  }

  #[tokio::test]
  async fn checkout_cannot_turn_pix_into_a_card_payment() {
    let gw = gateway().await;
    let pix = gw.create_payment(pix_payment()).await.unwrap();
    assert_eq!(pix.status, PaymentStatus::Pending);

    let err = gw
      .process_checkout(&pix.id, CheckoutForm {
        card_number: Some("4111111111110001".into()),
        payment_method: Some("credit_card".into()),
        ..CheckoutForm::default()
      })
      .await
      .unwrap_err();
    assert_eq!(err.kind(), paysim_core::ErrorKind::Validation);

    let stored = gw.get_payment(&pix.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert_eq!(stored.payment_method, PaymentMethod::Pix);
    assert!(stored.card.is_none());
  }

  #[tokio::test]
  async fn card_0007_waits_for_an_explicit_chargeback() {
    let gw = gateway().await;
    let payment = gw.create_payment(card_payment("4111111111110007")).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    assert!(payment.chargeback_scheduled);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = gw.get_payment(&payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Approved);
    assert!(stored.chargeback_scheduled);

    let charged = gw
      .simulate(SimulateRequest {
        payment_id: Some(payment.id.clone()),
        status: Some("charged_back".into()),
        ..SimulateRequest::default()
      })
      .await
      .unwrap();
    assert_eq!(charged.status, PaymentStatus::ChargedBack);
    assert!(!charged.chargeback_scheduled);
  }

  #[tokio::test]
  async fn simulate_accepts_aliases() {
    let gw = gateway().await;
    let payment = gw.create_payment(card_payment("4111111111110004")).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::InProcess);

    let declined = gw
      .simulate(SimulateRequest {
        payment_id: Some(payment.id.clone()),
        status: Some("cc_rejected_high_risk".into()),
        status_detail: None,
      })
      .await
      .unwrap();
    assert_eq!(declined.status, PaymentStatus::Rejected);
    assert_eq!(declined.status_detail, "cc_rejected_high_risk");

    let missing = gw
      .simulate(SimulateRequest {
        payment_id: Some("pay_nope".into()),
        status: Some("approved".into()),
        status_detail: None,
      })
      .await
      .unwrap_err();
    assert_eq!(missing.kind(), paysim_core::ErrorKind::NotFound);
  }
}
