//! Payment types and the payment state machine.
//!
//! A [`Payment`] is created once, with its outcome already decided, and then
//! only moves along the edges allowed by [`PaymentStatus::can_transition_to`].
//! Payments are never deleted.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  card::{CardInput, CardSummary},
  outcome::{ForcedOutcome, OutcomeSource, Resolution},
  webhook::validate_url,
};

// ─── Enums ───────────────────────────────────────────────────────────────────

/// How the payer pays.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
  CreditCard,
  DebitCard,
  Pix,
  Boleto,
  BankTransfer,
  AccountMoney,
}

impl PaymentMethod {
  /// Card-based methods are the only ones the card-number heuristic applies
  /// to.
  pub fn is_card(self) -> bool { matches!(self, Self::CreditCard | Self::DebitCard) }

  /// Methods whose confirmation arrives later (the payer still has to pay
  /// the QR code or the slip).
  pub fn is_deferred(self) -> bool { matches!(self, Self::Pix | Self::Boleto) }

  /// Parse a method name, also accepting provider-style `payment_method_id`
  /// values such as `visa` or `bolbradesco`.
  pub fn from_method_id(raw: &str) -> Option<Self> {
    let raw = raw.trim().to_ascii_lowercase();
    if let Ok(method) = raw.parse() {
      return Some(method);
    }
    match raw.as_str() {
      "visa" | "master" | "mastercard" | "amex" | "elo" | "hipercard" => {
        Some(Self::CreditCard)
      }
      "debvisa" | "debmaster" | "debelo" => Some(Self::DebitCard),
      "bolbradesco" | "ticket" => Some(Self::Boleto),
      "transfer" | "ted" => Some(Self::BankTransfer),
      _ => None,
    }
  }
}

/// Payment status. See [`PaymentStatus::can_transition_to`] for the edges.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
  Pending,
  Approved,
  Rejected,
  InProcess,
  Cancelled,
  Error,
  Refunded,
  ChargedBack,
}

impl PaymentStatus {
  /// The allowed edges:
  ///
  /// - `pending → {approved, rejected, in_process, cancelled, error}`
  /// - `in_process → {approved, rejected, cancelled}`
  /// - `approved → {refunded, charged_back}`
  ///
  /// Self-loops are not transitions.
  pub fn can_transition_to(self, next: Self) -> bool {
    use PaymentStatus::*;
    matches!(
      (self, next),
      (Pending, Approved | Rejected | InProcess | Cancelled | Error)
        | (InProcess, Approved | Rejected | Cancelled)
        | (Approved, Refunded | ChargedBack)
    )
  }

  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      Self::Rejected | Self::Cancelled | Self::Error | Self::Refunded | Self::ChargedBack
    )
  }

  /// Statuses a payment may be born with.
  pub fn is_creation_outcome(self) -> bool {
    matches!(
      self,
      Self::Pending
        | Self::Approved
        | Self::Rejected
        | Self::InProcess
        | Self::Cancelled
        | Self::Error
    )
  }

  /// The machine code paired with this status when none is given.
  pub fn default_detail(self, method: PaymentMethod) -> &'static str {
    match self {
      Self::Pending if method.is_deferred() => "pending_waiting_payment",
      Self::Pending => "pending_contingency",
      Self::Approved => "accredited",
      Self::Rejected if method.is_card() => "cc_rejected_other_reason",
      Self::Rejected => "rejected_by_bank",
      Self::InProcess => "pending_review_manual",
      Self::Cancelled => "by_collector",
      Self::Error => "internal_error",
      Self::Refunded => "refunded",
      Self::ChargedBack => "settled",
    }
  }

  /// Whether `detail` can be paired with this status: rejection codes only
  /// with `rejected`, `pending_*` codes only with `pending`/`in_process`.
  pub fn accepts_detail(self, detail: &str) -> bool {
    let rejection = detail.starts_with("cc_rejected_") || detail.starts_with("rejected_");
    let pending = detail.starts_with("pending_");
    match self {
      Self::Rejected => rejection,
      Self::Pending | Self::InProcess => pending,
      _ => !rejection && !pending && !detail.is_empty(),
    }
  }
}

// ─── Sub-records ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
  pub name:     Option<String>,
  pub email:    Option<String>,
  /// CPF/CNPJ or other tax document, free-form.
  pub document: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
  pub id:         Option<String>,
  pub title:      String,
  #[serde(default = "one")]
  pub quantity:   u32,
  pub unit_price: Decimal,
}

fn one() -> u32 { 1 }

/// Where and how a deferred payment is completed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointOfInteraction {
  /// PIX copy-and-paste code.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub qr_code:    Option<String>,
  /// Boleto digitable line.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub barcode:    Option<String>,
  /// Hosted page the payer visits (PIX page).
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ticket_url: Option<String>,
  /// Hosted card checkout for card payments left pending.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub init_point: Option<String>,
}

/// Which resolver step produced the payment's current status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Simulation {
  pub source:  OutcomeSource,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub rule_id: Option<String>,
}

// ─── Payment ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
  pub id:                          String,
  pub amount:                      Decimal,
  pub currency:                    String,
  pub payment_method:              PaymentMethod,
  pub status:                      PaymentStatus,
  pub status_detail:               String,
  pub payer:                       Payer,
  pub card:                        Option<CardSummary>,
  pub installments:                u32,
  pub external_reference:          Option<String>,
  pub description:                 Option<String>,
  pub items:                       Vec<Item>,
  pub notification_url:            Option<String>,
  pub metadata:                    Option<serde_json::Value>,
  /// The subscription this charge was generated for, if any.
  pub preapproval_id:              Option<String>,
  pub simulation:                  Simulation,
  /// Set when the outcome asks for a follow-up `charged_back` transition.
  pub chargeback_scheduled:        bool,
  pub point_of_interaction:        Option<PointOfInteraction>,
  pub transaction_amount_refunded: Decimal,
  pub created_at:                  DateTime<Utc>,
  pub date_approved:               Option<DateTime<Utc>>,
  pub date_last_updated:           DateTime<Utc>,
}

impl Payment {
  /// Build a draft payment from validated input. The draft is `pending`
  /// until [`Payment::apply_resolution`] records the resolver's decision.
  pub fn new(id: String, input: NewPayment, now: DateTime<Utc>) -> Self {
    Self {
      id,
      amount: input.amount,
      currency: input.currency,
      payment_method: input.payment_method,
      status: PaymentStatus::Pending,
      status_detail: PaymentStatus::Pending
        .default_detail(input.payment_method)
        .to_owned(),
      payer: input.payer,
      card: input.card,
      installments: input.installments,
      external_reference: input.external_reference,
      description: input.description,
      items: input.items,
      notification_url: input.notification_url,
      metadata: input.metadata,
      preapproval_id: input.preapproval_id,
      simulation: Simulation { source: OutcomeSource::MethodDefault, rule_id: None },
      chargeback_scheduled: false,
      point_of_interaction: None,
      transaction_amount_refunded: money(Decimal::ZERO),
      created_at: now,
      date_approved: None,
      date_last_updated: now,
    }
  }

  pub fn apply_resolution(&mut self, resolution: Resolution) {
    self.status = resolution.status;
    self.status_detail = resolution.status_detail;
    self.chargeback_scheduled = resolution.chargeback;
    self.simulation = Simulation { source: resolution.source, rule_id: resolution.rule_id };
    if self.status == PaymentStatus::Approved {
      self.date_approved = Some(self.created_at);
    }
  }

  /// Move to `to`, checking the state machine. The caller persists the
  /// result with a compare-and-set on the previous status.
  pub fn transition(
    &mut self,
    to: PaymentStatus,
    detail: Option<&str>,
    source: OutcomeSource,
    now: DateTime<Utc>,
  ) -> Result<()> {
    if !self.status.can_transition_to(to) {
      return Err(Error::InvalidTransition {
        id:   self.id.clone(),
        from: self.status,
        to,
      });
    }
    let detail = match detail {
      Some(d) if to.accepts_detail(d) => d.to_owned(),
      Some(d) => {
        return Err(Error::validation(format!(
          "status_detail {d:?} is not valid for status {to}"
        )));
      }
      None => to.default_detail(self.payment_method).to_owned(),
    };

    self.status = to;
    self.status_detail = detail;
    self.simulation = Simulation { source, rule_id: None };
    self.date_last_updated = now;
    match to {
      PaymentStatus::Approved => self.date_approved = Some(now),
      PaymentStatus::Refunded => self.transaction_amount_refunded = self.amount,
      PaymentStatus::ChargedBack => self.chargeback_scheduled = false,
      _ => {}
    }
    Ok(())
  }

  /// The JSON tree rule conditions are evaluated against.
  pub fn match_tree(&self) -> Result<serde_json::Value> { Ok(serde_json::to_value(self)?) }
}

/// Round half away from zero to cents and pin the scale so `150` renders as
/// `"150.00"`.
pub fn money(value: Decimal) -> Decimal {
  let mut v = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
  v.rescale(2);
  v
}

// ─── Request ─────────────────────────────────────────────────────────────────

/// Body of `POST /api/payments`. Every field is optional at the wire level so
/// missing values surface as validation errors rather than decode failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentRequest {
  #[serde(alias = "transaction_amount")]
  pub amount:                 Option<Decimal>,
  #[serde(alias = "currency_id")]
  pub currency:               Option<String>,
  #[serde(alias = "payment_method_id")]
  pub payment_method:         Option<String>,
  pub card:                   Option<CardInput>,
  pub payer:                  Option<Payer>,
  pub description:            Option<String>,
  pub installments:           Option<u32>,
  pub external_reference:     Option<String>,
  #[serde(default)]
  pub items:                  Vec<Item>,
  pub notification_url:       Option<String>,
  pub metadata:               Option<serde_json::Value>,
  #[serde(rename = "_simulate_status")]
  pub simulate_status:        Option<String>,
  #[serde(rename = "_simulate_status_detail")]
  pub simulate_status_detail: Option<String>,
}

/// A validated payment request, ready for the resolver.
#[derive(Debug, Clone)]
pub struct NewPayment {
  pub amount:             Decimal,
  pub currency:           String,
  pub payment_method:     PaymentMethod,
  pub card:               Option<CardSummary>,
  pub payer:              Payer,
  pub installments:       u32,
  pub external_reference: Option<String>,
  pub description:        Option<String>,
  pub items:              Vec<Item>,
  pub notification_url:   Option<String>,
  pub metadata:           Option<serde_json::Value>,
  pub preapproval_id:     Option<String>,
  pub forced:             Option<ForcedOutcome>,
}

pub const DEFAULT_CURRENCY: &str = "BRL";
pub const MAX_INSTALLMENTS: u32 = 24;

impl PaymentRequest {
  pub fn validate(self) -> Result<NewPayment> {
    let amount = self
      .amount
      .map(money)
      .ok_or_else(|| Error::validation("amount is required"))?;
    if amount <= Decimal::ZERO {
      return Err(Error::validation("amount must be at least 0.01"));
    }

    let method_raw = self
      .payment_method
      .ok_or_else(|| Error::validation("payment_method is required"))?;
    let payment_method = PaymentMethod::from_method_id(&method_raw).ok_or_else(|| {
      Error::validation(format!("unknown payment_method {method_raw:?}"))
    })?;

    let currency = validate_currency(self.currency.as_deref())?;

    let card = match (self.card, payment_method.is_card()) {
      (Some(card), true) => Some(card.summarize()?),
      (Some(_), false) => {
        return Err(Error::validation(format!(
          "card data is not accepted for payment_method {payment_method}"
        )));
      }
      (None, _) => None,
    };

    let installments = self.installments.unwrap_or(1);
    let max = if payment_method == PaymentMethod::CreditCard { MAX_INSTALLMENTS } else { 1 };
    if !(1..=max).contains(&installments) {
      return Err(Error::validation(format!(
        "installments must be between 1 and {max} for {payment_method}"
      )));
    }

    for item in &self.items {
      if item.title.trim().is_empty() || item.quantity == 0 || item.unit_price < Decimal::ZERO {
        return Err(Error::validation(
          "items need a title, a positive quantity and a non-negative unit_price",
        ));
      }
    }

    let notification_url = self
      .notification_url
      .filter(|u| !u.trim().is_empty())
      .map(|u| validate_url(&u).map(|_| u))
      .transpose()?;

    let forced = self
      .simulate_status
      .as_deref()
      .map(|s| ForcedOutcome::parse(s, self.simulate_status_detail.as_deref()))
      .transpose()?;

    Ok(NewPayment {
      amount,
      currency,
      payment_method,
      card,
      payer: self.payer.unwrap_or_default(),
      installments,
      external_reference: self.external_reference,
      description: self.description,
      items: self.items,
      notification_url,
      metadata: self.metadata,
      preapproval_id: None,
      forced,
    })
  }
}

/// Uppercase ISO-4217-shaped code; defaults to BRL.
pub fn validate_currency(raw: Option<&str>) -> Result<String> {
  let Some(raw) = raw else {
    return Ok(DEFAULT_CURRENCY.to_owned());
  };
  let code = raw.trim().to_ascii_uppercase();
  if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
    return Err(Error::validation(format!("invalid currency {raw:?}")));
  }
  Ok(code)
}
