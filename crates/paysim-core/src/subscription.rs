//! Subscriptions (preapprovals), plans, and billing-cycle bookkeeping.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  billing::{self, FrequencyType},
  card::{CardInput, CardSummary},
  payment::{Payment, PaymentMethod, PaymentStatus, money, validate_currency},
  webhook::validate_url,
};

// ─── Status ──────────────────────────────────────────────────────────────────

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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionStatus {
  Pending,
  Authorized,
  Paused,
  Cancelled,
}

impl SubscriptionStatus {
  /// `cancelled` is terminal; `paused` and `authorized` toggle.
  pub fn can_transition_to(self, next: Self) -> bool {
    use SubscriptionStatus::*;
    matches!(
      (self, next),
      (Pending, Authorized | Cancelled)
        | (Authorized, Paused | Cancelled)
        | (Paused, Authorized | Cancelled)
    )
  }
}

// ─── Recurrence ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoRecurring {
  pub frequency:          u32,
  pub frequency_type:     FrequencyType,
  pub transaction_amount: Decimal,
  #[serde(default = "default_currency")]
  pub currency_id:        String,
  /// Total number of charges; unlimited when absent.
  #[serde(default)]
  pub repetitions:        Option<u32>,
  /// First billing date; defaults to the creation instant.
  #[serde(default)]
  pub start_date:         Option<DateTime<Utc>>,
}

fn default_currency() -> String { crate::payment::DEFAULT_CURRENCY.to_owned() }

impl AutoRecurring {
  fn validated(mut self) -> Result<Self> {
    if self.frequency == 0 {
      return Err(Error::validation("auto_recurring.frequency must be at least 1"));
    }
    self.transaction_amount = money(self.transaction_amount);
    if self.transaction_amount <= Decimal::ZERO {
      return Err(Error::validation("auto_recurring.transaction_amount must be at least 0.01"));
    }
    if self.repetitions == Some(0) {
      return Err(Error::validation("auto_recurring.repetitions must be at least 1"));
    }
    self.currency_id = validate_currency(Some(&self.currency_id))?;
    Ok(self)
  }
}

/// Running totals the charge generator maintains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summarized {
  pub quotas:              Option<u32>,
  pub charged_quantity:    u32,
  pub charged_amount:      Decimal,
  pub last_charged_date:   Option<DateTime<Utc>>,
  pub last_charged_amount: Option<Decimal>,
}

// ─── Plan ────────────────────────────────────────────────────────────────────

/// A reusable subscription template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
  pub id:             String,
  pub reason:         String,
  pub auto_recurring: AutoRecurring,
  pub back_url:       Option<String>,
  pub date_created:   DateTime<Utc>,
}

/// Body of `POST /api/preapproval_plan`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanRequest {
  pub reason:         Option<String>,
  pub auto_recurring: Option<AutoRecurring>,
  pub back_url:       Option<String>,
}

impl PlanRequest {
  pub fn into_plan(self, id: String, now: DateTime<Utc>) -> Result<Plan> {
    let reason = non_empty(self.reason).ok_or_else(|| Error::validation("reason is required"))?;
    let auto_recurring = self
      .auto_recurring
      .ok_or_else(|| Error::validation("auto_recurring is required"))?
      .validated()?;
    Ok(Plan { id, reason, auto_recurring, back_url: self.back_url, date_created: now })
  }
}

// ─── Subscription ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
  pub id:                  String,
  pub preapproval_plan_id: Option<String>,
  pub status:              SubscriptionStatus,
  pub payer_email:         String,
  pub reason:              String,
  pub auto_recurring:      AutoRecurring,
  pub external_reference:  Option<String>,
  pub card:                Option<CardSummary>,
  pub payment_method_id:   PaymentMethod,
  pub notification_url:    Option<String>,
  pub back_url:            Option<String>,
  /// Advanced by exactly one period per generated charge.
  pub next_payment_date:   DateTime<Utc>,
  pub summarized:          Summarized,
  pub date_created:        DateTime<Utc>,
  pub last_modified:       DateTime<Utc>,
}

impl Subscription {
  pub fn set_status(&mut self, to: SubscriptionStatus, now: DateTime<Utc>) -> Result<()> {
    if !self.status.can_transition_to(to) {
      return Err(Error::InvalidSubscriptionTransition {
        id:   self.id.clone(),
        from: self.status,
        to,
      });
    }
    self.status = to;
    self.last_modified = now;
    Ok(())
  }

  /// Precondition for a billing tick.
  pub fn ensure_chargeable(&self) -> Result<()> {
    if self.status != SubscriptionStatus::Authorized {
      return Err(Error::NotChargeable { id: self.id.clone(), status: self.status });
    }
    if let Some(quotas) = self.summarized.quotas
      && self.summarized.charged_quantity >= quotas
    {
      return Err(Error::QuotasExhausted(self.id.clone()));
    }
    Ok(())
  }

  /// Fold a freshly generated charge into the bookkeeping and move the
  /// billing clock forward one period, whatever the charge's outcome.
  pub fn record_charge(&mut self, payment: &Payment, now: DateTime<Utc>) -> Result<()> {
    let next = billing::advance(
      self.next_payment_date,
      self.auto_recurring.frequency,
      self.auto_recurring.frequency_type,
    )?;

    self.summarized.charged_quantity += 1;
    if payment.status == PaymentStatus::Approved {
      self.summarized.charged_amount = money(self.summarized.charged_amount + payment.amount);
      self.summarized.last_charged_date = Some(now);
      self.summarized.last_charged_amount = Some(payment.amount);
    }
    self.next_payment_date = next;
    self.last_modified = now;
    Ok(())
  }
}

/// Body of `POST /api/preapproval`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionRequest {
  pub preapproval_plan_id: Option<String>,
  pub reason:              Option<String>,
  pub payer_email:         Option<String>,
  pub auto_recurring:      Option<AutoRecurring>,
  pub external_reference:  Option<String>,
  pub card:                Option<CardInput>,
  pub payment_method_id:   Option<String>,
  pub notification_url:    Option<String>,
  pub back_url:            Option<String>,
  /// `authorized` or `pending`.
  pub status:              Option<String>,
}

impl SubscriptionRequest {
  /// Validate and build a subscription. When `plan` is given, its reason and
  /// recurrence fill whatever the request leaves out.
  pub fn into_subscription(
    self,
    id: String,
    plan: Option<&Plan>,
    now: DateTime<Utc>,
  ) -> Result<Subscription> {
    let payer_email = non_empty(self.payer_email)
      .filter(|e| e.contains('@'))
      .ok_or_else(|| Error::validation("a valid payer_email is required"))?;

    let reason = non_empty(self.reason)
      .or_else(|| plan.map(|p| p.reason.clone()))
      .ok_or_else(|| Error::validation("reason is required"))?;

    let auto_recurring = self
      .auto_recurring
      .or_else(|| plan.map(|p| p.auto_recurring.clone()))
      .ok_or_else(|| Error::validation("auto_recurring is required"))?
      .validated()?;

    let payment_method_id = match self.payment_method_id.as_deref() {
      None => PaymentMethod::CreditCard,
      Some(raw) => PaymentMethod::from_method_id(raw)
        .ok_or_else(|| Error::validation(format!("unknown payment_method_id {raw:?}")))?,
    };

    let card = self.card.as_ref().map(CardInput::summarize).transpose()?;

    let status = match self.status.as_deref() {
      None if card.is_some() => SubscriptionStatus::Authorized,
      None => SubscriptionStatus::Pending,
      Some(raw) => match raw.parse() {
        Ok(s @ (SubscriptionStatus::Authorized | SubscriptionStatus::Pending)) => s,
        _ => {
          return Err(Error::validation(format!(
            "a preapproval can only be created as authorized or pending, not {raw:?}"
          )));
        }
      },
    };

    let notification_url = non_empty(self.notification_url)
      .map(|u| validate_url(&u).map(|_| u))
      .transpose()?;

    Ok(Subscription {
      id,
      preapproval_plan_id: plan.map(|p| p.id.clone()),
      status,
      payer_email,
      reason,
      next_payment_date: auto_recurring.start_date.unwrap_or(now),
      summarized: Summarized {
        quotas:              auto_recurring.repetitions,
        charged_quantity:    0,
        charged_amount:      money(Decimal::ZERO),
        last_charged_date:   None,
        last_charged_amount: None,
      },
      auto_recurring,
      external_reference: self.external_reference,
      card,
      payment_method_id,
      notification_url,
      back_url: self.back_url.or_else(|| plan.and_then(|p| p.back_url.clone())),
      date_created: now,
      last_modified: now,
    })
  }
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
  use std::str::FromStr;

  use chrono::TimeZone;

  use super::*;
  use crate::{
    outcome::{OutcomeSource, Resolution},
    payment::PaymentRequest,
  };

  fn monthly(amount: &str) -> AutoRecurring {
    AutoRecurring {
      frequency:          1,
      frequency_type:     FrequencyType::Months,
      transaction_amount: Decimal::from_str(amount).unwrap(),
      currency_id:        "brl".into(),
      repetitions:        None,
      start_date:         Some(Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap()),
    }
  }

  fn request() -> SubscriptionRequest {
    SubscriptionRequest {
      reason: Some("Plano Mensal".into()),
      payer_email: Some("aluno@academia.test".into()),
      auto_recurring: Some(monthly("89.9")),
      card: Some(CardInput::new("5031433215406351")),
      ..SubscriptionRequest::default()
    }
  }

  fn charge(status: PaymentStatus) -> Payment {
    let new = PaymentRequest {
      amount: Some(Decimal::from_str("89.90").unwrap()),
      payment_method: Some("credit_card".into()),
      ..PaymentRequest::default()
    }
    .validate()
    .unwrap();
    let mut p = Payment::new("pay_1".into(), new, Utc::now());
    p.apply_resolution(Resolution {
      status,
      status_detail: status.default_detail(PaymentMethod::CreditCard).into(),
      chargeback: false,
      source: OutcomeSource::Override,
      rule_id: None,
    });
    p
  }

  #[test]
  fn card_makes_subscription_authorized() {
    let sub = request().into_subscription("pre_1".into(), None, Utc::now()).unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Authorized);
    assert_eq!(sub.auto_recurring.currency_id, "BRL");
    assert_eq!(sub.auto_recurring.transaction_amount.to_string(), "89.90");
    assert_eq!(sub.card.as_ref().unwrap().last_four_digits, "6351");

    let mut no_card = request();
    no_card.card = None;
    let sub = no_card.into_subscription("pre_2".into(), None, Utc::now()).unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Pending);
  }

  #[test]
  fn plan_fills_missing_fields() {
    let plan = PlanRequest {
      reason: Some("Plano Anual".into()),
      auto_recurring: Some(monthly("59.90")),
      back_url: Some("https://academia.test/ok".into()),
    }
    .into_plan("plan_1".into(), Utc::now())
    .unwrap();

    let req = SubscriptionRequest {
      payer_email: Some("aluno@academia.test".into()),
      ..SubscriptionRequest::default()
    };
    let sub = req.into_subscription("pre_1".into(), Some(&plan), Utc::now()).unwrap();
    assert_eq!(sub.reason, "Plano Anual");
    assert_eq!(sub.preapproval_plan_id.as_deref(), Some("plan_1"));
    assert_eq!(sub.back_url.as_deref(), Some("https://academia.test/ok"));
  }

  #[test]
  fn sub_cent_recurring_amount_is_rejected() {
    let mut req = request();
    req.auto_recurring = Some(monthly("0.004"));
    let err = req.into_subscription("pre_1".into(), None, Utc::now()).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let mut req = request();
    req.auto_recurring = Some(monthly("0.005"));
    let sub = req.into_subscription("pre_2".into(), None, Utc::now()).unwrap();
    assert_eq!(sub.auto_recurring.transaction_amount.to_string(), "0.01");
  }

  #[test]
  fn creation_status_is_restricted() {
    let mut req = request();
    req.status = Some("paused".into());
    assert!(req.into_subscription("pre_1".into(), None, Utc::now()).is_err());
  }

  #[test]
  fn rejected_charge_still_advances_the_clock() {
    let mut sub = request().into_subscription("pre_1".into(), None, Utc::now()).unwrap();
    let before = sub.next_payment_date;

    sub.record_charge(&charge(PaymentStatus::Rejected), Utc::now()).unwrap();
    assert_eq!(sub.summarized.charged_quantity, 1);
    assert_eq!(sub.summarized.charged_amount.to_string(), "0.00");
    assert!(sub.summarized.last_charged_date.is_none());
    assert_eq!(sub.next_payment_date, Utc.with_ymd_and_hms(2026, 2, 10, 9, 0, 0).unwrap());
    assert_ne!(sub.next_payment_date, before);

    sub.record_charge(&charge(PaymentStatus::Approved), Utc::now()).unwrap();
    assert_eq!(sub.summarized.charged_quantity, 2);
    assert_eq!(sub.summarized.charged_amount.to_string(), "89.90");
    assert_eq!(sub.summarized.last_charged_amount.map(|a| a.to_string()).as_deref(), Some("89.90"));
    assert_eq!(sub.next_payment_date, Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap());
  }

  #[test]
  fn only_authorized_subscriptions_are_chargeable() {
    let mut sub = request().into_subscription("pre_1".into(), None, Utc::now()).unwrap();
    assert!(sub.ensure_chargeable().is_ok());
    sub.set_status(SubscriptionStatus::Paused, Utc::now()).unwrap();
    assert!(matches!(sub.ensure_chargeable(), Err(Error::NotChargeable { .. })));
    sub.set_status(SubscriptionStatus::Cancelled, Utc::now()).unwrap();
    assert!(sub.set_status(SubscriptionStatus::Authorized, Utc::now()).is_err());
  }

  #[test]
  fn quotas_bound_the_number_of_charges() {
    let mut req = request();
    let mut recurring = monthly("10");
    recurring.repetitions = Some(1);
    req.auto_recurring = Some(recurring);
    let mut sub = req.into_subscription("pre_1".into(), None, Utc::now()).unwrap();
    assert_eq!(sub.summarized.quotas, Some(1));
    sub.record_charge(&charge(PaymentStatus::Approved), Utc::now()).unwrap();
    assert!(matches!(sub.ensure_chargeable(), Err(Error::QuotasExhausted(_))));
    assert_eq!(sub.status, SubscriptionStatus::Authorized);
  }
}
