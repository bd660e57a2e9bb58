//! The outcome resolver: decides the `(status, status_detail)` a new payment
//! is born with.
//!
//! Precedence, first hit wins:
//!
//! 1. an explicit `_simulate_status` override,
//! 2. the highest-priority matching [`Rule`],
//! 3. the card-number table ([`CardScenario`]), card methods only,
//! 4. the method default: PIX and boleto stay `pending`, everything else is
//!    `approved`.
//!
//! A card whose last four digits are not in the table is *not* an error. It
//! falls through to step 4 and the fall-through is logged at `debug`, so a
//! test suite that mistyped a magic card number can find out why its payment
//! was approved.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  card::CardScenario,
  payment::{Payment, PaymentMethod, PaymentStatus},
  rule::{self, Rule},
};

/// Which step produced a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeSource {
  Override,
  Rule,
  CardNumber,
  MethodDefault,
  /// An explicit transition after creation (capture, simulate, PIX confirm…).
  Manual,
}

/// The resolver's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
  pub status:        PaymentStatus,
  pub status_detail: String,
  /// Approve now, charge back later.
  pub chargeback:    bool,
  pub source:        OutcomeSource,
  pub rule_id:       Option<String>,
}

// ─── Forced outcomes ─────────────────────────────────────────────────────────

/// Rejection codes accepted verbatim as `_simulate_status` values.
pub const REJECTION_DETAILS: &[&str] = &[
  "cc_rejected_other_reason",
  "cc_rejected_insufficient_amount",
  "cc_rejected_bad_filled_security_code",
  "cc_rejected_bad_filled_date",
  "cc_rejected_bad_filled_other",
  "cc_rejected_call_for_authorize",
  "cc_rejected_card_disabled",
  "cc_rejected_duplicated_payment",
  "cc_rejected_high_risk",
  "cc_rejected_blacklist",
  "cc_rejected_max_attempts",
];

/// Map a loosely-spelled status to a [`PaymentStatus`] and, for rejection
/// codes, the detail they imply. Returns `None` for anything unrecognised.
pub fn parse_status_alias(raw: &str) -> Option<(PaymentStatus, Option<&'static str>)> {
  let norm = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
  if let Some(detail) = REJECTION_DETAILS.iter().find(|d| **d == norm) {
    return Some((PaymentStatus::Rejected, Some(detail)));
  }
  let status = match norm.as_str() {
    "approved" | "approve" | "accredited" | "accept" | "accepted" | "success" => {
      PaymentStatus::Approved
    }
    "rejected" | "reject" | "decline" | "declined" | "denied" => PaymentStatus::Rejected,
    "pending" => PaymentStatus::Pending,
    "in_process" | "inprocess" | "in_review" | "review" => PaymentStatus::InProcess,
    "cancelled" | "canceled" | "cancel" => PaymentStatus::Cancelled,
    "error" | "fail" | "failed" | "failure" => PaymentStatus::Error,
    "refunded" | "refund" => PaymentStatus::Refunded,
    "charged_back" | "chargeback" | "chargedback" => PaymentStatus::ChargedBack,
    _ => return None,
  };
  Some((status, None))
}

/// An outcome imposed by the caller or by a rule rather than derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedOutcome {
  pub status:        PaymentStatus,
  pub status_detail: Option<String>,
  pub chargeback:    bool,
}

impl ForcedOutcome {
  /// Parse a `_simulate_status` value plus optional detail.
  pub fn parse(raw: &str, detail: Option<&str>) -> Result<Self> {
    let (status, implied) = parse_status_alias(raw)
      .ok_or_else(|| Error::validation(format!("unknown simulated status {raw:?}")))?;
    Self::from_status(status, detail.or(implied))
  }

  /// Build a creation outcome from a status. `charged_back` becomes
  /// "approved, chargeback scheduled"; `refunded` is not a creation outcome.
  pub fn from_status(status: PaymentStatus, detail: Option<&str>) -> Result<Self> {
    let (status, chargeback) = match status {
      PaymentStatus::ChargedBack => (PaymentStatus::Approved, true),
      s if s.is_creation_outcome() => (s, false),
      s => {
        return Err(Error::validation(format!(
          "a payment cannot be created with status {s}"
        )));
      }
    };
    if let Some(d) = detail
      && !status.accepts_detail(d)
    {
      return Err(Error::validation(format!(
        "status_detail {d:?} is not valid for status {status}"
      )));
    }
    Ok(Self { status, status_detail: detail.map(str::to_owned), chargeback })
  }

  fn into_resolution(
    self,
    method: PaymentMethod,
    source: OutcomeSource,
    rule_id: Option<String>,
  ) -> Resolution {
    let status_detail = self
      .status_detail
      .unwrap_or_else(|| self.status.default_detail(method).to_owned());
    Resolution {
      status: self.status,
      status_detail,
      chargeback: self.chargeback,
      source,
      rule_id,
    }
  }
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Decide the outcome for `payment`, a draft that has not been persisted.
///
/// `rules` must be in creation order; see [`rule::first_match`].
pub fn resolve(
  payment: &Payment,
  forced: Option<&ForcedOutcome>,
  rules: &[Rule],
) -> Result<Resolution> {
  let method = payment.payment_method;

  if let Some(forced) = forced {
    return Ok(forced.clone().into_resolution(method, OutcomeSource::Override, None));
  }

  if !rules.is_empty() {
    let tree = payment.match_tree()?;
    if let Some((rule, outcome)) = rule::first_match(rules, &tree) {
      return Ok(outcome.into_resolution(method, OutcomeSource::Rule, Some(rule.id.clone())));
    }
  }

  if method.is_card()
    && let Some(card) = &payment.card
  {
    match CardScenario::from_last_four(&card.last_four_digits) {
      Some(scenario) => {
        return Ok(Resolution {
          status:        scenario.status(),
          status_detail: scenario.status_detail().to_owned(),
          chargeback:    scenario.schedules_chargeback(),
          source:        OutcomeSource::CardNumber,
          rule_id:       None,
        });
      }
      None => tracing::debug!(
        payment_id = %payment.id,
        last_four = %card.last_four_digits,
        "card suffix is not in the outcome table; using the method default"
      ),
    }
  }

  let status = if method.is_deferred() {
    PaymentStatus::Pending
  } else {
    PaymentStatus::Approved
  };
  Ok(Resolution {
    status,
    status_detail: status.default_detail(method).to_owned(),
    chargeback: false,
    source: OutcomeSource::MethodDefault,
    rule_id: None,
  })
}

#[cfg(test)]
mod tests {
  use std::{collections::BTreeMap, str::FromStr};

  use chrono::{Duration, Utc};
  use rust_decimal::Decimal;
  use serde_json::json;

  use super::*;
  use crate::{
    card::CardInput,
    payment::{Payer, PaymentRequest},
  };

  fn draft(method: &str, card: Option<&str>, amount: &str) -> Payment {
    let new = PaymentRequest {
      amount: Some(Decimal::from_str(amount).unwrap()),
      payment_method: Some(method.into()),
      card: card.map(CardInput::new),
      payer: Some(Payer { email: Some("aluno@academia.test".into()), ..Payer::default() }),
      ..PaymentRequest::default()
    }
    .validate()
    .unwrap();
    Payment::new("pay_test".into(), new, Utc::now())
  }

  fn rule(id: &str, status: PaymentStatus, priority: i64, conds: &[(&str, serde_json::Value)]) -> Rule {
    Rule {
      id: id.into(),
      name: id.into(),
      status,
      status_detail: None,
      conditions: conds.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect::<BTreeMap<_, _>>(),
      priority,
      active: true,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn card_table_is_independent_of_amount_and_payer() {
    let cases = [
      ("0001", PaymentStatus::Approved),
      ("0002", PaymentStatus::Rejected),
      ("0003", PaymentStatus::Pending),
      ("0004", PaymentStatus::InProcess),
      ("0005", PaymentStatus::Cancelled),
      ("0006", PaymentStatus::Error),
      ("0007", PaymentStatus::Approved),
    ];
    for amount in ["0.01", "150.00", "99999.99"] {
      for (suffix, status) in cases {
        let p = draft("credit_card", Some(&format!("411111111111{suffix}")), amount);
        let r = resolve(&p, None, &[]).unwrap();
        assert_eq!(r.status, status, "suffix {suffix} amount {amount}");
        assert_eq!(r.source, OutcomeSource::CardNumber);
        assert_eq!(r.chargeback, suffix == "0007");
      }
    }
  }

  #[test]
  fn override_beats_rules_and_card() {
    let p = draft("credit_card", Some("4111111111110001"), "10");
    let rules = [rule("rule_a", PaymentStatus::InProcess, 10, &[("payment_method", json!("credit_card"))])];
    let forced = ForcedOutcome::parse("rejected", None).unwrap();
    let r = resolve(&p, Some(&forced), &rules).unwrap();
    assert_eq!(r.status, PaymentStatus::Rejected);
    assert_eq!(r.status_detail, "cc_rejected_other_reason");
    assert_eq!(r.source, OutcomeSource::Override);
  }

  #[test]
  fn rule_beats_card() {
    let p = draft("credit_card", Some("4111111111110001"), "150");
    let rules = [rule("rule_a", PaymentStatus::Rejected, 0, &[("amount", json!("150.00"))])];
    let r = resolve(&p, None, &rules).unwrap();
    assert_eq!(r.status, PaymentStatus::Rejected);
    assert_eq!(r.source, OutcomeSource::Rule);
    assert_eq!(r.rule_id.as_deref(), Some("rule_a"));
  }

  #[test]
  fn higher_priority_wins_then_earlier_rule() {
    let p = draft("pix", None, "10");
    let cond = [("payer.email", json!("aluno@academia.test"))];
    let mut early = rule("rule_early", PaymentStatus::Rejected, 5, &cond);
    early.created_at = Utc::now() - Duration::seconds(10);
    let late = rule("rule_late", PaymentStatus::Approved, 5, &cond);
    let top = rule("rule_top", PaymentStatus::InProcess, 9, &cond);

    let r = resolve(&p, None, &[early.clone(), late.clone()]).unwrap();
    assert_eq!(r.rule_id.as_deref(), Some("rule_early"));

    let r = resolve(&p, None, &[early, late, top]).unwrap();
    assert_eq!(r.rule_id.as_deref(), Some("rule_top"));
    assert_eq!(r.status, PaymentStatus::InProcess);
  }

  #[test]
  fn method_defaults() {
    let pix = resolve(&draft("pix", None, "10"), None, &[]).unwrap();
    assert_eq!(pix.status, PaymentStatus::Pending);
    assert_eq!(pix.status_detail, "pending_waiting_payment");

    let boleto = resolve(&draft("boleto", None, "10"), None, &[]).unwrap();
    assert_eq!(boleto.status, PaymentStatus::Pending);

    let unknown_card = resolve(&draft("credit_card", Some("4111111111111111"), "10"), None, &[]).unwrap();
    assert_eq!(unknown_card.status, PaymentStatus::Approved);
    assert_eq!(unknown_card.source, OutcomeSource::MethodDefault);

    let money = resolve(&draft("account_money", None, "10"), None, &[]).unwrap();
    assert_eq!(money.status, PaymentStatus::Approved);
  }

  #[test]
  fn rejection_details_are_accepted_as_overrides() {
    let forced = ForcedOutcome::parse("cc_rejected_insufficient_amount", None).unwrap();
    assert_eq!(forced.status, PaymentStatus::Rejected);
    assert_eq!(forced.status_detail.as_deref(), Some("cc_rejected_insufficient_amount"));
  }

  #[test]
  fn chargeback_override_approves_and_flags() {
    let forced = ForcedOutcome::parse("chargeback", None).unwrap();
    assert_eq!(forced.status, PaymentStatus::Approved);
    assert!(forced.chargeback);
  }

  #[test]
  fn bad_overrides_are_validation_errors() {
    assert!(matches!(ForcedOutcome::parse("maybe", None), Err(Error::Validation(_))));
    assert!(matches!(ForcedOutcome::parse("refunded", None), Err(Error::Validation(_))));
    assert!(matches!(
      ForcedOutcome::parse("approved", Some("cc_rejected_high_risk")),
      Err(Error::Validation(_))
    ));
  }
}
