//! Card input validation and the card-number outcome table.
//!
//! Only the last four digits, the detected brand and the holder name survive
//! validation. The full PAN is dropped as soon as [`CardInput::summarize`]
//! returns.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, payment::PaymentStatus};

// ─── Input ───────────────────────────────────────────────────────────────────

/// Card data as submitted by a checkout page or API client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardInput {
  pub number:           String,
  #[serde(default, alias = "cardholder_name")]
  pub holder_name:      Option<String>,
  pub expiration_month: Option<u8>,
  pub expiration_year:  Option<u16>,
  #[serde(default, alias = "cvv")]
  pub security_code:    Option<String>,
}

/// Card network, detected from the number's prefix.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CardBrand {
  Visa,
  Master,
  Amex,
  Elo,
  Hipercard,
  Unknown,
}

/// The persisted view of a card; never holds the full number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSummary {
  pub last_four_digits: String,
  pub brand:            CardBrand,
  pub holder_name:      Option<String>,
}

impl CardInput {
  pub fn new(number: impl Into<String>) -> Self {
    Self { number: number.into(), ..Self::default() }
  }

  /// Validate the card and reduce it to a [`CardSummary`].
  pub fn summarize(&self) -> Result<CardSummary> {
    let digits = normalize_number(&self.number)?;

    if let Some(month) = self.expiration_month
      && !(1..=12).contains(&month)
    {
      return Err(Error::validation(format!(
        "card expiration_month must be 1-12, got {month}"
      )));
    }
    if let Some(code) = &self.security_code
      && (!(code.len() == 3 || code.len() == 4)
        || !code.chars().all(|c| c.is_ascii_digit()))
    {
      return Err(Error::validation("card security_code must be 3 or 4 digits"));
    }

    Ok(CardSummary {
      last_four_digits: digits[digits.len() - 4..].to_owned(),
      brand:            detect_brand(&digits),
      holder_name:      self
        .holder_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned),
    })
  }
}

/// Strip spaces and dashes and check the remainder is 12–19 ASCII digits.
pub fn normalize_number(raw: &str) -> Result<String> {
  let digits: String = raw.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
  if !digits.chars().all(|c| c.is_ascii_digit()) {
    return Err(Error::validation("card number must contain only digits"));
  }
  if !(12..=19).contains(&digits.len()) {
    return Err(Error::validation(format!(
      "card number must be 12-19 digits, got {}",
      digits.len()
    )));
  }
  Ok(digits)
}

/// Brand from the IIN prefix. Elo and Hipercard ranges overlap Visa and
/// Mastercard, so they are checked first.
pub fn detect_brand(digits: &str) -> CardBrand {
  const ELO: &[&str] = &[
    "636368", "438935", "504175", "451416", "636297", "5067", "4576", "4011",
  ];
  const HIPERCARD: &[&str] = &["606282", "3841"];

  if ELO.iter().any(|p| digits.starts_with(p)) {
    return CardBrand::Elo;
  }
  if HIPERCARD.iter().any(|p| digits.starts_with(p)) {
    return CardBrand::Hipercard;
  }
  if digits.starts_with("34") || digits.starts_with("37") {
    return CardBrand::Amex;
  }
  if digits.starts_with('4') {
    return CardBrand::Visa;
  }
  let two: u32 = digits[..2].parse().unwrap_or(0);
  let four: u32 = digits[..4].parse().unwrap_or(0);
  if (51..=55).contains(&two) || (2221..=2720).contains(&four) {
    return CardBrand::Master;
  }
  CardBrand::Unknown
}

// ─── Outcome table ───────────────────────────────────────────────────────────

/// Fixed outcomes selected by the last four digits of a test card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardScenario {
  Approved,
  Rejected,
  Pending,
  InProcess,
  Cancelled,
  Error,
  /// Approved now, charged back shortly afterwards.
  Chargeback,
}

impl CardScenario {
  /// Look up the scenario for a card's last four digits. Suffixes outside
  /// the table return `None` and the caller falls back to the method default.
  pub fn from_last_four(last_four: &str) -> Option<Self> {
    match last_four {
      "0001" => Some(Self::Approved),
      "0002" => Some(Self::Rejected),
      "0003" => Some(Self::Pending),
      "0004" => Some(Self::InProcess),
      "0005" => Some(Self::Cancelled),
      "0006" => Some(Self::Error),
      "0007" => Some(Self::Chargeback),
      _ => None,
    }
  }

  pub fn status(self) -> PaymentStatus {
    match self {
      Self::Approved | Self::Chargeback => PaymentStatus::Approved,
      Self::Rejected => PaymentStatus::Rejected,
      Self::Pending => PaymentStatus::Pending,
      Self::InProcess => PaymentStatus::InProcess,
      Self::Cancelled => PaymentStatus::Cancelled,
      Self::Error => PaymentStatus::Error,
    }
  }

  pub fn status_detail(self) -> &'static str {
    match self {
      Self::Approved | Self::Chargeback => "accredited",
      Self::Rejected => "cc_rejected_other_reason",
      Self::Pending => "pending_contingency",
      Self::InProcess => "pending_review_manual",
      Self::Cancelled => "by_collector",
      Self::Error => "internal_error",
    }
  }

  pub fn schedules_chargeback(self) -> bool { matches!(self, Self::Chargeback) }
}
