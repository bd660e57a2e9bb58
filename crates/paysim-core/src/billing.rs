//! Billing-period arithmetic.

use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FrequencyType {
  Days,
  Months,
  Years,
}

/// Advance `from` by `frequency` units of `frequency_type`.
///
/// Month arithmetic is calendar-based and clamps to the last day of the
/// target month (Jan 31 + 1 month = Feb 28/29).
pub fn advance(
  from: DateTime<Utc>,
  frequency: u32,
  frequency_type: FrequencyType,
) -> Result<DateTime<Utc>> {
  let next = match frequency_type {
    FrequencyType::Days => from.checked_add_days(Days::new(u64::from(frequency))),
    FrequencyType::Months => from.checked_add_months(Months::new(frequency)),
    FrequencyType::Years => frequency
      .checked_mul(12)
      .and_then(|m| from.checked_add_months(Months::new(m))),
  };
  next.ok_or_else(|| {
    Error::validation(format!(
      "billing period of {frequency} {frequency_type} overflows the calendar"
    ))
  })
}
