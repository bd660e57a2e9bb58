//! Encoding helpers between domain types and the text stored in SQLite.
//!
//! Timestamps in indexed columns are fixed-width RFC 3339 strings (nanosecond
//! precision, `Z` suffix) so they compare and sort as text. Documents are
//! compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use paysim_core::{payment::Payment, subscription::Subscription};
use serde::{Serialize, de::DeserializeOwned};

use crate::Result;

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Nanos, true) }

pub fn encode_doc<T: Serialize>(value: &T) -> Result<String> { Ok(serde_json::to_string(value)?) }

pub fn decode_doc<T: DeserializeOwned>(doc: &str) -> Result<T> { Ok(serde_json::from_str(doc)?) }

pub fn decode_docs<T: DeserializeOwned>(docs: Vec<String>) -> Result<Vec<T>> {
  docs.iter().map(|d| decode_doc(d)).collect()
}

/// SQLite wants `i64` for `LIMIT`; `-1` means unbounded.
pub fn encode_limit(limit: Option<usize>) -> i64 {
  limit.and_then(|l| i64::try_from(l).ok()).unwrap_or(-1)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column values for a `payments` row.
pub struct PaymentRow {
  pub id:                 String,
  pub status:             String,
  pub payment_method:     String,
  pub external_reference: Option<String>,
  pub preapproval_id:     Option<String>,
  pub created_at:         String,
  pub doc:                String,
}

impl PaymentRow {
  pub fn new(p: &Payment) -> Result<Self> {
    Ok(Self {
      id:                 p.id.clone(),
      status:             p.status.as_ref().to_owned(),
      payment_method:     p.payment_method.as_ref().to_owned(),
      external_reference: p.external_reference.clone(),
      preapproval_id:     p.preapproval_id.clone(),
      created_at:         encode_dt(p.created_at),
      doc:                encode_doc(p)?,
    })
  }

  pub fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<usize> {
    conn.execute(
      "INSERT INTO payments (
         id, status, payment_method, external_reference, preapproval_id,
         created_at, doc
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      rusqlite::params![
        self.id,
        self.status,
        self.payment_method,
        self.external_reference,
        self.preapproval_id,
        self.created_at,
        self.doc,
      ],
    )
  }
}

/// Column values for a `subscriptions` row.
pub struct SubscriptionRow {
  pub id:                  String,
  pub status:              String,
  pub payer_email:         String,
  pub preapproval_plan_id: Option<String>,
  pub next_payment_date:   String,
  pub doc:                 String,
}

impl SubscriptionRow {
  pub fn new(s: &Subscription) -> Result<Self> {
    Ok(Self {
      id:                  s.id.clone(),
      status:              s.status.as_ref().to_owned(),
      payer_email:         s.payer_email.clone(),
      preapproval_plan_id: s.preapproval_plan_id.clone(),
      next_payment_date:   encode_dt(s.next_payment_date),
      doc:                 encode_doc(s)?,
    })
  }
}
