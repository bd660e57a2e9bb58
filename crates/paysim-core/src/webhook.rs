//! Webhook listeners, delivery logs, and the event envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, payment::Payment, subscription::Subscription};

/// Event types the dispatcher emits.
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
pub enum EventType {
  #[serde(rename = "payment.created")]
  #[strum(serialize = "payment.created")]
  PaymentCreated,
  #[serde(rename = "payment.updated")]
  #[strum(serialize = "payment.updated")]
  PaymentUpdated,
  #[serde(rename = "subscription_preapproval")]
  #[strum(serialize = "subscription_preapproval")]
  SubscriptionPreapproval,
}

pub const WILDCARD: &str = "*";

/// Absolute `http`/`https` URL with a non-empty host.
pub fn validate_url(url: &str) -> Result<()> {
  let rest = url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .ok_or_else(|| Error::validation(format!("{url:?} is not an http(s) URL")))?;
  let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
  if host.is_empty() || url.chars().any(char::is_whitespace) {
    return Err(Error::validation(format!("{url:?} is not a valid URL")));
  }
  Ok(())
}

// ─── Listener ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
  pub id:           String,
  pub url:          String,
  pub description:  Option<String>,
  /// Event type names or `*`.
  pub events:       Vec<String>,
  /// HMAC key for `X-Webhook-Signature`.
  pub secret:       String,
  pub active:       bool,
  pub date_created: DateTime<Utc>,
}

impl WebhookSubscription {
  pub fn is_interested(&self, event: EventType) -> bool {
    self.active && self.events.iter().any(|e| e == WILDCARD || e == event.as_ref())
  }
}

/// Body of `POST /api/webhooks`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookRequest {
  pub url:         Option<String>,
  pub description: Option<String>,
  pub events:      Option<Vec<String>>,
  pub secret:      Option<String>,
  pub active:      Option<bool>,
}

impl WebhookRequest {
  /// `generated_secret` is used when the request carries none.
  pub fn into_subscription(
    self,
    id: String,
    generated_secret: String,
    now: DateTime<Utc>,
  ) -> Result<WebhookSubscription> {
    let url = self
      .url
      .map(|u| u.trim().to_owned())
      .filter(|u| !u.is_empty())
      .ok_or_else(|| Error::validation("url is required"))?;
    validate_url(&url)?;

    let events = match self.events {
      None => vec![WILDCARD.to_owned()],
      Some(events) if events.is_empty() => {
        return Err(Error::validation("events must not be empty"));
      }
      Some(events) => {
        for e in &events {
          if e != WILDCARD && e.parse::<EventType>().is_err() {
            return Err(Error::validation(format!("unknown event type {e:?}")));
          }
        }
        events
      }
    };

    let secret = self.secret.filter(|s| !s.is_empty()).unwrap_or(generated_secret);

    Ok(WebhookSubscription {
      id,
      url,
      description: self.description,
      events,
      secret,
      active: self.active.unwrap_or(true),
      date_created: now,
    })
  }
}

// ─── Delivery log ────────────────────────────────────────────────────────────

/// One delivery attempt to one listener. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookDeliveryLog {
  pub id:                      String,
  /// `None` for deliveries to a payment's own `notification_url`.
  pub webhook_subscription_id: Option<String>,
  pub event:                   EventType,
  pub resource_id:             String,
  pub url:                     String,
  pub http_status:             Option<u16>,
  pub success:                 bool,
  pub response_body:           Option<String>,
  /// Transport failure (connect error, timeout) when there was no response.
  pub error:                   Option<String>,
  pub duration_ms:             u64,
  pub sent_at:                 DateTime<Utc>,
}

// ─── Envelope ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeData {
  pub id: String,
}

/// The JSON body POSTed to listeners. The signature covers its exact
/// serialized bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
  pub id:           String,
  #[serde(rename = "type")]
  pub event_type:   EventType,
  pub api_version:  String,
  pub date_created: DateTime<Utc>,
  pub live_mode:    bool,
  pub data:         EnvelopeData,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub payment:      Option<Payment>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub preapproval:  Option<Subscription>,
}

impl WebhookEnvelope {
  pub fn for_payment(
    id: String,
    event_type: EventType,
    api_version: &str,
    payment: &Payment,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      id,
      event_type,
      api_version: api_version.to_owned(),
      date_created: now,
      live_mode: false,
      data: EnvelopeData { id: payment.id.clone() },
      payment: Some(payment.clone()),
      preapproval: None,
    }
  }

  pub fn for_subscription(
    id: String,
    api_version: &str,
    subscription: &Subscription,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      id,
      event_type: EventType::SubscriptionPreapproval,
      api_version: api_version.to_owned(),
      date_created: now,
      live_mode: false,
      data: EnvelopeData { id: subscription.id.clone() },
      payment: None,
      preapproval: Some(subscription.clone()),
    }
  }

  pub fn resource_id(&self) -> &str { &self.data.id }
}
