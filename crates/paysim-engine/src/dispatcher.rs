//! Signed webhook delivery.
//!
//! One event goes to every interested listener plus the resource's own
//! `notification_url`. Each target gets its own task, a single attempt
//! bounded by the configured timeout, and exactly one delivery log row. The
//! call returns only after every target has been attempted and logged.

use std::{collections::HashMap, time::Instant};

use chrono::Utc;
use paysim_core::{
  id,
  store::GatewayStore,
  webhook::{EventType, WebhookDeliveryLog, WebhookEnvelope},
};
use reqwest::{Client, header};
use tokio::task::{Id, JoinSet};

use crate::{GatewayConfig, Result, signature};

const USER_AGENT: &str = concat!("paysim-webhooks/", env!("CARGO_PKG_VERSION"));

/// A single delivery destination.
#[derive(Debug, Clone)]
struct Target {
  webhook_id: Option<String>,
  url:        String,
  secret:     String,
}

#[derive(Clone)]
pub struct Dispatcher {
  client:              Client,
  notification_secret: String,
  response_body_limit: usize,
}

impl Dispatcher {
  pub fn new(config: &GatewayConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(config.webhook_timeout)
      .user_agent(USER_AGENT)
      .build()?;
    Ok(Self {
      client,
      notification_secret: config.notification_secret.clone(),
      response_body_limit: config.response_body_limit,
    })
  }

  /// Deliver `envelope` and persist one log per target.
  ///
  /// Never fails: transport errors and non-2xx responses end up in the logs,
  /// and a store error while listing listeners or writing logs is reported
  /// with `tracing::error!` only.
  pub async fn dispatch<S: GatewayStore>(
    &self,
    store: &S,
    envelope: &WebhookEnvelope,
    notification_url: Option<&str>,
  ) -> Vec<WebhookDeliveryLog> {
    let event = envelope.event_type;
    let resource_id = envelope.resource_id().to_owned();

    let mut targets: Vec<Target> = match store.list_webhooks().await {
      Ok(listeners) => listeners
        .into_iter()
        .filter(|l| l.is_interested(event))
        .map(|l| Target { webhook_id: Some(l.id), url: l.url, secret: l.secret })
        .collect(),
      Err(e) => {
        tracing::error!(%event, error = %e, "could not list webhook listeners");
        Vec::new()
      }
    };
    if let Some(url) = notification_url {
      targets.push(Target {
        webhook_id: None,
        url:        url.to_owned(),
        secret:     self.notification_secret.clone(),
      });
    }
    if targets.is_empty() {
      tracing::debug!(%event, resource_id = %resource_id, "no webhook targets");
      return Vec::new();
    }

    let body = match serde_json::to_vec(envelope) {
      Ok(b) => b,
      Err(e) => {
        tracing::error!(%event, resource_id = %resource_id, error = %e, "could not serialize envelope");
        return Vec::new();
      }
    };

    let mut tasks = JoinSet::new();
    let mut attempts = HashMap::new();
    for (index, target) in targets.into_iter().enumerate() {
      let log = attempt_log(&target, event, &resource_id);
      let client = self.client.clone();
      let body = body.clone();
      let limit = self.response_body_limit;
      let handle = tasks.spawn(deliver(client, target, log.clone(), body, limit));
      attempts.insert(handle.id(), (index, log));
    }
    let logs = join_deliveries(tasks, attempts).await;

    for log in &logs {
      if let Err(e) = store.insert_delivery_log(log).await {
        tracing::error!(delivery_id = %log.id, error = %e, "could not write delivery log");
      }
    }
    logs
  }
}

/// Wait for every delivery task, in target order. A task that panicked still
/// yields its attempt's log, marked failed.
async fn join_deliveries(
  mut tasks: JoinSet<WebhookDeliveryLog>,
  mut attempts: HashMap<Id, (usize, WebhookDeliveryLog)>,
) -> Vec<WebhookDeliveryLog> {
  let mut logs = Vec::with_capacity(attempts.len());
  while let Some(joined) = tasks.join_next_with_id().await {
    match joined {
      Ok((task, log)) => {
        if let Some((index, _)) = attempts.remove(&task) {
          logs.push((index, log));
        }
      }
      Err(e) => {
        let Some((index, mut log)) = attempts.remove(&e.id()) else { continue };
        tracing::error!(event = %log.event, url = %log.url, error = %e, "delivery task failed");
        log.error = Some(format!("delivery task failed: {e}"));
        logs.push((index, log));
      }
    }
  }
  logs.sort_by_key(|(index, _)| *index);
  logs.into_iter().map(|(_, log)| log).collect()
}

/// The log row for one attempt, before anything is sent.
fn attempt_log(target: &Target, event: EventType, resource_id: &str) -> WebhookDeliveryLog {
  WebhookDeliveryLog {
    id: id::generate(id::DELIVERY),
    webhook_subscription_id: target.webhook_id.clone(),
    event,
    resource_id: resource_id.to_owned(),
    url: target.url.clone(),
    http_status: None,
    success: false,
    response_body: None,
    error: None,
    duration_ms: 0,
    sent_at: Utc::now(),
  }
}

async fn deliver(
  client: Client,
  target: Target,
  mut log: WebhookDeliveryLog,
  body: Vec<u8>,
  limit: usize,
) -> WebhookDeliveryLog {
  let event = log.event;
  let started = Instant::now();

  let signature = match signature::sign(&target.secret, &body) {
    Ok(s) => s,
    Err(e) => {
      log.error = Some(format!("could not sign payload: {e}"));
      return log;
    }
  };

  let sent = client
    .post(&target.url)
    .header(header::CONTENT_TYPE, "application/json")
    .header(signature::EVENT_HEADER, event.as_ref())
    .header(signature::DELIVERY_HEADER, &log.id)
    .header(signature::SIGNATURE_HEADER, signature)
    .body(body)
    .send()
    .await;

  match sent {
    Ok(resp) => {
      let status = resp.status();
      log.http_status = Some(status.as_u16());
      log.success = status.is_success();
      match resp.text().await {
        Ok(text) => log.response_body = Some(truncate(&text, limit)),
        Err(e) => log.error = Some(format!("could not read response body: {e}")),
      }
    }
    Err(e) => {
      log.http_status = e.status().map(|s| s.as_u16());
      log.error = Some(if e.is_timeout() {
        format!("timed out: {e}")
      } else {
        e.to_string()
      });
    }
  }
  log.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

  if log.success {
    tracing::info!(
      %event,
      delivery_id = %log.id,
      url = %log.url,
      http_status = ?log.http_status,
      duration_ms = log.duration_ms,
      "webhook delivered"
    );
  } else {
    tracing::warn!(
      %event,
      delivery_id = %log.id,
      url = %log.url,
      http_status = ?log.http_status,
      error = ?log.error,
      "webhook delivery failed"
    );
  }
  log
}

/// At most `limit` characters, cut on a char boundary.
fn truncate(text: &str, limit: usize) -> String {
  match text.char_indices().nth(limit) {
    Some((cut, _)) => text[..cut].to_owned(),
    None => text.to_owned(),
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use paysim_core::{
    payment::{Payment, PaymentRequest},
    store::DeliveryLogQuery,
    webhook::WebhookRequest,
  };
  use paysim_store_sqlite::SqliteStore;
  use rust_decimal::Decimal;

  use super::*;
  use crate::testing::Receiver;

  fn config() -> GatewayConfig {
    GatewayConfig {
      webhook_timeout: Duration::from_millis(300),
      notification_secret: "notify-secret".into(),
      response_body_limit: 4,
      ..GatewayConfig::default()
    }
  }

  fn envelope() -> WebhookEnvelope {
    let new = PaymentRequest {
      amount: Some(Decimal::new(15000, 2)),
      payment_method: Some("pix".into()),
      ..PaymentRequest::default()
    }
    .validate()
    .unwrap();
    let payment = Payment::new("pay_1".into(), new, Utc::now());
    WebhookEnvelope::for_payment("evt_1".into(), EventType::PaymentCreated, "v1", &payment, Utc::now())
  }

  async fn listen(store: &SqliteStore, url: &str, events: &[&str], secret: &str) {
    let wh = WebhookRequest {
      url: Some(url.into()),
      events: Some(events.iter().map(|e| (*e).to_owned()).collect()),
      secret: Some(secret.into()),
      ..WebhookRequest::default()
    }
    .into_subscription(id::generate(id::WEBHOOK), String::new(), Utc::now())
    .unwrap();
    store.insert_webhook(&wh).await.unwrap();
  }

  #[tokio::test]
  async fn delivers_signed_envelope_to_interested_listeners() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let receiver = Receiver::start().await;
    listen(&store, &receiver.url("/all"), &["*"], "secret-all").await;
    listen(&store, &receiver.url("/created"), &["payment.created"], "secret-created").await;
    listen(&store, &receiver.url("/updated"), &["payment.updated"], "secret-updated").await;

    let dispatcher = Dispatcher::new(&config()).unwrap();
    let logs = dispatcher.dispatch(&store, &envelope(), None).await;

    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.success && l.http_status == Some(200)));

    let hits = receiver.hits();
    assert_eq!(hits.len(), 2);
    for hit in &hits {
      let secret = if hit.path == "/all" { "secret-all" } else { "secret-created" };
      assert_eq!(hit.header(signature::EVENT_HEADER), Some("payment.created"));
      assert!(hit.header(signature::DELIVERY_HEADER).unwrap().starts_with("dlv_"));
      assert!(hit.header("user-agent").unwrap().starts_with("paysim-webhooks/"));
      let sig = hit.header(signature::SIGNATURE_HEADER).unwrap();
      assert!(signature::verify(secret, &hit.body, sig));

      let json: serde_json::Value = serde_json::from_slice(&hit.body).unwrap();
      assert_eq!(json["type"], "payment.created");
      assert_eq!(json["data"]["id"], "pay_1");
      assert_eq!(json["live_mode"], false);
      assert_eq!(json["payment"]["amount"], "150.00");
    }

    let stored = store.list_delivery_logs(&DeliveryLogQuery::default()).await.unwrap();
    assert_eq!(stored.len(), 2);
  }

  #[tokio::test]
  async fn notification_url_alone_gets_one_delivery() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let receiver = Receiver::start().await;
    let url = receiver.url("/notify");

    let dispatcher = Dispatcher::new(&config()).unwrap();
    let logs = dispatcher.dispatch(&store, &envelope(), Some(&url)).await;

    assert_eq!(logs.len(), 1);
    assert!(logs[0].webhook_subscription_id.is_none());
    assert_eq!(logs[0].url, url);
    let hit = &receiver.hits()[0];
    assert!(signature::verify(
      "notify-secret",
      &hit.body,
      hit.header(signature::SIGNATURE_HEADER).unwrap()
    ));
  }

  #[tokio::test]
  async fn failures_are_logged_not_raised() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let receiver = Receiver::start().await;
    listen(&store, &receiver.url("/fail"), &["*"], "s").await;
    listen(&store, &receiver.url("/slow"), &["*"], "s").await;
    listen(&store, "http://127.0.0.1:9/unreachable", &["*"], "s").await;
    listen(&store, &receiver.url("/ok"), &["*"], "s").await;

    let dispatcher = Dispatcher::new(&config()).unwrap();
    let logs = dispatcher.dispatch(&store, &envelope(), None).await;
    assert_eq!(logs.len(), 4);

    let by_suffix = |suffix: &str| logs.iter().find(|l| l.url.ends_with(suffix)).unwrap();

    let fail = by_suffix("/fail");
    assert!(!fail.success);
    assert_eq!(fail.http_status, Some(500));
    // The 500 handler answers "boom!!"; the log keeps the first 4 chars.
    assert_eq!(fail.response_body.as_deref(), Some("boom"));

    let slow = by_suffix("/slow");
    assert!(!slow.success);
    assert!(slow.http_status.is_none());
    assert!(slow.error.is_some());

    let unreachable = by_suffix("/unreachable");
    assert!(!unreachable.success);
    assert!(unreachable.error.is_some());

    assert!(by_suffix("/ok").success);

    let stored = store.list_delivery_logs(&DeliveryLogQuery::default()).await.unwrap();
    assert_eq!(stored.len(), 4);
  }

  async fn lost_delivery() -> WebhookDeliveryLog { panic!("receiver went away") }

  #[tokio::test]
  async fn a_panicked_delivery_still_leaves_a_failed_log() {
    let ok = Target { webhook_id: Some("wh_ok".into()), url: "http://a.test/".into(), secret: "s".into() };
    let lost = Target { webhook_id: Some("wh_lost".into()), url: "http://b.test/".into(), secret: "s".into() };

    let mut tasks = JoinSet::new();
    let mut attempts = HashMap::new();
    let first = attempt_log(&ok, EventType::PaymentCreated, "pay_1");
    let done = {
      let mut log = first.clone();
      log.success = true;
      log.http_status = Some(200);
      log
    };
    let handle = tasks.spawn(async move { done });
    attempts.insert(handle.id(), (0, first));

    let second = attempt_log(&lost, EventType::PaymentCreated, "pay_1");
    let handle = tasks.spawn(lost_delivery());
    attempts.insert(handle.id(), (1, second));

    let logs = join_deliveries(tasks, attempts).await;
    assert_eq!(logs.len(), 2);
    assert!(logs[0].success);
    assert_eq!(logs[1].webhook_subscription_id.as_deref(), Some("wh_lost"));
    assert!(!logs[1].success);
    assert!(logs[1].error.as_deref().unwrap().starts_with("delivery task failed"));
  }

  #[test]
  fn truncate_respects_char_boundaries() {
    assert_eq!(truncate("pagamento", 4), "paga");
    assert_eq!(truncate("ção", 2), "çã");
    assert_eq!(truncate("ok", 10), "ok");
  }
}
