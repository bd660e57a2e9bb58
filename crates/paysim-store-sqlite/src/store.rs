//! [`SqliteStore`], the SQLite implementation of [`GatewayStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use serde::{Serialize, de::DeserializeOwned};

use paysim_core::{
  payment::{Payment, PaymentStatus},
  rule::Rule,
  store::{DeliveryLogQuery, GatewayStore, PaymentQuery, SubscriptionQuery},
  subscription::{Plan, Subscription, SubscriptionStatus},
  webhook::{WebhookDeliveryLog, WebhookSubscription},
};

use crate::{
  Error, Result,
  encode::{
    PaymentRow, SubscriptionRow, decode_doc, decode_docs, encode_doc, encode_dt, encode_limit,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A gateway store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. All writes
/// go through one connection thread, so each statement (and each
/// transaction) is serialized against every other write.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert into one of the `(id, doc)` tables.
  async fn insert_doc<T: Serialize>(&self, table: &'static str, id: &str, value: &T) -> Result<()> {
    let id = id.to_owned();
    let doc = encode_doc(value)?;
    let sql = format!("INSERT INTO {table} (id, doc) VALUES (?1, ?2)");
    self
      .conn
      .call(move |conn| {
        conn.execute(&sql, rusqlite::params![id, doc])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_doc<T: DeserializeOwned>(&self, table: &'static str, id: &str) -> Result<Option<T>> {
    let id = id.to_owned();
    let sql = format!("SELECT doc FROM {table} WHERE id = ?1");
    let doc: Option<String> = self
      .conn
      .call(move |conn| Ok(conn.query_row(&sql, [id], |r| r.get(0)).optional()?))
      .await?;
    doc.as_deref().map(decode_doc).transpose()
  }

  /// Every document in `table`, in insertion order.
  async fn list_docs<T: DeserializeOwned>(&self, table: &'static str) -> Result<Vec<T>> {
    let sql = format!("SELECT doc FROM {table} ORDER BY seq ASC");
    let docs: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    decode_docs(docs)
  }

  async fn delete_doc(&self, table: &'static str, id: &str) -> Result<bool> {
    let id = id.to_owned();
    let sql = format!("DELETE FROM {table} WHERE id = ?1");
    let deleted = self
      .conn
      .call(move |conn| Ok(conn.execute(&sql, [id])?))
      .await?;
    Ok(deleted > 0)
  }
}

fn as_str<T: AsRef<str>>(value: Option<T>) -> Option<String> {
  value.map(|v| v.as_ref().to_owned())
}

// ─── GatewayStore impl ───────────────────────────────────────────────────────

impl GatewayStore for SqliteStore {
  type Error = Error;

  // ── Payments ──────────────────────────────────────────────────────────────

  async fn insert_payment(&self, payment: &Payment) -> Result<()> {
    let row = PaymentRow::new(payment)?;
    self
      .conn
      .call(move |conn| {
        row.insert(conn)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_payment(&self, id: &str) -> Result<Option<Payment>> {
    self.get_doc("payments", id).await
  }

  async fn update_payment(&self, payment: &Payment, expected: PaymentStatus) -> Result<bool> {
    let row = PaymentRow::new(payment)?;
    let expected = expected.as_ref().to_owned();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE payments SET status = ?2, doc = ?3 WHERE id = ?1 AND status = ?4",
          rusqlite::params![row.id, row.status, row.doc, expected],
        )?)
      })
      .await?;
    Ok(changed == 1)
  }

  async fn list_payments(&self, query: &PaymentQuery) -> Result<Vec<Payment>> {
    let status = as_str(query.status);
    let method = as_str(query.payment_method);
    let external_reference = query.external_reference.clone();
    let preapproval_id = query.preapproval_id.clone();
    let limit = encode_limit(query.limit);
    let offset = query.offset.and_then(|o| i64::try_from(o).ok()).unwrap_or(0);

    let docs: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT doc FROM payments
           WHERE (?1 IS NULL OR status = ?1)
             AND (?2 IS NULL OR payment_method = ?2)
             AND (?3 IS NULL OR external_reference = ?3)
             AND (?4 IS NULL OR preapproval_id = ?4)
           ORDER BY seq DESC
           LIMIT ?5 OFFSET ?6",
        )?;
        let rows = stmt
          .query_map(
            rusqlite::params![status, method, external_reference, preapproval_id, limit, offset],
            |r| r.get(0),
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    decode_docs(docs)
  }

  // ── Plans ─────────────────────────────────────────────────────────────────

  async fn insert_plan(&self, plan: &Plan) -> Result<()> {
    self.insert_doc("plans", &plan.id, plan).await
  }

  async fn get_plan(&self, id: &str) -> Result<Option<Plan>> { self.get_doc("plans", id).await }

  async fn list_plans(&self) -> Result<Vec<Plan>> { self.list_docs("plans").await }

  // ── Subscriptions ─────────────────────────────────────────────────────────

  async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
    let row = SubscriptionRow::new(subscription)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subscriptions (
             id, status, payer_email, preapproval_plan_id, next_payment_date, doc
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            row.id,
            row.status,
            row.payer_email,
            row.preapproval_plan_id,
            row.next_payment_date,
            row.doc,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>> {
    self.get_doc("subscriptions", id).await
  }

  async fn list_subscriptions(&self, query: &SubscriptionQuery) -> Result<Vec<Subscription>> {
    let status = as_str(query.status);
    let payer_email = query.payer_email.clone();
    let plan_id = query.preapproval_plan_id.clone();

    let docs: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT doc FROM subscriptions
           WHERE (?1 IS NULL OR status = ?1)
             AND (?2 IS NULL OR payer_email = ?2)
             AND (?3 IS NULL OR preapproval_plan_id = ?3)
           ORDER BY seq DESC",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![status, payer_email, plan_id], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    decode_docs(docs)
  }

  async fn set_subscription_status(
    &self,
    id: &str,
    from: SubscriptionStatus,
    to: SubscriptionStatus,
    now: DateTime<Utc>,
  ) -> Result<Option<Subscription>> {
    let id = id.to_owned();
    let from = from.as_ref().to_owned();
    let to = to.as_ref().to_owned();
    let now = encode_dt(now);

    let doc: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "UPDATE subscriptions
               SET status = ?3,
                   doc = json_set(doc, '$.status', ?3, '$.last_modified', ?4)
               WHERE id = ?1 AND status = ?2
               RETURNING doc",
              rusqlite::params![id, from, to, now],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    doc.as_deref().map(decode_doc).transpose()
  }

  async fn record_charge(
    &self,
    subscription: &Subscription,
    expected_next: DateTime<Utc>,
    payment: &Payment,
  ) -> Result<bool> {
    let sub = SubscriptionRow::new(subscription)?;
    let pay = PaymentRow::new(payment)?;
    let expected_next = encode_dt(expected_next);
    let authorized = SubscriptionStatus::Authorized.as_ref().to_owned();

    let committed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let advanced = tx.execute(
          "UPDATE subscriptions
           SET status = ?2, next_payment_date = ?3, doc = ?4
           WHERE id = ?1 AND status = ?5 AND next_payment_date = ?6",
          rusqlite::params![
            sub.id,
            sub.status,
            sub.next_payment_date,
            sub.doc,
            authorized,
            expected_next,
          ],
        )?;
        if advanced == 0 {
          // Dropping `tx` rolls back.
          return Ok(false);
        }
        pay.insert(&tx)?;
        tx.commit()?;
        Ok(true)
      })
      .await?;
    Ok(committed)
  }

  // ── Rules ─────────────────────────────────────────────────────────────────

  async fn insert_rule(&self, rule: &Rule) -> Result<()> {
    self.insert_doc("rules", &rule.id, rule).await
  }

  async fn get_rule(&self, id: &str) -> Result<Option<Rule>> { self.get_doc("rules", id).await }

  async fn list_rules(&self) -> Result<Vec<Rule>> { self.list_docs("rules").await }

  async fn delete_rule(&self, id: &str) -> Result<bool> { self.delete_doc("rules", id).await }

  // ── Webhook listeners ─────────────────────────────────────────────────────

  async fn insert_webhook(&self, webhook: &WebhookSubscription) -> Result<()> {
    self.insert_doc("webhooks", &webhook.id, webhook).await
  }

  async fn get_webhook(&self, id: &str) -> Result<Option<WebhookSubscription>> {
    self.get_doc("webhooks", id).await
  }

  async fn list_webhooks(&self) -> Result<Vec<WebhookSubscription>> {
    self.list_docs("webhooks").await
  }

  async fn delete_webhook(&self, id: &str) -> Result<bool> {
    self.delete_doc("webhooks", id).await
  }

  // ── Delivery logs ─────────────────────────────────────────────────────────

  async fn insert_delivery_log(&self, log: &WebhookDeliveryLog) -> Result<()> {
    let id = log.id.clone();
    let webhook_id = log.webhook_subscription_id.clone();
    let resource_id = log.resource_id.clone();
    let event = log.event.as_ref().to_owned();
    let success = log.success;
    let doc = encode_doc(log)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO delivery_logs (
             id, webhook_subscription_id, resource_id, event, success, doc
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id, webhook_id, resource_id, event, success, doc],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_delivery_logs(&self, query: &DeliveryLogQuery) -> Result<Vec<WebhookDeliveryLog>> {
    let webhook_id = query.webhook_subscription_id.clone();
    let resource_id = query.resource_id.clone();
    let event = as_str(query.event);
    let success = query.success;
    let limit = encode_limit(query.limit);

    let docs: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT doc FROM delivery_logs
           WHERE (?1 IS NULL OR webhook_subscription_id = ?1)
             AND (?2 IS NULL OR resource_id = ?2)
             AND (?3 IS NULL OR event = ?3)
             AND (?4 IS NULL OR success = ?4)
           ORDER BY seq DESC
           LIMIT ?5",
        )?;
        let rows = stmt
          .query_map(
            rusqlite::params![webhook_id, resource_id, event, success, limit],
            |r| r.get(0),
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    decode_docs(docs)
  }
}
