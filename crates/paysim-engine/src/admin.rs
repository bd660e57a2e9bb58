//! Rule and webhook-listener management, and the delivery audit trail.

use chrono::Utc;
use paysim_core::{
  Error as CoreError,
  id,
  rule::{Rule, RuleRequest},
  store::{DeliveryLogQuery, GatewayStore},
  webhook::{WebhookDeliveryLog, WebhookRequest, WebhookSubscription},
};

use crate::{Error, Gateway, Result, signature};

impl<S: GatewayStore + 'static> Gateway<S> {
  // ── Rules ─────────────────────────────────────────────────────────────────

  pub async fn create_rule(&self, request: RuleRequest) -> Result<Rule> {
    let rule = request.into_rule(id::generate(id::RULE), Utc::now())?;
    self.store.insert_rule(&rule).await.map_err(Error::store)?;
    tracing::info!(
      rule_id = %rule.id,
      name = %rule.name,
      status = %rule.status,
      priority = rule.priority,
      "rule created"
    );
    Ok(rule)
  }

  pub async fn get_rule(&self, id: &str) -> Result<Rule> {
    self
      .store
      .get_rule(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| CoreError::RuleNotFound(id.to_owned()).into())
  }

  /// Creation order.
  pub async fn list_rules(&self) -> Result<Vec<Rule>> {
    self.store.list_rules().await.map_err(Error::store)
  }

  pub async fn delete_rule(&self, id: &str) -> Result<()> {
    if !self.store.delete_rule(id).await.map_err(Error::store)? {
      return Err(CoreError::RuleNotFound(id.to_owned()).into());
    }
    tracing::info!(rule_id = %id, "rule deleted");
    Ok(())
  }

  // ── Webhook listeners ─────────────────────────────────────────────────────

  pub async fn create_webhook(&self, request: WebhookRequest) -> Result<WebhookSubscription> {
    let webhook = request.into_subscription(
      id::generate(id::WEBHOOK),
      signature::generate_secret(),
      Utc::now(),
    )?;
    self.store.insert_webhook(&webhook).await.map_err(Error::store)?;
    tracing::info!(
      webhook_id = %webhook.id,
      url = %webhook.url,
      events = ?webhook.events,
      "webhook registered"
    );
    Ok(webhook)
  }

  pub async fn get_webhook(&self, id: &str) -> Result<WebhookSubscription> {
    self
      .store
      .get_webhook(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| CoreError::WebhookNotFound(id.to_owned()).into())
  }

  pub async fn list_webhooks(&self) -> Result<Vec<WebhookSubscription>> {
    self.store.list_webhooks().await.map_err(Error::store)
  }

  pub async fn delete_webhook(&self, id: &str) -> Result<()> {
    if !self.store.delete_webhook(id).await.map_err(Error::store)? {
      return Err(CoreError::WebhookNotFound(id.to_owned()).into());
    }
    tracing::info!(webhook_id = %id, "webhook removed");
    Ok(())
  }

  // ── Delivery logs ─────────────────────────────────────────────────────────

  pub async fn list_delivery_logs(
    &self,
    query: &DeliveryLogQuery,
  ) -> Result<Vec<WebhookDeliveryLog>> {
    self.store.list_delivery_logs(query).await.map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use paysim_core::ErrorKind;
  use serde_json::json;

  use super::*;
  use crate::testing::{Receiver, gateway};

  #[tokio::test]
  async fn rule_lifecycle() {
    let gw = gateway().await;
    let rule = gw
      .create_rule(RuleRequest {
        name: Some("decline test payer".into()),
        status: Some("decline".into()),
        conditions: [("payer.email".to_owned(), json!("recusa@academia.test"))].into(),
        priority: Some(3),
        ..RuleRequest::default()
      })
      .await
      .unwrap();
    assert_eq!(gw.get_rule(&rule.id).await.unwrap(), rule);
    assert_eq!(gw.list_rules().await.unwrap().len(), 1);

    gw.delete_rule(&rule.id).await.unwrap();
    assert_eq!(gw.get_rule(&rule.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(gw.delete_rule(&rule.id).await.unwrap_err().kind(), ErrorKind::NotFound);
  }

  #[tokio::test]
  async fn invalid_rules_are_rejected() {
    let gw = gateway().await;
    let err = gw
      .create_rule(RuleRequest {
        name: Some("empty".into()),
        status: Some("approved".into()),
        ..RuleRequest::default()
      })
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
  }

  #[tokio::test]
  async fn webhook_gets_generated_secret_and_can_be_removed() {
    let gw = gateway().await;
    let receiver = Receiver::start().await;
    let wh = gw
      .create_webhook(WebhookRequest {
        url: Some(receiver.url("/hooks")),
        description: Some("academia backend".into()),
        ..WebhookRequest::default()
      })
      .await
      .unwrap();
    assert_eq!(wh.secret.len(), 64);
    assert_eq!(wh.events, vec!["*".to_owned()]);
    assert_eq!(gw.get_webhook(&wh.id).await.unwrap(), wh);

    gw.delete_webhook(&wh.id).await.unwrap();
    assert!(gw.list_webhooks().await.unwrap().is_empty());
    assert_eq!(gw.delete_webhook(&wh.id).await.unwrap_err().kind(), ErrorKind::NotFound);
  }
}
