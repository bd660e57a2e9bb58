//! Handlers for `/api/webhooks` and `/api/webhook-logs`.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use paysim_core::{
  store::{DeliveryLogQuery, GatewayStore},
  webhook::{WebhookDeliveryLog, WebhookRequest, WebhookSubscription},
};

use crate::{
  AppState,
  error::ApiError,
  extract::{AppJson, AppQuery},
};

/// The response includes the listener's `secret`; when the request did not
/// supply one this is the only place the generated secret is shown.
pub async fn create<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  AppJson(body): AppJson<WebhookRequest>,
) -> Result<(StatusCode, Json<WebhookSubscription>), ApiError> {
  let webhook = state.gateway.create_webhook(body).await?;
  Ok((StatusCode::CREATED, Json(webhook)))
}

pub async fn list<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<WebhookSubscription>>, ApiError> {
  Ok(Json(state.gateway.list_webhooks().await?))
}

pub async fn get_one<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<WebhookSubscription>, ApiError> {
  Ok(Json(state.gateway.get_webhook(&id).await?))
}

pub async fn delete_one<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
  state.gateway.delete_webhook(&id).await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── GET /webhook-logs ───────────────────────────────────────────────────────

pub async fn logs<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  AppQuery(query): AppQuery<DeliveryLogQuery>,
) -> Result<Json<Vec<WebhookDeliveryLog>>, ApiError> {
  Ok(Json(state.gateway.list_delivery_logs(&query).await?))
}
