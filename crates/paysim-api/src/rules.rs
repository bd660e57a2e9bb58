//! Handlers for `/api/rules`.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use paysim_core::{
  rule::{Rule, RuleRequest},
  store::GatewayStore,
};

use crate::{AppState, error::ApiError, extract::AppJson};

pub async fn create<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  AppJson(body): AppJson<RuleRequest>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
  let rule = state.gateway.create_rule(body).await?;
  Ok((StatusCode::CREATED, Json(rule)))
}

/// Rules in the order the matcher sees them: creation order.
pub async fn list<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<Rule>>, ApiError> {
  Ok(Json(state.gateway.list_rules().await?))
}

pub async fn get_one<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Rule>, ApiError> {
  Ok(Json(state.gateway.get_rule(&id).await?))
}

pub async fn delete_one<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
  state.gateway.delete_rule(&id).await?;
  Ok(StatusCode::NO_CONTENT)
}
