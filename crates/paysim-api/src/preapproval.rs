//! Handlers for plans, subscriptions (`/api/preapproval`) and the explicit
//! recurring charge trigger.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use paysim_core::{
  payment::Payment,
  store::{GatewayStore, SubscriptionQuery},
  subscription::{Plan, PlanRequest, Subscription, SubscriptionRequest},
};
use paysim_engine::{ChargeRequest, SubscriptionUpdate};

use crate::{
  AppState,
  error::ApiError,
  extract::{AppJson, AppQuery, OptionalJson},
};

// ─── Plans ───────────────────────────────────────────────────────────────────

pub async fn create_plan<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  AppJson(body): AppJson<PlanRequest>,
) -> Result<(StatusCode, Json<Plan>), ApiError> {
  let plan = state.gateway.create_plan(body).await?;
  Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn list_plans<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<Plan>>, ApiError> {
  Ok(Json(state.gateway.list_plans().await?))
}

pub async fn get_plan<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Plan>, ApiError> {
  Ok(Json(state.gateway.get_plan(&id).await?))
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

pub async fn create<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  AppJson(body): AppJson<SubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
  let subscription = state.gateway.create_subscription(body).await?;
  Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn list<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  AppQuery(query): AppQuery<SubscriptionQuery>,
) -> Result<Json<Vec<Subscription>>, ApiError> {
  Ok(Json(state.gateway.list_subscriptions(&query).await?))
}

pub async fn get_one<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
  Ok(Json(state.gateway.get_subscription(&id).await?))
}

/// `PUT /preapproval/{id}`: status changes only.
pub async fn update<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
  AppJson(body): AppJson<SubscriptionUpdate>,
) -> Result<Json<Subscription>, ApiError> {
  Ok(Json(state.gateway.update_subscription(&id, body).await?))
}

/// `POST /preapproval/{id}/pay`: one charge against the subscription. The
/// path id wins over any `preapproval_id` in the body.
pub async fn pay<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
  OptionalJson(mut body): OptionalJson<ChargeRequest>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
  body.preapproval_id = Some(id);
  let payment = state.gateway.charge_subscription(body).await?;
  Ok((StatusCode::CREATED, Json(payment)))
}

// ─── POST /recurring/charge ──────────────────────────────────────────────────

pub async fn charge<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  AppJson(body): AppJson<ChargeRequest>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
  let payment = state.gateway.charge_subscription(body).await?;
  Ok((StatusCode::CREATED, Json(payment)))
}
