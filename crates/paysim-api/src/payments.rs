//! Handlers for `/api/payments` and `/api/simulate`.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use paysim_core::{
  payment::{Payment, PaymentRequest},
  store::{GatewayStore, PaymentQuery},
};
use paysim_engine::SimulateRequest;

use crate::{
  AppState,
  error::ApiError,
  extract::{AppJson, AppQuery},
};

// ─── POST /payments ──────────────────────────────────────────────────────────

pub async fn create<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  AppJson(body): AppJson<PaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
  let payment = state.gateway.create_payment(body).await?;
  Ok((StatusCode::CREATED, Json(payment)))
}

// ─── GET /payments ───────────────────────────────────────────────────────────

pub async fn list<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  AppQuery(query): AppQuery<PaymentQuery>,
) -> Result<Json<Vec<Payment>>, ApiError> {
  Ok(Json(state.gateway.list_payments(&query).await?))
}

// ─── GET /payments/{id} ──────────────────────────────────────────────────────

pub async fn get_one<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
  Ok(Json(state.gateway.get_payment(&id).await?))
}

// ─── POST /payments/{id}/{capture,cancel,refund} ─────────────────────────────

pub async fn capture<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
  Ok(Json(state.gateway.capture(&id).await?))
}

pub async fn cancel<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
  Ok(Json(state.gateway.cancel(&id).await?))
}

pub async fn refund<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
  Ok(Json(state.gateway.refund(&id).await?))
}

// ─── POST /simulate ──────────────────────────────────────────────────────────

pub async fn simulate<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  AppJson(body): AppJson<SimulateRequest>,
) -> Result<Json<Payment>, ApiError> {
  Ok(Json(state.gateway.simulate(body).await?))
}
