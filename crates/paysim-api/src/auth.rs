//! Bearer-token guard for the `/api` routes.

use axum::{
  extract::{Request, State},
  http::{HeaderMap, header},
  middleware::Next,
  response::Response,
};
use paysim_core::store::GatewayStore;
use paysim_engine::signature;

use crate::{AppState, error::ApiError};

/// Check `Authorization: Bearer <token>` against `expected`.
pub fn verify_token(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
  let presented = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
    .ok_or(ApiError::Unauthorized)?;

  if !signature::secrets_match(presented.trim(), expected) {
    return Err(ApiError::Unauthorized);
  }
  Ok(())
}

/// Middleware: a no-op unless the server was configured with an access token.
pub async fn require_token<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  req: Request,
  next: Next,
) -> Result<Response, ApiError> {
  if let Some(expected) = state.config.access_token() {
    verify_token(req.headers(), expected)?;
  }
  Ok(next.run(req).await)
}
