//! Extractors whose rejections render as [`ApiError`] bodies.

use axum::{
  body::Bytes,
  extract::{FromRequest, FromRequestParts, Request},
};
use serde::de::DeserializeOwned;

use crate::ApiError;

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

#[derive(FromRequest)]
#[from_request(via(axum::Form), rejection(ApiError))]
pub struct AppForm<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct AppQuery<T>(pub T);

/// A JSON body that may be omitted entirely; an empty body yields
/// `T::default()`. The content type is not checked.
pub struct OptionalJson<T>(pub T);

impl<S, T> FromRequest<S> for OptionalJson<T>
where
  S: Send + Sync,
  T: DeserializeOwned + Default,
{
  type Rejection = ApiError;

  async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
    let bytes = Bytes::from_request(req, state).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
      return Ok(Self(T::default()));
    }
    serde_json::from_slice(&bytes)
      .map(Self)
      .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
  }
}
