//! Payer-facing pages: the hosted card checkout and the PIX confirmation
//! flow. These routes sit outside `/api` and never require the access token.

use axum::{
  Json,
  extract::{FromRequest, Path, Request, State},
  http::header,
  response::{Html, IntoResponse, Response},
};
use paysim_core::store::GatewayStore;
use paysim_engine::{CheckoutForm, PixConfirmation};

use crate::{
  AppState, html,
  error::ApiError,
  extract::{AppForm, OptionalJson},
};

/// An [`ApiError`] rendered as an HTML page with the same status code.
pub struct PageError(ApiError);

impl From<ApiError> for PageError {
  fn from(e: ApiError) -> Self { Self(e) }
}

impl From<paysim_engine::Error> for PageError {
  fn from(e: paysim_engine::Error) -> Self { Self(e.into()) }
}

impl IntoResponse for PageError {
  fn into_response(self) -> Response {
    let status = self.0.status();
    if status.is_server_error() {
      tracing::error!(error = %self.0, "page request failed");
    }
    (status, Html(html::error_page(status, &self.0.to_string()))).into_response()
  }
}

// ─── Checkout ────────────────────────────────────────────────────────────────

pub async fn checkout_page<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Html<String>, PageError> {
  let payment = state.gateway.get_payment(&id).await?;
  Ok(Html(html::checkout_page(&payment)))
}

pub async fn checkout_process<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
  AppForm(form): AppForm<CheckoutForm>,
) -> Result<Html<String>, PageError> {
  let payment = state.gateway.process_checkout(&id, form).await?;
  Ok(Html(html::result_page(&payment)))
}

// ─── PIX ─────────────────────────────────────────────────────────────────────

pub async fn pix_page<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Html<String>, PageError> {
  let payment = state.gateway.get_payment(&id).await?;
  Ok(Html(html::pix_page(&payment)))
}

/// Form posts (from [`pix_page`]) get an HTML result page; anything else is
/// read as an optional JSON body and answered with the payment as JSON.
pub async fn pix_confirm<S: GatewayStore + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
  req: Request,
) -> Response {
  if is_form(&req) {
    let result: Result<_, PageError> = async {
      let AppForm(body) = AppForm::<PixConfirmation>::from_request(req, &state).await?;
      Ok(state.gateway.confirm_pix(&id, body).await?)
    }
    .await;
    return match result {
      Ok(payment) => Html(html::result_page(&payment)).into_response(),
      Err(e) => e.into_response(),
    };
  }

  let result: Result<_, ApiError> = async {
    let OptionalJson(body) = OptionalJson::<PixConfirmation>::from_request(req, &state).await?;
    Ok(state.gateway.confirm_pix(&id, body).await?)
  }
  .await;
  match result {
    Ok(payment) => Json(payment).into_response(),
    Err(e) => e.into_response(),
  }
}

fn is_form(req: &Request) -> bool {
  req
    .headers()
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}
