//! A local HTTP receiver that records every webhook it gets.

use std::{
  sync::{Arc, Mutex},
  time::Duration,
};

use axum::{
  Router,
  body::Bytes,
  extract::State,
  http::{HeaderMap, StatusCode, Uri},
  routing::post,
};
use paysim_store_sqlite::SqliteStore;

use crate::{Gateway, GatewayConfig};

#[derive(Debug, Clone)]
pub struct Hit {
  pub path:    String,
  pub headers: HeaderMap,
  pub body:    Vec<u8>,
}

impl Hit {
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name).and_then(|v| v.to_str().ok())
  }

  pub fn json(&self) -> serde_json::Value { serde_json::from_slice(&self.body).unwrap() }
}

/// Answers `/fail` with 500 `boom!!`, `/slow` after two seconds, and
/// everything else with 200 `ok`.
pub struct Receiver {
  base: String,
  hits: Arc<Mutex<Vec<Hit>>>,
}

impl Receiver {
  pub async fn start() -> Self {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
      .route("/{*path}", post(record))
      .with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    Self { base: format!("http://{addr}"), hits }
  }

  pub fn url(&self, path: &str) -> String { format!("{}{path}", self.base) }

  pub fn hits(&self) -> Vec<Hit> { self.hits.lock().unwrap().clone() }

  pub fn hits_for(&self, path: &str) -> Vec<Hit> {
    self.hits().into_iter().filter(|h| h.path == path).collect()
  }
}

async fn record(
  State(hits): State<Arc<Mutex<Vec<Hit>>>>,
  uri: Uri,
  headers: HeaderMap,
  body: Bytes,
) -> (StatusCode, &'static str) {
  let path = uri.path().to_owned();
  hits.lock().unwrap().push(Hit { path: path.clone(), headers, body: body.to_vec() });
  match path.as_str() {
    "/fail" => (StatusCode::INTERNAL_SERVER_ERROR, "boom!!"),
    "/slow" => {
      tokio::time::sleep(Duration::from_secs(2)).await;
      (StatusCode::OK, "late")
    }
    _ => (StatusCode::OK, "ok"),
  }
}

/// A gateway over a fresh in-memory store with short timeouts.
pub async fn gateway() -> Gateway<SqliteStore> {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let config = GatewayConfig {
    webhook_timeout: Duration::from_millis(500),
    public_url: "http://paysim.test".into(),
    ..GatewayConfig::default()
  };
  Gateway::new(Arc::new(store), config).unwrap()
}
