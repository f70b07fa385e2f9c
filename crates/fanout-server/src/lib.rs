//! HTTP layer for Fanout.
//!
//! Exposes an axum [`Router`] over the dispatch core, generic over the
//! [`SubscriptionStore`], [`PushTransport`] and [`Cache`] implementations
//! behind it.

pub mod error;
pub mod handlers;
pub mod transport;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
  Router,
  http::HeaderValue,
  routing::{get, post},
};
use fanout_core::{
  cache::Cache,
  dispatch::{DispatchConfig, Dispatcher, ResponseMode},
  store::SubscriptionStore,
  transport::PushTransport,
};
use serde::Deserialize;
use tower_http::{
  cors::{AllowOrigin, Any, CorsLayer},
  trace::TraceLayer,
};

use handlers::{push, register};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and the
/// `FANOUT_*` environment.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                   String,
  #[serde(default = "default_port")]
  pub port:                   u16,
  #[serde(default = "default_store_path")]
  pub store_path:             PathBuf,
  /// Shared secret required by `POST /{platform}/push`.
  pub push_secret:            String,
  pub platforms:              Vec<String>,
  pub entity_types:           Vec<String>,
  #[serde(default)]
  pub response_mode:          ResponseMode,
  /// Construct notifications but never hand them to the transport.
  #[serde(default)]
  pub dry_run:                bool,
  #[serde(default = "default_test_min_delay")]
  pub test_min_delay:         u64,
  #[serde(default = "default_endpoint_max_len")]
  pub endpoint_max_len:       usize,
  /// Flat-file fallback for audit entries the store cannot take.
  #[serde(default)]
  pub error_log:              Option<PathBuf>,
  /// `Access-Control-Allow-Origin` value; `"*"` allows any origin, absent
  /// disables CORS headers entirely.
  #[serde(default)]
  pub cors_origin:            Option<String>,
  #[serde(default = "default_transport_timeout_secs")]
  pub transport_timeout_secs: u64,
  #[serde(default = "default_push_ttl_secs")]
  pub push_ttl_secs:          u32,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }
fn default_store_path() -> PathBuf { PathBuf::from("fanout.db") }
fn default_test_min_delay() -> u64 { 30 }
fn default_endpoint_max_len() -> usize { 2000 }
fn default_transport_timeout_secs() -> u64 { 10 }
fn default_push_ttl_secs() -> u32 { 3600 }

impl ServerConfig {
  pub fn dispatch_config(&self) -> DispatchConfig {
    DispatchConfig {
      platforms:        self.platforms.clone(),
      entity_types:     self.entity_types.clone(),
      response_mode:    self.response_mode,
      dry_run:          self.dry_run,
      test_min_delay:   self.test_min_delay,
      endpoint_max_len: self.endpoint_max_len,
    }
  }

  pub fn transport_timeout(&self) -> Duration {
    Duration::from_secs(self.transport_timeout_secs)
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, T, C> {
  pub dispatcher: Arc<Dispatcher<S, T, C>>,
  pub store:      Arc<S>,
  pub config:     Arc<ServerConfig>,
}

// Derived Clone would demand S/T/C: Clone; only the Arcs are cloned.
impl<S, T, C> Clone for AppState<S, T, C> {
  fn clone(&self) -> Self {
    AppState {
      dispatcher: Arc::clone(&self.dispatcher),
      store:      Arc::clone(&self.store),
      config:     Arc::clone(&self.config),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the axum [`Router`] for the Fanout service.
pub fn router<S, T, C>(state: AppState<S, T, C>) -> Router
where
  S: SubscriptionStore + 'static,
  T: PushTransport + 'static,
  C: Cache + 'static,
{
  let cors = cors_layer(state.config.cors_origin.as_deref());

  // The single-segment GET captures an encoded endpoint, the two-segment
  // POSTs capture a platform. matchit requires one name per tree position,
  // so the pattern name stays generic; handlers bind it by position.
  let mut router = Router::new()
    .route("/add",            post(register::add::<S, T, C>))
    .route("/delete",         post(register::delete_all::<S, T, C>))
    .route("/test",           post(push::test::<S, T, C>))
    .route("/{param}/delete", post(register::delete_platform::<S, T, C>))
    .route("/{param}/push",   post(push::push::<S, T, C>))
    .route("/{param}",        get(register::get_filters::<S, T, C>))
    .layer(TraceLayer::new_for_http())
    .with_state(state);
  if let Some(cors) = cors {
    router = router.layer(cors);
  }
  router
}

fn cors_layer(origin: Option<&str>) -> Option<CorsLayer> {
  let origin = origin?;
  let allow = if origin == "*" {
    AllowOrigin::any()
  } else {
    AllowOrigin::exact(HeaderValue::from_str(origin).ok()?)
  };
  Some(
    CorsLayer::new()
      .allow_origin(allow)
      .allow_methods(Any)
      .allow_headers(Any),
  )
}

// ─── Integration tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
  use fanout_core::{audit::AuditLog, cache::MemoryCache};
  use fanout_store_sqlite::SqliteStore;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  use crate::transport::HttpTransport;

  type TestState = AppState<SqliteStore, HttpTransport, MemoryCache>;

  const SECRET: &str = "push-secret";

  async fn make_state() -> TestState {
    let config = ServerConfig {
      host:                   "127.0.0.1".to_string(),
      port:                   8080,
      store_path:             PathBuf::from(":memory:"),
      push_secret:            SECRET.to_string(),
      platforms:              vec!["pc".to_string(), "ps4".to_string()],
      entity_types:           vec!["item".to_string(), "creature".to_string()],
      response_mode:          ResponseMode::Full,
      // Dry-run keeps tests off the network; matching still runs in full.
      dry_run:                true,
      test_min_delay:         30,
      endpoint_max_len:       2000,
      error_log:              None,
      cors_origin:            Some("*".to_string()),
      transport_timeout_secs: 10,
      push_ttl_secs:          3600,
    };
    let store     = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let transport = HttpTransport::new(config.transport_timeout(), config.push_ttl_secs).unwrap();
    let cache     = Arc::new(MemoryCache::new());
    let dispatcher = Arc::new(Dispatcher::new(
      Arc::clone(&store),
      transport,
      cache,
      AuditLog::new(None),
      config.dispatch_config(),
    ));
    AppState { dispatcher, store, config: Arc::new(config) }
  }

  async fn request(state: TestState, method: &str, uri: &str, body: Value) -> axum::response::Response {
    let req = Request::builder()
      .method(method)
      .uri(uri)
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(body.to_string()))
      .unwrap();
    router(state).oneshot(req).await.unwrap()
  }

  async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  fn subscription(endpoint: &str) -> Value {
    json!({
      "endpoint": endpoint,
      "keys": { "p256dh": "BKey", "auth": "auth-secret" },
      "expirationTime": null
    })
  }

  fn add_body(endpoint: &str) -> Value {
    json!({
      "subscription": subscription(endpoint),
      "platforms": ["pc"],
      "item": ["sword", "gold ring"],
      "creature": []
    })
  }

  // ── /add and GET /{endpoint} ───────────────────────────────────────────────

  #[tokio::test]
  async fn add_then_get_returns_stored_filters() {
    let state    = make_state().await;
    let endpoint = "https://push.example.org/sub/1";

    let resp = request(state.clone(), "POST", "/add", add_body(endpoint)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    // Two item filters plus the empty always-match creature filter.
    assert_eq!(body_json(resp).await, json!(3));

    let encoded = URL_SAFE_NO_PAD.encode(endpoint);
    let resp    = request(state, "GET", &format!("/{encoded}"), json!(null)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
      body_json(resp).await,
      json!({ "creature": [""], "item": ["sword", "gold ring"] })
    );
  }

  #[tokio::test]
  async fn add_without_platforms_is_rejected() {
    let state = make_state().await;
    let body  = json!({
      "subscription": subscription("https://push.example.org/sub/2"),
      "item": ["sword"]
    });
    let resp = request(state, "POST", "/add", body).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
      body_json(resp).await,
      json!({ "errors": { "platforms": "Missing platforms parameter" } })
    );
  }

  #[tokio::test]
  async fn add_with_malformed_filter_list_is_rejected() {
    let state = make_state().await;
    let body  = json!({
      "subscription": subscription("https://push.example.org/sub/3"),
      "platforms": ["pc"],
      "item": "sword"
    });
    let resp = request(state, "POST", "/add", body).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
      body_json(resp).await,
      json!({ "errors": { "item": "Parameter must be an array of strings" } })
    );
  }

  #[tokio::test]
  async fn get_with_undecodable_endpoint_is_rejected() {
    let state = make_state().await;
    let resp  = request(state, "GET", "/%21%40%23", json!(null)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  // ── Push ───────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn push_without_key_returns_403() {
    let state = make_state().await;
    let resp  = request(
      state,
      "POST",
      "/pc/push",
      json!({ "item": [{ "tags": "sword", "info": {} }] }),
    ).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(resp).await, json!({ "error": "Permission denied" }));
  }

  #[tokio::test]
  async fn push_with_wrong_key_returns_403() {
    let state = make_state().await;
    let resp  = request(
      state,
      "POST",
      "/pc/push",
      json!({ "key": "not-the-secret", "item": [] }),
    ).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
  }

  #[tokio::test]
  async fn push_to_unknown_platform_returns_400() {
    let state = make_state().await;
    let resp  = request(
      state,
      "POST",
      "/wii/push",
      json!({ "key": SECRET, "item": [] }),
    ).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
      body_json(resp).await,
      json!({ "errors": { "platform": "Unknown platform 'wii'" } })
    );
  }

  #[tokio::test]
  async fn push_delivers_matched_payloads() {
    let state    = make_state().await;
    let endpoint = "https://push.example.org/sub/4";
    request(state.clone(), "POST", "/add", add_body(endpoint)).await;

    let resp = request(
      state,
      "POST",
      "/pc/push",
      json!({
        "key": SECRET,
        "item": [{ "tags": "rusty sword", "info": { "name": "Rusty Sword" } }]
      }),
    ).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
      body_json(resp).await,
      json!([{ "item": [{ "name": "Rusty Sword" }] }])
    );
  }

  #[tokio::test]
  async fn push_skips_subscriptions_of_other_platforms() {
    let state    = make_state().await;
    let endpoint = "https://push.example.org/sub/5";
    request(state.clone(), "POST", "/add", add_body(endpoint)).await;

    // The subscription is bound to pc only.
    let resp = request(
      state,
      "POST",
      "/ps4/push",
      json!({
        "key": SECRET,
        "item": [{ "tags": "sword", "info": {} }]
      }),
    ).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!([]));
  }

  #[tokio::test]
  async fn push_with_malformed_entities_returns_field_errors() {
    let state = make_state().await;
    let resp  = request(
      state,
      "POST",
      "/pc/push",
      json!({ "key": SECRET, "item": "sword", "creature": [{}] }),
    ).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
      body_json(resp).await,
      json!({ "errors": {
        "creature": "Invalid creature parameter (Missing tags property)",
        "item": "Invalid item parameter (Expected an array)",
      }})
    );
  }

  // ── Delete ─────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn delete_removes_all_filters() {
    let state    = make_state().await;
    let endpoint = "https://push.example.org/sub/6";
    request(state.clone(), "POST", "/add", add_body(endpoint)).await;

    let resp = request(state.clone(), "POST", "/delete", json!({ "endpoint": endpoint })).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!(3));

    let encoded = URL_SAFE_NO_PAD.encode(endpoint);
    let resp    = request(state, "GET", &format!("/{encoded}"), json!(null)).await;
    assert_eq!(body_json(resp).await, json!({}));
  }

  #[tokio::test]
  async fn platform_delete_unbinds_only_that_platform() {
    let state    = make_state().await;
    let endpoint = "https://push.example.org/sub/7";
    let body     = json!({
      "subscription": subscription(endpoint),
      "platforms": ["pc", "ps4"],
      "item": ["sword"]
    });
    request(state.clone(), "POST", "/add", body).await;

    let resp = request(state.clone(), "POST", "/ps4/delete", json!({ "endpoint": endpoint })).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!(1));

    // Filters themselves survive; only the ps4 binding is gone.
    let encoded = URL_SAFE_NO_PAD.encode(endpoint);
    let resp    = request(state, "GET", &format!("/{encoded}"), json!(null)).await;
    assert_eq!(body_json(resp).await, json!({ "item": ["sword"] }));
  }

  #[tokio::test]
  async fn delete_without_endpoint_is_rejected() {
    let state = make_state().await;
    let resp  = request(state, "POST", "/delete", json!({})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
      body_json(resp).await,
      json!({ "errors": { "endpoint": "Missing endpoint parameter" } })
    );
  }

  // ── /test ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn test_notification_is_rate_limited_per_endpoint() {
    let state = make_state().await;
    let body  = json!({ "subscription": subscription("https://push.example.org/sub/8") });

    let resp = request(state.clone(), "POST", "/test", body.clone()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = request(state.clone(), "POST", "/test", body).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(
      body_json(resp).await,
      json!({ "error": "Rate limit of one request per 30 seconds exceeded" })
    );

    // A different endpoint is admitted immediately.
    let other = json!({ "subscription": subscription("https://push.example.org/sub/9") });
    let resp  = request(state, "POST", "/test", other).await;
    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn test_without_subscription_is_rejected() {
    let state = make_state().await;
    let resp  = request(state, "POST", "/test", json!({ "payload": { "title": "hi" } })).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
      body_json(resp).await,
      json!({ "errors": { "subscription": "Missing subscription parameter" } })
    );
  }

  // ── CORS ───────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn responses_carry_cors_headers() {
    let state = make_state().await;
    let req   = Request::builder()
      .method("OPTIONS")
      .uri("/add")
      .header(header::ORIGIN, "https://client.example.org")
      .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
      .body(Body::empty())
      .unwrap();
    let resp = router(state).oneshot(req).await.unwrap();
    assert_eq!(
      resp
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .and_then(|v| v.to_str().ok()),
      Some("*")
    );
  }
}
