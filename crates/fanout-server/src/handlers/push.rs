//! Push handlers — the notification-producing surface.

use axum::{
  Json,
  extract::{Path, State},
};
use fanout_core::{
  Error,
  cache::Cache,
  dispatch::DeliveryReport,
  store::SubscriptionStore,
  transport::PushTransport,
};
use serde_json::{Map, Value};

use crate::{AppState, error::ApiError, handlers};

/// `POST /:platform/push` — match entities against the platform's filters
/// and dispatch the resulting notifications. Requires the shared secret.
pub async fn push<S, T, C>(
  Path(platform): Path<String>,
  State(state): State<AppState<S, T, C>>,
  Json(body): Json<Value>,
) -> Result<Json<DeliveryReport>, ApiError>
where
  S: SubscriptionStore + 'static,
  T: PushTransport + 'static,
  C: Cache + 'static,
{
  let params = handlers::as_params(&body)?;
  authorize(params, &state.config.push_secret)?;

  let report = state.dispatcher.push(&platform, params).await?;
  Ok(Json(report))
}

/// The shared-secret check runs before anything touches the store.
fn authorize(params: &Map<String, Value>, secret: &str) -> Result<(), ApiError> {
  match params.get("key").and_then(Value::as_str) {
    Some(key) if key == secret => Ok(()),
    _ => Err(Error::Forbidden.into()),
  }
}

/// `POST /test` — send a notification straight back to the submitted
/// subscription. Unauthenticated, so admission is rate limited per endpoint.
pub async fn test<S, T, C>(
  State(state): State<AppState<S, T, C>>,
  Json(body): Json<Value>,
) -> Result<Json<DeliveryReport>, ApiError>
where
  S: SubscriptionStore + 'static,
  T: PushTransport + 'static,
  C: Cache + 'static,
{
  let params = handlers::as_params(&body)?;
  let subscription = handlers::parse_subscription(params, state.dispatcher.config())?;
  let payload = params.get("payload").cloned();

  let report = state.dispatcher.test(subscription, payload).await?;
  Ok(Json(report))
}
