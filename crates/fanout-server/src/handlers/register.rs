//! Registration handlers — the client-facing subscription surface.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/add` | Body: subscription + platforms + per-type filter lists; replaces the stored filter set wholesale |
//! | `POST` | `/delete` | Body: `{"endpoint":"..."}`; drops every filter of the subscription |
//! | `POST` | `/:platform/delete` | Same body; unbinds only that platform |
//! | `GET`  | `/:endpoint` | `:endpoint` is URL-safe base64; returns `{type: [pattern, ...]}` |

use std::collections::BTreeMap;

use axum::{
  Json,
  extract::{Path, State},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use fanout_core::{
  Error,
  cache::Cache,
  dispatch::DispatchConfig,
  error::FieldErrors,
  store::SubscriptionStore,
  subscription::{Filter, NewRegistration},
  transport::PushTransport,
};
use serde_json::{Map, Value};

use crate::{AppState, error::ApiError, handlers};

// ─── Add ─────────────────────────────────────────────────────────────────────

/// `POST /add` — returns the number of filters stored.
pub async fn add<S, T, C>(
  State(state): State<AppState<S, T, C>>,
  Json(body): Json<Value>,
) -> Result<Json<usize>, ApiError>
where
  S: SubscriptionStore + 'static,
  T: PushTransport + 'static,
  C: Cache + 'static,
{
  let params = handlers::as_params(&body)?;
  let config = state.dispatcher.config();

  let subscription = handlers::parse_subscription(params, config)?;
  let platforms = parse_platforms(params, config)?;
  let filters = parse_filters(params, config)?;

  let stored = state
    .store
    .register(NewRegistration { subscription, platforms, filters })
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(stored))
}

/// Validate the platform list: every entry known, duplicates collapsed.
fn parse_platforms(
  params: &Map<String, Value>,
  config: &DispatchConfig,
) -> Result<Vec<String>, ApiError> {
  let entries = match params.get("platforms") {
    Some(Value::Array(entries)) if !entries.is_empty() => entries,
    _ => return Err(Error::invalid("platforms", "Missing platforms parameter").into()),
  };

  let mut platforms: Vec<String> = Vec::new();
  for entry in entries {
    let Some(platform) = entry.as_str() else {
      return Err(Error::invalid("platforms", "Missing platforms parameter").into());
    };
    let platform = platform.trim();
    config.validate_platform(platform)?;
    if !platforms.iter().any(|known| known == platform) {
      platforms.push(platform.to_string());
    }
  }
  Ok(platforms)
}

/// Collect the per-type filter lists. A type submitted with no non-empty
/// patterns is stored as one empty-pattern filter ("always matches");
/// malformed lists are aggregated into one validation error.
fn parse_filters(
  params: &Map<String, Value>,
  config: &DispatchConfig,
) -> Result<Vec<Filter>, ApiError> {
  let mut filters = Vec::new();
  let mut problems = FieldErrors::new();

  for entity_type in &config.entity_types {
    let Some(value) = params.get(entity_type) else { continue };
    match parse_filters_for_type(entity_type, value) {
      Ok(of_type) => filters.extend(of_type),
      Err(()) => {
        problems.insert(
          entity_type.clone(),
          "Parameter must be an array of strings".to_string(),
        );
      }
    }
  }

  if problems.is_empty() {
    Ok(filters)
  } else {
    Err(Error::Invalid(problems).into())
  }
}

fn parse_filters_for_type(entity_type: &str, value: &Value) -> Result<Vec<Filter>, ()> {
  let Some(patterns) = value.as_array() else { return Err(()) };

  let mut filters = Vec::new();
  for pattern in patterns {
    let Some(pattern) = pattern.as_str() else { return Err(()) };
    let pattern = pattern.trim();
    if !pattern.is_empty() {
      filters.push(Filter {
        entity_type: entity_type.to_string(),
        pattern:     pattern.to_string(),
      });
    }
  }
  if filters.is_empty() {
    filters.push(Filter {
      entity_type: entity_type.to_string(),
      pattern:     String::new(),
    });
  }
  Ok(filters)
}

// ─── Delete ──────────────────────────────────────────────────────────────────

/// `POST /delete` — drop every filter of the subscription. Returns the
/// number of removed filters.
pub async fn delete_all<S, T, C>(
  State(state): State<AppState<S, T, C>>,
  Json(body): Json<Value>,
) -> Result<Json<usize>, ApiError>
where
  S: SubscriptionStore + 'static,
  T: PushTransport + 'static,
  C: Cache + 'static,
{
  let params = handlers::as_params(&body)?;
  let endpoint = parse_endpoint(params, state.dispatcher.config())?;

  let removed = state
    .store
    .remove_subscription(&endpoint)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(removed))
}

/// `POST /:platform/delete` — unbind one platform from the subscription's
/// filters. Returns the number of removed bindings.
pub async fn delete_platform<S, T, C>(
  Path(platform): Path<String>,
  State(state): State<AppState<S, T, C>>,
  Json(body): Json<Value>,
) -> Result<Json<usize>, ApiError>
where
  S: SubscriptionStore + 'static,
  T: PushTransport + 'static,
  C: Cache + 'static,
{
  let config = state.dispatcher.config();
  config.validate_platform(&platform)?;
  let params = handlers::as_params(&body)?;
  let endpoint = parse_endpoint(params, config)?;

  let removed = state
    .store
    .remove_platform(&endpoint, &platform)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(removed))
}

fn parse_endpoint(
  params: &Map<String, Value>,
  config: &DispatchConfig,
) -> Result<String, ApiError> {
  let Some(endpoint) = params.get("endpoint").and_then(Value::as_str) else {
    return Err(Error::invalid("endpoint", "Missing endpoint parameter").into());
  };
  config.validate_endpoint(endpoint)?;
  Ok(endpoint.to_string())
}

// ─── Get ─────────────────────────────────────────────────────────────────────

/// `GET /:endpoint` — stored filters for an endpoint, grouped by type.
pub async fn get_filters<S, T, C>(
  Path(encoded): Path<String>,
  State(state): State<AppState<S, T, C>>,
) -> Result<Json<BTreeMap<String, Vec<String>>>, ApiError>
where
  S: SubscriptionStore + 'static,
  T: PushTransport + 'static,
  C: Cache + 'static,
{
  let endpoint = decode_endpoint(&encoded)
    .ok_or_else(|| Error::invalid("endpoint", "Invalid endpoint parameter"))?;
  state.dispatcher.config().validate_endpoint(&endpoint)?;

  let filters = state
    .store
    .filters_for_endpoint(&endpoint)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(filters))
}

/// Decode a URL-safe base64 endpoint, tolerating padded input.
fn decode_endpoint(encoded: &str) -> Option<String> {
  let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()?;
  String::from_utf8(bytes).ok()
}
