//! HTTP error mapping for the Fanout service.
//!
//! Only authorization, rate-limit and validation failures are
//! caller-visible by design; delivery and persistence problems are absorbed
//! into the audit log before a response is built. Anything surfacing here as
//! a store error is a read path that could not proceed at all.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Core(#[from] fanout_core::Error),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::Core(fanout_core::Error::Forbidden) => (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "Permission denied" })),
      )
        .into_response(),

      ApiError::Core(fanout_core::Error::RateLimited { min_delay, retry_after }) => {
        let message =
          format!("Rate limit of one request per {min_delay} seconds exceeded");
        let mut response = (
          StatusCode::TOO_MANY_REQUESTS,
          Json(json!({ "error": message })),
        )
          .into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
          response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
      }

      ApiError::Core(fanout_core::Error::Invalid(fields)) => {
        (StatusCode::BAD_REQUEST, Json(json!({ "errors": fields }))).into_response()
      }

      ApiError::Core(fanout_core::Error::Store(e)) => (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
      )
        .into_response(),

      ApiError::BadRequest(message) => {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
      }

      ApiError::Store(e) => (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
      )
        .into_response(),
    }
  }
}
