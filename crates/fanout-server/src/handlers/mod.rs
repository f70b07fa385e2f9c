//! Request handlers for the Fanout HTTP surface.

pub mod push;
pub mod register;

use fanout_core::{
  Error, dispatch::DispatchConfig, subscription::NewSubscription,
};
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Pull the request body out as a JSON object.
pub(crate) fn as_params(body: &Value) -> Result<&Map<String, Value>, ApiError> {
  body
    .as_object()
    .ok_or_else(|| ApiError::BadRequest("Invalid input data".to_string()))
}

/// Validate and return the push subscription carried in the request body.
pub(crate) fn parse_subscription(
  params: &Map<String, Value>,
  config: &DispatchConfig,
) -> Result<NewSubscription, ApiError> {
  let Some(value) = params.get("subscription") else {
    return Err(Error::invalid("subscription", "Missing subscription parameter").into());
  };
  let subscription: NewSubscription = serde_json::from_value(value.clone())
    .map_err(|_| Error::invalid("subscription", "Invalid subscription parameters"))?;
  config.validate_subscription(&subscription)?;
  Ok(subscription)
}
