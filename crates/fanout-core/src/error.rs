//! Error types for `fanout-core`.

use std::collections::BTreeMap;

use thiserror::Error;

/// Per-field validation failures, keyed by the offending request field.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum Error {
  /// Shared-secret mismatch. Surfaced before any store access.
  #[error("permission denied")]
  Forbidden,

  /// Admission check rejected the request.
  #[error("rate limit of one request per {min_delay} seconds exceeded")]
  RateLimited {
    /// The configured minimum delay, in seconds.
    min_delay:   u64,
    /// Seconds until the next request for this key would be admitted.
    retry_after: u64,
  },

  /// Malformed request input, one message per offending field.
  #[error("invalid parameters: {}", format_fields(.0))]
  Invalid(FieldErrors),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// A validation error for a single field.
  pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
    let mut fields = FieldErrors::new();
    fields.insert(field.into(), message.into());
    Error::Invalid(fields)
  }

  /// Wrap a storage backend error.
  pub fn store<E>(source: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Error::Store(Box::new(source))
  }
}

fn format_fields(fields: &FieldErrors) -> String {
  fields
    .iter()
    .map(|(field, message)| format!("{field}: {message}"))
    .collect::<Vec<_>>()
    .join("; ")
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
