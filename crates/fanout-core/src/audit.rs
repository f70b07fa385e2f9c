//! Best-effort audit recording: the persistent error log and the
//! notification history.
//!
//! The store is the primary sink. When a store write fails, the entry goes
//! to a flat-file fallback (with the store failure embedded), and failing
//! that, to the process log. Nothing here ever propagates into the request
//! path.

use std::{io::Write as _, path::PathBuf};

use crate::store::{HistoryEntry, SubscriptionStore};

#[derive(Debug, Clone, Default)]
pub struct AuditLog {
  /// Flat-file fallback used when the store write fails.
  fallback_path: Option<PathBuf>,
}

impl AuditLog {
  pub fn new(fallback_path: Option<PathBuf>) -> Self {
    AuditLog { fallback_path }
  }

  /// Append one error-log row.
  pub async fn record_error<S: SubscriptionStore>(
    &self,
    store: &S,
    source: &str,
    message: &str,
    details: &str,
  ) {
    if let Err(store_failure) = store.record_error(source, message, details).await {
      self.fall_back(&store_failure.to_string(), source, message, details);
    }
  }

  /// Append write-ahead history rows for a notification batch.
  pub async fn record_history<S: SubscriptionStore>(
    &self,
    store: &S,
    entries: &[HistoryEntry],
  ) {
    if let Err(store_failure) = store.record_history(entries).await {
      self.fall_back(
        &store_failure.to_string(),
        "history",
        &format!("failed to record {} history rows", entries.len()),
        "",
      );
    }
  }

  fn fall_back(&self, store_failure: &str, source: &str, message: &str, details: &str) {
    if let Some(path) = &self.fallback_path {
      let line = format!("{store_failure}\n{source}: {message}\n{details}\n\n");
      let appended = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(line.as_bytes()));
      if appended.is_ok() {
        return;
      }
    }
    tracing::error!(source, message, details, store_failure, "audit write failed");
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use serde_json::json;
  use thiserror::Error;

  use super::*;
  use crate::{
    store::MatchCandidate,
    subscription::{NewRegistration, Subscription, SubscriptionId},
  };

  #[derive(Debug, Error)]
  #[error("store unavailable")]
  struct Unavailable;

  /// A store whose audit writes always fail.
  struct BrokenStore;

  impl SubscriptionStore for BrokenStore {
    type Error = Unavailable;

    async fn register(&self, _: NewRegistration) -> Result<usize, Unavailable> {
      Err(Unavailable)
    }
    async fn remove_subscription(&self, _: &str) -> Result<usize, Unavailable> {
      Err(Unavailable)
    }
    async fn remove_platform(&self, _: &str, _: &str) -> Result<usize, Unavailable> {
      Err(Unavailable)
    }
    async fn filters_for_endpoint(
      &self,
      _: &str,
    ) -> Result<BTreeMap<String, Vec<String>>, Unavailable> {
      Err(Unavailable)
    }
    async fn find_match_candidates(
      &self,
      _: &str,
      _: Option<&[String]>,
    ) -> Result<Vec<MatchCandidate>, Unavailable> {
      Err(Unavailable)
    }
    async fn resolve(&self, _: &[SubscriptionId]) -> Result<Vec<Subscription>, Unavailable> {
      Err(Unavailable)
    }
    async fn delete_subscriptions(&self, _: &[SubscriptionId]) -> Result<usize, Unavailable> {
      Err(Unavailable)
    }
    async fn record_history(&self, _: &[HistoryEntry]) -> Result<(), Unavailable> {
      Err(Unavailable)
    }
    async fn record_error(&self, _: &str, _: &str, _: &str) -> Result<(), Unavailable> {
      Err(Unavailable)
    }
  }

  #[tokio::test]
  async fn falls_back_to_file_when_store_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("errors.log");
    let audit = AuditLog::new(Some(path.clone()));

    audit
      .record_error(&BrokenStore, "transport.flush", "410 Gone", "details here")
      .await;

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("store unavailable"));
    assert!(contents.contains("transport.flush: 410 Gone"));
    assert!(contents.contains("details here"));
  }

  #[tokio::test]
  async fn fallback_entries_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("errors.log");
    let audit = AuditLog::new(Some(path.clone()));

    audit.record_error(&BrokenStore, "a", "first", "").await;
    audit.record_error(&BrokenStore, "b", "second", "").await;

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("a: first"));
    assert!(contents.contains("b: second"));
  }

  #[tokio::test]
  async fn history_failure_is_absorbed() {
    // No fallback file configured: the failure lands in the process log and
    // must not panic or propagate.
    let audit = AuditLog::new(None);
    let entries = vec![HistoryEntry { subscription_id: Some(1), payload: json!({}) }];
    audit.record_history(&BrokenStore, &entries).await;
  }
}
