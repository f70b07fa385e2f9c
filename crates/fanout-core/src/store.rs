//! The `SubscriptionStore` trait and supporting row types.
//!
//! The trait is implemented by storage backends (e.g. `fanout-store-sqlite`).
//! The dispatch core and the HTTP layer depend on this abstraction, not on
//! any concrete backend.
//!
//! Backends must make `register` and `delete_subscriptions` atomic with
//! respect to concurrent readers: a concurrent match query sees either the
//! fully-old or the fully-new filter set for a subscription, never a partial
//! one.

use std::{collections::BTreeMap, future::Future};

use serde_json::Value;

use crate::subscription::{NewRegistration, Subscription, SubscriptionId};

// ─── Row types ───────────────────────────────────────────────────────────────

/// One (subscription, type, pattern) row to evaluate against incoming
/// entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCandidate {
  pub subscription_id: SubscriptionId,
  pub entity_type:     String,
  pub pattern:         String,
}

/// Write-ahead history row: one per attempted notification, recorded before
/// any delivery outcome is known.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
  /// `None` for test notifications, which may target unstored subscriptions.
  pub subscription_id: Option<SubscriptionId>,
  pub payload:         Value,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the subscription store backend.
pub trait SubscriptionStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Registration ──────────────────────────────────────────────────────

  /// Wholesale-replace a subscription's filters and platform bindings in
  /// one transaction; the subscription row is created if the endpoint is
  /// unknown. Returns the number of filters stored.
  fn register(
    &self,
    registration: NewRegistration,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Remove every filter (and, by cascade, every platform binding) owned by
  /// the subscription with this endpoint. Returns the number of removed
  /// filters. The subscription row itself stays, ready for re-registration.
  fn remove_subscription<'a>(
    &'a self,
    endpoint: &'a str,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Remove one platform's bindings from the subscription's filters, leaving
  /// the filters and any other platforms intact. Returns the number of
  /// removed bindings.
  fn remove_platform<'a>(
    &'a self,
    endpoint: &'a str,
    platform: &'a str,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// All stored filter patterns for an endpoint, grouped by entity type.
  fn filters_for_endpoint<'a>(
    &'a self,
    endpoint: &'a str,
  ) -> impl Future<Output = Result<BTreeMap<String, Vec<String>>, Self::Error>> + Send + 'a;

  // ── Matching ──────────────────────────────────────────────────────────

  /// All (subscription, type, pattern) rows bound to `platform`, optionally
  /// restricted to the given entity types. The restriction is an
  /// optimisation — callers still skip rows for absent types.
  fn find_match_candidates<'a>(
    &'a self,
    platform: &'a str,
    entity_types: Option<&'a [String]>,
  ) -> impl Future<Output = Result<Vec<MatchCandidate>, Self::Error>> + Send + 'a;

  /// Resolve subscription ids to full subscription records. Unknown ids are
  /// silently absent from the result.
  fn resolve<'a>(
    &'a self,
    ids: &'a [SubscriptionId],
  ) -> impl Future<Output = Result<Vec<Subscription>, Self::Error>> + Send + 'a;

  // ── Reconciliation ────────────────────────────────────────────────────

  /// Batched cascade deletion of invalidated subscriptions: each one goes
  /// away together with its filters and platform bindings.
  fn delete_subscriptions<'a>(
    &'a self,
    ids: &'a [SubscriptionId],
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Append history rows for a notification batch.
  fn record_history<'a>(
    &'a self,
    entries: &'a [HistoryEntry],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Append one error-log row.
  fn record_error<'a>(
    &'a self,
    source: &'a str,
    message: &'a str,
    details: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
