//! Subscription types — the durable side of the data model.
//!
//! A subscription is a device's push destination plus its credentials; its
//! identity is the endpoint URL. Filters and platform bindings hang off it
//! and are replaced wholesale on registration. The dispatch core reads
//! subscriptions but never mutates them; the only write it issues is the
//! cascade deletion of invalidated ones.

use serde::{Deserialize, Serialize};

/// Store-assigned subscription identifier.
pub type SubscriptionId = i64;

/// A stored push subscription, as resolved from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
  pub subscription_id: SubscriptionId,
  /// Unique, bounded-length UTF-8 push destination URL.
  pub endpoint:        String,
  pub p256dh:          String,
  pub auth:            String,
  pub expiration:      Option<f64>,
}

/// Client-side encryption keys carried by a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
  pub p256dh: String,
  pub auth:   String,
}

/// A subscription as submitted by a client — the JSON shape produced by the
/// browser's `PushSubscription.toJSON()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubscription {
  pub endpoint: String,
  pub keys:     SubscriptionKeys,
  #[serde(rename = "expirationTime", default)]
  pub expiration_time: Option<f64>,
}

/// One stored filter line: a word-prefix pattern scoped to an entity type.
///
/// An empty pattern means "match every entity of this type".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
  pub entity_type: String,
  pub pattern:     String,
}

/// Wholesale registration payload: the subscription, the platforms its
/// filters apply to, and the full replacement filter set.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRegistration {
  pub subscription: NewSubscription,
  pub platforms:    Vec<String>,
  pub filters:      Vec<Filter>,
}
