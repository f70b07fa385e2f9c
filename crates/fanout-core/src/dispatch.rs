//! The dispatch orchestrator: collect, match, build, deliver, reconcile.
//!
//! One [`Dispatcher`] is built at startup and shared across requests. It
//! holds no cross-request mutable state of its own — the store and the
//! rate-limit cache are the only shared resources, and the transport sits
//! behind a mutex so one batch owns it from first enqueue to flush.

use std::{
  collections::{BTreeMap, HashMap},
  sync::Arc,
  time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use crate::{
  audit::AuditLog,
  cache::Cache,
  entity::{Entity, MatchResult},
  error::{Error, FieldErrors, Result},
  limiter::RateLimiter,
  matcher::{self, WordSet},
  store::{HistoryEntry, SubscriptionStore},
  subscription::{NewSubscription, SubscriptionId, SubscriptionKeys},
  transport::{FlushOutcome, PushTransport},
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Shape of the value returned to dispatch callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
  /// Every attempted payload, in batch order, regardless of outcome.
  #[default]
  Full,
  /// The number of successfully delivered notifications.
  Count,
}

/// Static configuration for the dispatch core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
  /// Known client platforms (e.g. `pc`, `ps4`, `xb1`).
  pub platforms:        Vec<String>,
  /// Known entity types; push request keys outside this list are ignored.
  pub entity_types:     Vec<String>,
  pub response_mode:    ResponseMode,
  /// Construct notifications but never hand them to the transport.
  pub dry_run:          bool,
  /// Minimum seconds between test notifications per endpoint; 0 disables.
  pub test_min_delay:   u64,
  pub endpoint_max_len: usize,
}

impl Default for DispatchConfig {
  fn default() -> Self {
    DispatchConfig {
      platforms:        Vec::new(),
      entity_types:     Vec::new(),
      response_mode:    ResponseMode::Full,
      dry_run:          false,
      test_min_delay:   30,
      endpoint_max_len: 2000,
    }
  }
}

impl DispatchConfig {
  pub fn validate_platform(&self, platform: &str) -> Result<()> {
    if self.platforms.iter().any(|known| known == platform) {
      Ok(())
    } else {
      Err(Error::invalid("platform", format!("Unknown platform '{platform}'")))
    }
  }

  /// Check that an endpoint doesn't look unreasonable. UTF-8 validity is
  /// inherent to `str`; only the length bound is checked here.
  pub fn validate_endpoint(&self, endpoint: &str) -> Result<()> {
    if endpoint.len() > self.endpoint_max_len {
      return Err(Error::invalid(
        "endpoint",
        format!("Parameter length exceeds {} characters", self.endpoint_max_len),
      ));
    }
    Ok(())
  }

  pub fn validate_subscription(&self, subscription: &NewSubscription) -> Result<()> {
    if subscription.keys.p256dh.is_empty() || subscription.keys.auth.is_empty() {
      return Err(Error::invalid("subscription", "Invalid subscription parameters"));
    }
    self.validate_endpoint(&subscription.endpoint)
  }
}

// ─── Batch types ─────────────────────────────────────────────────────────────

/// One unit of work handed to the transport: a subscription snapshot plus
/// the aggregated payload built for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  /// `None` for test notifications targeting unstored subscriptions.
  pub subscription_id: Option<SubscriptionId>,
  pub endpoint:        String,
  pub keys:            SubscriptionKeys,
  pub payload:         Value,
}

/// Result of one dispatch call, shaped per [`ResponseMode`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeliveryReport {
  Full(Vec<Value>),
  Count(u64),
}

fn default_test_payload() -> Value {
  json!({
    "title": "Test notification",
    "body": "If you can read this, the test was most likely successful."
  })
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

pub struct Dispatcher<S, T, C> {
  store:     Arc<S>,
  /// Exclusively owned for the duration of one `send_batch` call.
  transport: Mutex<T>,
  limiter:   RateLimiter<C>,
  audit:     AuditLog,
  config:    DispatchConfig,
}

impl<S, T, C> Dispatcher<S, T, C>
where
  S: SubscriptionStore,
  T: PushTransport,
  C: Cache,
{
  pub fn new(
    store: Arc<S>,
    transport: T,
    cache: Arc<C>,
    audit: AuditLog,
    config: DispatchConfig,
  ) -> Self {
    Dispatcher {
      store,
      transport: Mutex::new(transport),
      limiter: RateLimiter::new(cache),
      audit,
      config,
    }
  }

  pub fn config(&self) -> &DispatchConfig {
    &self.config
  }

  // ── Entry points ──────────────────────────────────────────────────────

  /// Broadcast: match the request's entities against every stored filter
  /// bound to `platform` and deliver one aggregated notification per
  /// matched subscription.
  ///
  /// Authorization is the caller's concern and must have happened already;
  /// nothing here touches the store before platform validation passes.
  pub async fn push(
    &self,
    platform: &str,
    params: &Map<String, Value>,
  ) -> Result<DeliveryReport> {
    self.config.validate_platform(platform)?;
    let entities = self.collect_entities(params)?;

    let mut notifications = Vec::new();
    if !entities.is_empty() {
      let mut matches = self.find_matches(platform, &entities).await?;
      if !matches.is_empty() {
        let ids: Vec<SubscriptionId> = matches.keys().copied().collect();
        let subscriptions =
          self.store.resolve(&ids).await.map_err(Error::store)?;
        for subscription in subscriptions {
          let Some(matched) = matches.remove(&subscription.subscription_id) else {
            continue;
          };
          let payload = matched
            .into_iter()
            .map(|(entity_type, infos)| (entity_type, Value::Array(infos)))
            .collect::<Map<String, Value>>();
          notifications.push(Notification {
            subscription_id: Some(subscription.subscription_id),
            endpoint:        subscription.endpoint,
            keys:            SubscriptionKeys {
              p256dh: subscription.p256dh,
              auth:   subscription.auth,
            },
            payload:         Value::Object(payload),
          });
        }
      }
    }
    Ok(self.send_batch(notifications).await)
  }

  /// Send a single test notification to the provided subscription, behind
  /// the rate limiter.
  pub async fn test(
    &self,
    subscription: NewSubscription,
    payload: Option<Value>,
  ) -> Result<DeliveryReport> {
    self.config.validate_subscription(&subscription)?;
    let payload = payload.unwrap_or_else(default_test_payload);

    if self.config.test_min_delay > 0 {
      let key = format!("/test:{}", subscription.endpoint);
      self
        .limiter
        .admit(&key, Duration::from_secs(self.config.test_min_delay))
        .await?;
    }

    let notification = Notification {
      subscription_id: None,
      endpoint:        subscription.endpoint,
      keys:            subscription.keys,
      payload,
    };
    Ok(self.send_batch(vec![notification]).await)
  }

  // ── Entity collection ─────────────────────────────────────────────────

  /// Pull the entity lists out of the request body, one per known type.
  /// Parse failures are aggregated into a single validation error carrying
  /// one message per offending type.
  fn collect_entities(
    &self,
    params: &Map<String, Value>,
  ) -> Result<BTreeMap<String, Vec<Entity>>> {
    let mut entities = BTreeMap::new();
    let mut problems = FieldErrors::new();

    for entity_type in &self.config.entity_types {
      let Some(value) = params.get(entity_type) else { continue };
      if value.is_null() || value.as_array().is_some_and(Vec::is_empty) {
        continue;
      }
      match Entity::parse_list(value) {
        Ok(list) => {
          entities.insert(entity_type.clone(), list);
        }
        Err(reason) => {
          problems.insert(
            entity_type.clone(),
            format!("Invalid {entity_type} parameter ({reason})"),
          );
        }
      }
    }

    if problems.is_empty() {
      Ok(entities)
    } else {
      Err(Error::Invalid(problems))
    }
  }

  // ── Matching ──────────────────────────────────────────────────────────

  /// Evaluate every stored candidate row against every entity of its type.
  async fn find_matches(
    &self,
    platform: &str,
    entities: &BTreeMap<String, Vec<Entity>>,
  ) -> Result<MatchResult> {
    // Narrow the candidate query when the request covers only a subset of
    // the known types. An optimisation, not a correctness requirement.
    let types: Option<Vec<String>> =
      (entities.len() < self.config.entity_types.len())
        .then(|| entities.keys().cloned().collect());

    let candidates = self
      .store
      .find_match_candidates(platform, types.as_deref())
      .await
      .map_err(Error::store)?;

    let mut matches = MatchResult::new();
    for candidate in candidates {
      let Some(of_type) = entities.get(&candidate.entity_type) else {
        continue;
      };
      let filter = WordSet::new(&candidate.pattern);
      for entity in of_type {
        if matcher::matches(&filter, &entity.search) {
          matches
            .entry(candidate.subscription_id)
            .or_default()
            .entry(candidate.entity_type.clone())
            .or_default()
            .push(entity.info.clone());
        }
      }
    }
    Ok(matches)
  }

  // ── Delivery ──────────────────────────────────────────────────────────

  /// Record, deliver and reconcile one notification batch.
  ///
  /// History is written before any delivery attempt; delivery and
  /// persistence failures are absorbed into the audit log and only affect
  /// the success count. The returned report always reflects what was
  /// *attempted*.
  pub async fn send_batch(&self, notifications: Vec<Notification>) -> DeliveryReport {
    let mut successes: u64 = 0;

    if !self.config.dry_run && !notifications.is_empty() {
      let history: Vec<HistoryEntry> = notifications
        .iter()
        .map(|notification| HistoryEntry {
          subscription_id: notification.subscription_id,
          payload:         notification.payload.clone(),
        })
        .collect();
      self.audit.record_history(self.store.as_ref(), &history).await;

      // Endpoint → subscription id, scoped to this batch only; flush
      // results identify notifications by endpoint.
      let mut batch_ids: HashMap<String, Option<SubscriptionId>> = HashMap::new();

      let mut transport = self.transport.lock().await;
      for notification in &notifications {
        batch_ids
          .insert(notification.endpoint.clone(), notification.subscription_id);
        let payload_bytes = notification.payload.to_string().into_bytes();
        match transport.enqueue(
          &notification.endpoint,
          &notification.keys,
          &payload_bytes,
        ) {
          Ok(()) => successes += 1,
          Err(enqueue_error) => {
            let source = match notification.subscription_id {
              Some(id) => format!("transport.enqueue: subscription {id}"),
              None => "transport.enqueue".to_string(),
            };
            self
              .audit
              .record_error(
                self.store.as_ref(),
                &source,
                &enqueue_error.to_string(),
                &notification.payload.to_string(),
              )
              .await;
          }
        }
      }
      let outcome = transport.flush().await;
      drop(transport);

      if let FlushOutcome::Results(results) = outcome {
        let mut invalid: Vec<SubscriptionId> = Vec::new();
        for result in &results {
          if result.success {
            continue;
          }
          successes = successes.saturating_sub(1);
          if result.expired
            && let Some(Some(id)) = batch_ids.get(&result.endpoint)
          {
            invalid.push(*id);
          }
          let message = match result.status_code {
            Some(code) => format!("{code} {}", result.reason),
            None => result.reason.clone(),
          };
          self
            .audit
            .record_error(
              self.store.as_ref(),
              "transport.flush",
              &message,
              &result.message,
            )
            .await;
        }

        if !invalid.is_empty() {
          match self.store.delete_subscriptions(&invalid).await {
            Ok(removed) => {
              tracing::info!(removed, "removed expired subscriptions");
            }
            Err(delete_error) => {
              self
                .audit
                .record_error(
                  self.store.as_ref(),
                  "store.delete_subscriptions",
                  &delete_error.to_string(),
                  &format!("{invalid:?}"),
                )
                .await;
            }
          }
        }
      }
    }

    match self.config.response_mode {
      ResponseMode::Full => DeliveryReport::Full(
        notifications
          .into_iter()
          .map(|notification| notification.payload)
          .collect(),
      ),
      ResponseMode::Count => DeliveryReport::Count(successes),
    }
  }
}
