//! The delivery provider abstraction.
//!
//! The push protocol itself (payload encryption, VAPID signing, HTTP/2
//! framing) lives behind this trait. The dispatch core only requires
//! enqueue-all-then-flush-once semantics with per-item outcomes; it treats
//! the transport as exclusively owned for the duration of one batch.

use std::future::Future;

use thiserror::Error;

use crate::subscription::SubscriptionKeys;

/// A synchronous, per-notification enqueue failure.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Outcome of a single flushed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
  pub endpoint:    String,
  pub success:     bool,
  /// The push service reported the subscription as permanently gone; the
  /// dispatcher queues it for deletion.
  pub expired:     bool,
  pub status_code: Option<u16>,
  pub reason:      String,
  pub message:     String,
}

/// What a flush reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
  /// Sentinel: the provider delivered the whole batch.
  AllDelivered,
  /// Per-notification results; may mix successes and failures.
  Results(Vec<DeliveryResult>),
}

/// A push delivery provider.
///
/// Methods take `&mut self`: the dispatcher serialises batches, so an
/// implementation never sees interleaved enqueue/flush cycles.
pub trait PushTransport: Send {
  /// Queue one notification for the next flush. An error here is
  /// per-notification: the dispatcher logs it and carries on with the rest
  /// of the batch.
  fn enqueue(
    &mut self,
    endpoint: &str,
    keys: &SubscriptionKeys,
    payload: &[u8],
  ) -> Result<(), TransportError>;

  /// Deliver everything queued since the last flush and report outcomes.
  /// Provider-level failures surface as per-notification results, never as
  /// a batch abort.
  fn flush(&mut self) -> impl Future<Output = FlushOutcome> + Send + '_;
}
