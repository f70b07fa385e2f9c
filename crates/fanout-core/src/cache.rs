//! Cache capability trait and the in-process implementation.
//!
//! The dispatch core only needs the cache for rate-limit bookkeeping:
//! string-keyed `i64` timestamps with a TTL and an atomic store-if-absent.
//! Backend selection happens at startup; there is no runtime class-name
//! resolution.

use std::{
  collections::HashMap,
  future::Future,
  sync::{Mutex, PoisonError},
  time::{Duration, Instant},
};

/// Minimal key/value cache capability.
pub trait Cache: Send + Sync {
  /// Fetch a live value. Expired entries read as absent.
  fn get<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Option<i64>> + Send + 'a;

  /// Store a value, replacing any existing entry.
  fn set<'a>(
    &'a self,
    key: &'a str,
    value: i64,
    ttl: Duration,
  ) -> impl Future<Output = ()> + Send + 'a;

  /// Atomic store-if-absent. Returns `false` when a live entry already
  /// exists, leaving it untouched.
  fn add<'a>(
    &'a self,
    key: &'a str,
    value: i64,
    ttl: Duration,
  ) -> impl Future<Output = bool> + Send + 'a;

  /// Remove an entry. Returns whether a live entry was present.
  fn delete<'a>(&'a self, key: &'a str) -> impl Future<Output = bool> + Send + 'a;
}

// ─── In-process implementation ───────────────────────────────────────────────

struct Entry {
  value:      i64,
  expires_at: Option<Instant>,
}

impl Entry {
  fn is_live(&self, now: Instant) -> bool {
    self.expires_at.is_none_or(|at| at > now)
  }
}

/// Process-local cache: a mutex-guarded map with per-entry expiry.
///
/// Expired entries are purged lazily on access. `add` holds the lock for the
/// whole check-then-insert, which gives it the required test-and-set
/// atomicity within one process.
#[derive(Default)]
pub struct MemoryCache {
  entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn expiry(ttl: Duration) -> Option<Instant> {
    // TTL zero means "keep until replaced", matching shared-cache semantics.
    (!ttl.is_zero()).then(|| Instant::now() + ttl)
  }
}

impl Cache for MemoryCache {
  async fn get(&self, key: &str) -> Option<i64> {
    let now = Instant::now();
    let mut entries = self.lock();
    match entries.get(key) {
      Some(entry) if entry.is_live(now) => Some(entry.value),
      Some(_) => {
        entries.remove(key);
        None
      }
      None => None,
    }
  }

  async fn set(&self, key: &str, value: i64, ttl: Duration) {
    self
      .lock()
      .insert(key.to_string(), Entry { value, expires_at: Self::expiry(ttl) });
  }

  async fn add(&self, key: &str, value: i64, ttl: Duration) -> bool {
    let now = Instant::now();
    let mut entries = self.lock();
    if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
      return false;
    }
    entries.insert(key.to_string(), Entry { value, expires_at: Self::expiry(ttl) });
    true
  }

  async fn delete(&self, key: &str) -> bool {
    let now = Instant::now();
    self
      .lock()
      .remove(key)
      .is_some_and(|entry| entry.is_live(now))
  }
}
