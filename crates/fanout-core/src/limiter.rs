//! Cache-backed admission control for the manual test-notification path.

use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{cache::Cache, error::Error};

/// Single-flight admission check, one entry per key.
pub struct RateLimiter<C> {
  cache: Arc<C>,
}

impl<C: Cache> RateLimiter<C> {
  pub fn new(cache: Arc<C>) -> Self {
    RateLimiter { cache }
  }

  /// Admit one request for `key`, or reject with [`Error::RateLimited`]
  /// when a prior request landed less than `min_delay` ago.
  ///
  /// Admission relies on the cache's atomic store-if-absent, so two
  /// near-simultaneous requests for the same key cannot both be admitted.
  pub async fn admit(&self, key: &str, min_delay: Duration) -> Result<(), Error> {
    if min_delay.is_zero() {
      return Ok(());
    }

    let now = Utc::now().timestamp();
    if self.cache.add(key, now, min_delay).await {
      return Ok(());
    }

    let min_delay_secs = min_delay.as_secs();
    // Lost the slot. Read the prior timestamp for retry-after context; if
    // the entry expired in between, stay rejected with the full delay
    // rather than racing a second add.
    let retry_after = match self.cache.get(key).await {
      Some(prior) => {
        let elapsed = now.saturating_sub(prior).max(0) as u64;
        min_delay_secs.saturating_sub(elapsed).max(1)
      }
      None => min_delay_secs,
    };
    Err(Error::RateLimited { min_delay: min_delay_secs, retry_after })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryCache;

  fn limiter() -> RateLimiter<MemoryCache> {
    RateLimiter::new(Arc::new(MemoryCache::new()))
  }

  #[tokio::test]
  async fn first_admitted_second_rejected() {
    let limiter = limiter();
    let delay = Duration::from_secs(30);
    assert!(limiter.admit("/test:ep", delay).await.is_ok());
    let rejection = limiter.admit("/test:ep", delay).await.unwrap_err();
    match rejection {
      Error::RateLimited { min_delay, retry_after } => {
        assert_eq!(min_delay, 30);
        assert!(retry_after >= 1 && retry_after <= 30);
      }
      other => panic!("expected RateLimited, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn admitted_again_after_delay_elapses() {
    let limiter = limiter();
    let delay = Duration::from_millis(20);
    assert!(limiter.admit("/test:ep", delay).await.is_ok());
    std::thread::sleep(Duration::from_millis(30));
    assert!(limiter.admit("/test:ep", delay).await.is_ok());
  }

  #[tokio::test]
  async fn distinct_keys_do_not_interfere() {
    let limiter = limiter();
    let delay = Duration::from_secs(30);
    assert!(limiter.admit("/test:a", delay).await.is_ok());
    assert!(limiter.admit("/test:b", delay).await.is_ok());
  }

  #[tokio::test]
  async fn zero_delay_disables_limiting() {
    let limiter = limiter();
    assert!(limiter.admit("/test:ep", Duration::ZERO).await.is_ok());
    assert!(limiter.admit("/test:ep", Duration::ZERO).await.is_ok());
  }
}
