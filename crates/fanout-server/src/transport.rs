//! Reqwest-backed [`PushTransport`] implementation.
//!
//! Each queued payload is POSTed to its subscription endpoint with web-push
//! delivery headers. Payload encryption (RFC 8291) and VAPID signing
//! (RFC 8292) are not implemented here — a full web-push client slots in
//! behind the same trait; the subscription keys are accepted and ignored so
//! the call surface already matches.

use std::time::Duration;

use fanout_core::{
  subscription::SubscriptionKeys,
  transport::{DeliveryResult, FlushOutcome, PushTransport, TransportError},
};
use reqwest::{Client, StatusCode, Url};

struct Queued {
  endpoint: String,
  payload:  Vec<u8>,
}

pub struct HttpTransport {
  client:   Client,
  ttl_secs: u32,
  queue:    Vec<Queued>,
}

impl HttpTransport {
  pub fn new(timeout: Duration, ttl_secs: u32) -> Result<Self, TransportError> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| TransportError(format!("failed to build HTTP client: {e}")))?;
    Ok(HttpTransport { client, ttl_secs, queue: Vec::new() })
  }
}

impl PushTransport for HttpTransport {
  fn enqueue(
    &mut self,
    endpoint: &str,
    _keys: &SubscriptionKeys,
    payload: &[u8],
  ) -> Result<(), TransportError> {
    let url = Url::parse(endpoint)
      .map_err(|e| TransportError(format!("invalid endpoint URL: {e}")))?;
    if !matches!(url.scheme(), "https" | "http") {
      return Err(TransportError(format!(
        "unsupported endpoint scheme '{}'",
        url.scheme()
      )));
    }
    self.queue.push(Queued {
      endpoint: endpoint.to_string(),
      payload:  payload.to_vec(),
    });
    Ok(())
  }

  async fn flush(&mut self) -> FlushOutcome {
    let queued = std::mem::take(&mut self.queue);
    let mut results = Vec::with_capacity(queued.len());
    let mut all_delivered = true;

    for item in queued {
      let response = self
        .client
        .post(item.endpoint.as_str())
        .header("TTL", self.ttl_secs)
        .header("Urgency", "normal")
        .body(item.payload)
        .send()
        .await;

      let result = match response {
        Ok(response) if response.status().is_success() => DeliveryResult {
          endpoint:    item.endpoint,
          success:     true,
          expired:     false,
          status_code: Some(response.status().as_u16()),
          reason:      reason(response.status()),
          message:     String::new(),
        },
        Ok(response) => {
          let status = response.status();
          let message = response.text().await.unwrap_or_default();
          DeliveryResult {
            endpoint: item.endpoint,
            success: false,
            // 404/410 are how push services report a gone subscription.
            expired: matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE),
            status_code: Some(status.as_u16()),
            reason: reason(status),
            message,
          }
        }
        Err(send_error) => DeliveryResult {
          endpoint:    item.endpoint,
          success:     false,
          expired:     false,
          status_code: None,
          reason:      "request failed".to_string(),
          message:     send_error.to_string(),
        },
      };

      all_delivered &= result.success;
      results.push(result);
    }

    if all_delivered {
      FlushOutcome::AllDelivered
    } else {
      FlushOutcome::Results(results)
    }
  }
}

fn reason(status: StatusCode) -> String {
  status.canonical_reason().unwrap_or_default().to_string()
}
