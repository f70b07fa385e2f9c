//! [`SqliteStore`] — the SQLite implementation of [`SubscriptionStore`].

use std::{collections::BTreeMap, path::Path};

use chrono::Utc;
use rusqlite::OptionalExtension as _;

use fanout_core::{
  store::{HistoryEntry, MatchCandidate, SubscriptionStore},
  subscription::{NewRegistration, Subscription, SubscriptionId},
};

use crate::{Error, Result, schema::SCHEMA};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Fanout subscription store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted. All writes
/// that must be atomic for concurrent readers (registration, invalidation)
/// run in explicit transactions on the store's single connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Raw connection access for test assertions.
  #[cfg(test)]
  pub(crate) fn conn(&self) -> &tokio_rusqlite::Connection {
    &self.conn
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

/// `?n, ?n+1, ...` placeholder list for a dynamic `IN (...)` clause.
fn placeholders(first: usize, count: usize) -> String {
  (first..first + count)
    .map(|n| format!("?{n}"))
    .collect::<Vec<_>>()
    .join(", ")
}

// ─── SubscriptionStore impl ──────────────────────────────────────────────────

impl SubscriptionStore for SqliteStore {
  type Error = Error;

  // ── Registration ──────────────────────────────────────────────────────────

  async fn register(&self, registration: NewRegistration) -> Result<usize> {
    let stored = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let existing: Option<SubscriptionId> = tx
          .query_row(
            "SELECT subscription_id FROM subscriptions WHERE endpoint = ?1",
            rusqlite::params![registration.subscription.endpoint],
            |row| row.get(0),
          )
          .optional()?;

        let subscription_id = match existing {
          // Known endpoint: drop the old filter set, keep the row.
          Some(id) => {
            tx.execute(
              "DELETE FROM filters WHERE subscription_id = ?1",
              rusqlite::params![id],
            )?;
            id
          }
          None => {
            tx.execute(
              "INSERT INTO subscriptions (endpoint, p256dh, auth, expiration)
               VALUES (?1, ?2, ?3, ?4)",
              rusqlite::params![
                registration.subscription.endpoint,
                registration.subscription.keys.p256dh,
                registration.subscription.keys.auth,
                registration.subscription.expiration_time,
              ],
            )?;
            tx.last_insert_rowid()
          }
        };

        let mut stored = 0usize;
        {
          let mut filter_stmt = tx.prepare(
            "INSERT INTO filters (subscription_id, entity_type, pattern)
             VALUES (?1, ?2, ?3)",
          )?;
          let mut platform_stmt = tx.prepare(
            "INSERT INTO filter_platforms (filter_id, platform) VALUES (?1, ?2)",
          )?;
          for filter in &registration.filters {
            filter_stmt.execute(rusqlite::params![
              subscription_id,
              filter.entity_type,
              filter.pattern,
            ])?;
            let filter_id = tx.last_insert_rowid();
            for platform in &registration.platforms {
              platform_stmt.execute(rusqlite::params![filter_id, platform])?;
            }
            stored += 1;
          }
        }

        tx.commit()?;
        Ok(stored)
      })
      .await?;
    Ok(stored)
  }

  async fn remove_subscription(&self, endpoint: &str) -> Result<usize> {
    let endpoint = endpoint.to_string();
    let removed = self
      .conn
      .call(move |conn| {
        let removed = conn.execute(
          "DELETE FROM filters
           WHERE subscription_id IN (
             SELECT subscription_id FROM subscriptions WHERE endpoint = ?1
           )",
          rusqlite::params![endpoint],
        )?;
        Ok(removed)
      })
      .await?;
    Ok(removed)
  }

  async fn remove_platform(&self, endpoint: &str, platform: &str) -> Result<usize> {
    let endpoint = endpoint.to_string();
    let platform = platform.to_string();
    let removed = self
      .conn
      .call(move |conn| {
        let removed = conn.execute(
          "DELETE FROM filter_platforms
           WHERE platform = ?1
             AND filter_id IN (
               SELECT filter_id
               FROM filters
               JOIN subscriptions USING (subscription_id)
               WHERE endpoint = ?2
             )",
          rusqlite::params![platform, endpoint],
        )?;
        Ok(removed)
      })
      .await?;
    Ok(removed)
  }

  async fn filters_for_endpoint(
    &self,
    endpoint: &str,
  ) -> Result<BTreeMap<String, Vec<String>>> {
    let endpoint = endpoint.to_string();
    let rows: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT entity_type, pattern
           FROM filters
           JOIN subscriptions USING (subscription_id)
           WHERE endpoint = ?1
           ORDER BY filter_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![endpoint], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut filters: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (entity_type, pattern) in rows {
      filters.entry(entity_type).or_default().push(pattern);
    }
    Ok(filters)
  }

  // ── Matching ──────────────────────────────────────────────────────────────

  async fn find_match_candidates(
    &self,
    platform: &str,
    entity_types: Option<&[String]>,
  ) -> Result<Vec<MatchCandidate>> {
    let mut query = "
      SELECT f.subscription_id, f.entity_type, f.pattern
      FROM filters f
      JOIN filter_platforms fp ON fp.filter_id = f.filter_id
      WHERE fp.platform = ?1"
      .to_string();
    let mut params: Vec<String> = vec![platform.to_string()];
    if let Some(types) = entity_types {
      query.push_str(&format!(
        " AND f.entity_type IN ({})",
        placeholders(2, types.len())
      ));
      params.extend(types.iter().cloned());
    }
    query.push_str(" ORDER BY f.filter_id");

    let candidates = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(MatchCandidate {
              subscription_id: row.get(0)?,
              entity_type:     row.get(1)?,
              pattern:         row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(candidates)
  }

  async fn resolve(&self, ids: &[SubscriptionId]) -> Result<Vec<Subscription>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    let query = format!(
      "SELECT subscription_id, endpoint, p256dh, auth, expiration
       FROM subscriptions
       WHERE subscription_id IN ({})
       ORDER BY subscription_id",
      placeholders(1, ids.len())
    );
    let ids = ids.to_vec();

    let subscriptions = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(ids), |row| {
            Ok(Subscription {
              subscription_id: row.get(0)?,
              endpoint:        row.get(1)?,
              p256dh:          row.get(2)?,
              auth:            row.get(3)?,
              expiration:      row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(subscriptions)
  }

  // ── Reconciliation ────────────────────────────────────────────────────────

  async fn delete_subscriptions(&self, ids: &[SubscriptionId]) -> Result<usize> {
    if ids.is_empty() {
      return Ok(0);
    }
    let query = format!(
      "DELETE FROM subscriptions WHERE subscription_id IN ({})",
      placeholders(1, ids.len())
    );
    let ids = ids.to_vec();

    let removed = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&query)?;
        let removed = stmt.execute(rusqlite::params_from_iter(ids))?;
        Ok(removed)
      })
      .await?;
    Ok(removed)
  }

  async fn record_history(&self, entries: &[HistoryEntry]) -> Result<()> {
    if entries.is_empty() {
      return Ok(());
    }
    let rows: Vec<(Option<SubscriptionId>, String)> = entries
      .iter()
      .map(|entry| (entry.subscription_id, entry.payload.to_string()))
      .collect();
    let recorded_at = Utc::now().to_rfc3339();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO notification_history (subscription_id, payload, recorded_at)
             VALUES (?1, ?2, ?3)",
          )?;
          for (subscription_id, payload) in &rows {
            stmt.execute(rusqlite::params![subscription_id, payload, recorded_at])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn record_error(&self, source: &str, message: &str, details: &str) -> Result<()> {
    let source = source.to_string();
    let message = message.to_string();
    let details = details.to_string();
    let recorded_at = Utc::now().to_rfc3339();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO notification_errors (source, message, details, recorded_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![source, message, details, recorded_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
