//! Incoming tagged entities and per-request match results.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{matcher::WordSet, subscription::SubscriptionId};

/// Display info attached to a notification when the request omits it.
pub const DEFAULT_INFO: &str = "New notification";

/// One tagged item from an incoming push request. Request-scoped; the tag
/// text is split into search words exactly once, here.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
  pub search: WordSet,
  /// Opaque display info forwarded verbatim into notification payloads.
  pub info:   Value,
}

impl Entity {
  /// Parse one request value into the entities it lists.
  ///
  /// The error string names what was wrong with the value; the caller embeds
  /// it into its per-type validation message.
  pub fn parse_list(value: &Value) -> Result<Vec<Entity>, String> {
    let Some(items) = value.as_array() else {
      return Err("Expected an array".to_string());
    };

    let mut entities = Vec::with_capacity(items.len());
    for item in items {
      let Some(tags) = item.get("tags") else {
        return Err("Missing tags property".to_string());
      };
      let Some(tags) = tags.as_str() else {
        return Err("Expected a string as tags property".to_string());
      };
      let info = item
        .get("info")
        .cloned()
        .unwrap_or_else(|| Value::String(DEFAULT_INFO.to_string()));
      entities.push(Entity { search: WordSet::new(tags), info });
    }
    Ok(entities)
  }
}

/// Subscription id → entity type → `info` values of matched entities, in
/// request order. Built fresh per request, never persisted.
pub type MatchResult = BTreeMap<SubscriptionId, BTreeMap<String, Vec<Value>>>;

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn parses_entities_and_defaults_info() {
    let value = json!([
      { "tags": "Go Words Fast", "info": "X" },
      { "tags": "other" },
    ]);
    let entities = Entity::parse_list(&value).unwrap();
    assert_eq!(entities.len(), 2);
    assert_eq!(entities[0].search.words(), ["go", "words", "fast"]);
    assert_eq!(entities[0].info, json!("X"));
    assert_eq!(entities[1].info, json!(DEFAULT_INFO));
  }

  #[test]
  fn rejects_non_array() {
    assert_eq!(
      Entity::parse_list(&json!("nope")).unwrap_err(),
      "Expected an array"
    );
  }

  #[test]
  fn rejects_missing_tags() {
    assert_eq!(
      Entity::parse_list(&json!([{ "info": "X" }])).unwrap_err(),
      "Missing tags property"
    );
  }

  #[test]
  fn rejects_non_string_tags() {
    assert_eq!(
      Entity::parse_list(&json!([{ "tags": 7 }])).unwrap_err(),
      "Expected a string as tags property"
    );
  }

  #[test]
  fn info_may_be_structured() {
    let value = json!([{ "tags": "a", "info": { "title": "t", "url": "u" } }]);
    let entities = Entity::parse_list(&value).unwrap();
    assert_eq!(entities[0].info, json!({ "title": "t", "url": "u" }));
  }
}
