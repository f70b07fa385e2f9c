//! The filter-match algorithm.
//!
//! A filter is a whitespace-separated list of lowercase words; it matches an
//! entity when every filter word is a prefix of a *distinct* word in the
//! entity's tag text. An empty filter matches everything.

/// A text split into its non-empty lowercase words, in order.
///
/// Built once per filter and once per entity, then reused across every
/// evaluation involving that text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordSet(Vec<String>);

impl WordSet {
  pub fn new(text: &str) -> Self {
    WordSet(
      text
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect(),
    )
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn words(&self) -> &[String] {
    &self.0
  }
}

/// Test whether every filter word has a distinct prefix match among the
/// search words.
///
/// Each search word may satisfy at most one filter word: without that
/// consumption rule the filter "har har" would trigger on the single word
/// "hares". Consumption state is local to this one evaluation.
pub fn matches(filter: &WordSet, search: &WordSet) -> bool {
  if filter.0.is_empty() {
    return true;
  }

  let mut consumed = vec![false; search.0.len()];
  'filters: for want in &filter.0 {
    for (i, have) in search.0.iter().enumerate() {
      if !consumed[i] && have.starts_with(want.as_str()) {
        consumed[i] = true;
        continue 'filters;
      }
    }
    return false;
  }
  true
}
