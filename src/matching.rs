//! Structural matching over JSON-like value trees.
//!
//! The public disciplines are thin settings of one recursive machine:
//!
//! | discipline         | exact | leaf predicate | ignore order |
//! |--------------------|-------|----------------|--------------|
//! | `equals`           | yes   | deep equal     | no           |
//! | `equals_unordered` | yes   | deep equal     | yes          |
//! | `contains`         | no    | deep equal     | no           |
//! | `matches`          | no    | regex          | no           |
//! | `header_find`      | no    | substring      | no           |
//!
//! `exact` requires mapping and array sizes to agree on both sides; otherwise
//! the expected tree only has to be covered by the actual one.

use std::collections::HashMap;
use std::sync::Mutex;

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

/// Leaf comparison used once the recursion reaches non-container values.
type MatchFn = fn(&Value, &Value) -> bool;

lazy_static! {
  /// Compiled patterns for the `matches` discipline. A pattern that fails to
  /// compile is cached as `None` and never retried.
  static ref REGEX_CACHE: Mutex<HashMap<String, Option<Regex>>> = Mutex::new(HashMap::new());
}

/// Exact structural equality.
pub fn equals(expect: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
  find_object(expect, actual, true, deep_equal, false)
}

/// Exact structural equality, except array comparisons ignore element order.
pub fn equals_unordered(expect: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
  find_object(expect, actual, true, deep_equal, true)
}

/// Subset match: every expected key must be present and equal, extra keys and
/// array elements in the actual tree are tolerated.
pub fn contains(expect: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
  find_object(expect, actual, false, deep_equal, false)
}

/// Subset match where expected string leaves are regular expressions applied
/// to the corresponding actual leaf.
pub fn matches(expect: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
  find_object(expect, actual, false, regex_match, false)
}

/// Subset match where expected string leaves must occur as substrings of the
/// actual leaf. Used for the header `contains` discipline.
pub fn header_find(expect: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
  find_object(expect, actual, false, substring_match, false)
}

fn find_object(
  expect: &Map<String, Value>,
  actual: &Map<String, Value>,
  exact: bool,
  leaf: MatchFn,
  ignore_order: bool,
) -> bool {
  if exact {
    if expect.len() != actual.len() {
      return false;
    }
  } else if expect.len() > actual.len() {
    return false;
  }
  // a key missing from the actual tree resolves to a null leaf
  expect.iter().all(|(key, value)| {
    find(value, actual.get(key).unwrap_or(&Value::Null), exact, leaf, ignore_order)
  })
}

fn find(expect: &Value, actual: &Value, exact: bool, leaf: MatchFn, ignore_order: bool) -> bool {
  match (expect, actual) {
    (Value::Array(expect), Value::Array(actual)) => {
      if exact {
        if expect.len() != actual.len() {
          return false;
        }
      } else if expect.len() > actual.len() {
        return false;
      }
      if ignore_order {
        return equals_ignore_order(expect, actual);
      }
      expect
        .iter()
        .zip(actual)
        .all(|(expect, actual)| find(expect, actual, exact, leaf, ignore_order))
    }
    (Value::Array(_), _) => false,
    (Value::Object(expect), Value::Object(actual)) => {
      find_object(expect, actual, exact, leaf, ignore_order)
    }
    (Value::Object(_), _) => false,
    _ => leaf(expect, actual),
  }
}

/// Compare two arrays pairwise after sorting both by the stringified form of
/// each element.
fn equals_ignore_order(expect: &[Value], actual: &[Value]) -> bool {
  if expect.len() != actual.len() {
    return false;
  }
  expect
    .iter()
    .sorted_by_cached_key(|value| value.to_string())
    .zip(actual.iter().sorted_by_cached_key(|value| value.to_string()))
    .all(|(expect, actual)| deep_equal(expect, actual))
}

/// Value equality with numeric JSON types normalised to doubles, so `1` and
/// `1.0` compare equal.
fn deep_equal(expect: &Value, actual: &Value) -> bool {
  match (expect, actual) {
    (Value::Number(expect), Value::Number(actual)) => expect.as_f64() == actual.as_f64(),
    (Value::Array(expect), Value::Array(actual)) => {
      expect.len() == actual.len() && expect.iter().zip(actual).all(|(e, a)| deep_equal(e, a))
    }
    (Value::Object(expect), Value::Object(actual)) => {
      expect.len() == actual.len()
        && expect
          .iter()
          .all(|(key, value)| actual.get(key).is_some_and(|other| deep_equal(value, other)))
    }
    _ => expect == actual,
  }
}

/// Interpret the expected leaf as a regular expression when both sides are
/// strings, falling back to deep equality otherwise. Patterns compile once;
/// a malformed pattern is a permanent non-match.
fn regex_match(expect: &Value, actual: &Value) -> bool {
  if let (Value::String(pattern), Value::String(actual)) = (expect, actual) {
    let compiled = {
      let mut cache = REGEX_CACHE.lock().unwrap();
      cache
        .entry(pattern.clone())
        .or_insert_with(|| {
          Regex::new(pattern)
            .map_err(|err| warn!("Error compiling regex {}: {}", pattern, err))
            .ok()
        })
        .clone()
    };
    compiled.is_some_and(|regex| regex.is_match(actual))
  } else {
    deep_equal(expect, actual)
  }
}

fn substring_match(expect: &Value, actual: &Value) -> bool {
  match (expect, actual) {
    (Value::String(expect), Value::String(actual)) => actual.contains(expect.as_str()),
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use expectest::prelude::*;
  use rstest::rstest;
  use serde_json::json;

  use super::*;

  fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
  }

  #[test]
  fn equals_requires_the_same_tree() {
    let expect = object(json!({"name": "Alice", "age": 30}));
    expect!(equals(&expect, &object(json!({"name": "Alice", "age": 30})))).to(be_true());
    expect!(equals(&expect, &object(json!({"name": "Bob", "age": 30})))).to(be_false());
  }

  #[test]
  fn equals_rejects_extra_fields_in_actual() {
    let expect = object(json!({"name": "Alice"}));
    let actual = object(json!({"name": "Alice", "age": 30}));
    expect!(equals(&expect, &actual)).to(be_false());
    expect!(contains(&expect, &actual)).to(be_true());
  }

  #[rstest]
  #[case(json!({"ids": [1, 2, 3]}), json!({"ids": [3, 2, 1]}), true)]
  #[case(json!({"ids": [1, 2, 3]}), json!({"ids": [1, 2, 3]}), true)]
  #[case(json!({"ids": [1, 2, 3]}), json!({"ids": [1, 2]}), false)]
  #[case(json!({"ids": ["b", "a"]}), json!({"ids": ["a", "b"]}), true)]
  fn equals_unordered_ignores_array_order(
    #[case] expect: Value,
    #[case] actual: Value,
    #[case] result: bool,
  ) {
    expect!(equals_unordered(&object(expect), &object(actual))).to(be_equal_to(result));
  }

  #[test]
  fn equals_is_sensitive_to_array_order() {
    let expect = object(json!({"ids": [1, 2, 3]}));
    expect!(equals(&expect, &object(json!({"ids": [3, 2, 1]})))).to(be_false());
  }

  #[test]
  fn contains_matches_nested_subsets() {
    let expect = object(json!({"user": {"role": "admin"}}));
    expect!(contains(&expect, &object(json!({"user": {"role": "admin", "id": 7}}))))
      .to(be_true());
    expect!(contains(&expect, &object(json!({"user": {"role": "guest"}})))).to(be_false());
    expect!(contains(&expect, &object(json!({"user": "admin"})))).to(be_false());
  }

  #[rstest]
  #[case(json!({"name": "^A.*"}), json!({"name": "Amy"}), true)]
  #[case(json!({"name": "^A.*"}), json!({"name": "Bob"}), false)]
  #[case(json!({"name": "^A.*", "id": 7}), json!({"name": "Amy", "id": 7}), true)]
  fn matches_applies_regexes_to_string_leaves(
    #[case] expect: Value,
    #[case] actual: Value,
    #[case] result: bool,
  ) {
    expect!(matches(&object(expect), &object(actual))).to(be_equal_to(result));
  }

  #[test]
  fn malformed_regex_is_never_a_match() {
    let expect = object(json!({"name": "[unclosed"}));
    expect!(matches(&expect, &object(json!({"name": "[unclosed"})))).to(be_false());
    // second evaluation exercises the cached entry
    expect!(matches(&expect, &object(json!({"name": "anything"})))).to(be_false());
  }

  #[test]
  fn regex_falls_back_to_deep_equal_for_non_strings() {
    let expect = object(json!({"count": 3}));
    expect!(matches(&expect, &object(json!({"count": 3})))).to(be_true());
    expect!(matches(&expect, &object(json!({"count": 4})))).to(be_false());
  }

  #[test]
  fn numbers_compare_as_doubles() {
    let expect = object(json!({"total": 1}));
    expect!(equals(&expect, &object(json!({"total": 1.0})))).to(be_true());
    expect!(contains(
      &object(json!({"scores": [1, 2.5]})),
      &object(json!({"scores": [1.0, 2.5]}))
    ))
    .to(be_true());
  }

  #[test]
  fn missing_keys_resolve_to_a_null_leaf() {
    // "b" is absent from the actual tree; its null expectation is satisfied
    // by the null leaf the lookup resolves to
    let expect = object(json!({"a": 1, "b": null}));
    expect!(contains(&expect, &object(json!({"a": 1, "x": 2})))).to(be_true());
    expect!(contains(&object(json!({"name": "Alice"})), &object(json!({"id": 1}))))
      .to(be_false());
  }

  #[test]
  fn array_and_object_shape_mismatches_fail() {
    expect!(equals(&object(json!({"ids": [1]})), &object(json!({"ids": 1})))).to(be_false());
    expect!(equals(&object(json!({"user": {"id": 1}})), &object(json!({"user": [1]}))))
      .to(be_false());
  }

  #[test]
  fn contains_compares_array_prefixes_by_index() {
    let expect = object(json!({"ids": [1, 2]}));
    expect!(contains(&expect, &object(json!({"ids": [1, 2, 3]})))).to(be_true());
    expect!(contains(&expect, &object(json!({"ids": [2, 1, 3]})))).to(be_false());
  }

  #[test]
  fn header_find_is_substring_containment() {
    let expect = object(json!({"authorization": "Bearer"}));
    expect!(header_find(&expect, &object(json!({"authorization": "Bearer token-1"}))))
      .to(be_true());
    expect!(header_find(&expect, &object(json!({"authorization": "Basic abc"}))))
      .to(be_false());
    expect!(header_find(&expect, &object(json!({})))).to(be_false());
  }
}
