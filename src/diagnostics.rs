//! Rendering of "stub not found" reports.
//!
//! When resolution fails, every stub whose body discipline was evaluated is
//! retained as a close match. The report shows the failing query and the
//! close match whose keys and values co-occur most with the rendered query.
//! Ranking is diagnostic only and never influences which stub wins.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::stub::{FindStubPayload, copy_headers};

/// A stub considered during resolution that did not win.
#[derive(Debug, Clone)]
pub struct CloseMatch {
  /// Body discipline that was evaluated.
  pub rule: &'static str,
  /// The expected body of that discipline.
  pub expect: Map<String, Value>,
  /// Header sub-constraint under test when the body matched, if any.
  pub headers_rule: Option<&'static str>,
  /// Expected headers of that sub-constraint.
  pub headers: Option<HashMap<String, String>>,
}

impl CloseMatch {
  pub fn new(rule: &'static str, expect: Map<String, Value>) -> Self {
    CloseMatch { rule, expect, headers_rule: None, headers: None }
  }
}

/// Render the multi-section failure report for a query no stub matched,
/// including the best ranked close match when any were collected.
pub fn stub_not_found_report(payload: &FindStubPayload, close_matches: &[CloseMatch]) -> String {
  let mut template = format!(
    "Can't find stub \n\nService: {} \n\nMethod: {} \n\nInput\n\n",
    payload.service, payload.method
  );
  let mut rendered = format!("Data:\n{}", render_fields(&payload.data));
  template.push_str(&rendered);
  if !payload.headers.is_empty() {
    let headers = format!("\nHeaders:\n{}", render_fields(&copy_headers(&payload.headers)));
    template.push_str(&headers);
    rendered.push_str(&headers);
  }

  let Some(first) = close_matches.first() else {
    return template;
  };

  let mut highest = (0.0_f32, first);
  for close_match in close_matches {
    let rank = rank_match(&rendered, &close_match.expect);
    // the higher the better; with all ranks at zero the first collected wins
    if rank > highest.0 {
      highest = (rank, close_match);
    }
  }
  let closest = highest.1;

  template.push_str(&format!(
    "\n\nClosest Match \n\n{}:{}",
    closest.rule,
    render_fields(&closest.expect)
  ));
  if let (Some(rule), Some(headers)) = (closest.headers_rule, &closest.headers) {
    template.push_str(&format!("\nHeaders {}:\n{}", rule, render_fields(&copy_headers(headers))));
  }
  template
}

/// Rank a close match against the rendered query: the number of expected keys
/// (as a `key:` literal) and stringified values occurring as fuzzy
/// subsequences, over the total number of keys and values.
fn rank_match(rendered: &str, expect: &Map<String, Value>) -> f32 {
  let mut occurrence = 0;
  for (key, value) in expect {
    if fuzzy_match(&format!("{key}:"), rendered) {
      occurrence += 1;
    }
    if fuzzy_match(&render_value(value), rendered) {
      occurrence += 1;
    }
  }
  if occurrence == 0 {
    return 0.0;
  }
  occurrence as f32 / (expect.len() * 2) as f32
}

/// True when `needle` occurs as a character subsequence of `haystack`.
fn fuzzy_match(needle: &str, haystack: &str) -> bool {
  let mut haystack = haystack.chars();
  needle.chars().all(|wanted| haystack.any(|found| found == wanted))
}

fn render_fields(fields: &Map<String, Value>) -> String {
  let mut template = String::from("{\n");
  for (key, value) in fields {
    template.push_str(&format!("\t{}: {}\n", key, render_value(value)));
  }
  template.push('}');
  template
}

/// Strings render bare, everything else renders as JSON.
fn render_value(value: &Value) -> String {
  match value {
    Value::String(string) => string.clone(),
    other => other.to_string(),
  }
}
