//! Data model for the stub catalog.
//!
//! These types mirror the JSON wire format of stub files on disk and of the
//! admin HTTP API. A stub pairs an input constraint (one of four body
//! disciplines plus an optional header constraint) with the output to replay
//! when the constraint is satisfied.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single expectation: when a call to `service`/`method` arrives with a
/// body and headers satisfying `input`, the server answers with `output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stub {
  pub service: String,
  pub method: String,
  #[serde(default)]
  pub input: StubInput,
  #[serde(default)]
  pub output: StubOutput,
}

/// Request body constraint. At most one of the four disciplines is honoured;
/// the resolver tries them in the declared order and accepts the first that
/// matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StubInput {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub equals: Option<Map<String, Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub equals_unordered: Option<Map<String, Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub contains: Option<Map<String, Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub matches: Option<Map<String, Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub headers: Option<HeaderConstraint>,
}

/// The same four disciplines over the flattened string-to-string request
/// metadata. `contains` is substring containment on the header value, not
/// equality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderConstraint {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub equals: Option<HashMap<String, String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub equals_unordered: Option<HashMap<String, String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub contains: Option<HashMap<String, String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub matches: Option<HashMap<String, String>>,
}

/// The response side of a stub.
///
/// `code` carries a raw gRPC status code. When it is absent the call succeeds
/// if `error` is empty and is aborted with `error` otherwise. `latency` is in
/// milliseconds and is slept before responding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StubOutput {
  #[serde(default)]
  pub data: Map<String, Value>,
  #[serde(default)]
  pub error: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub code: Option<i32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub headers: Option<HashMap<String, String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub latency: Option<u64>,
}

/// One stored catalog entry. The capitalised field names are part of the
/// admin API wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StubEntry {
  #[serde(rename = "Input")]
  pub input: StubInput,
  #[serde(rename = "Output")]
  pub output: StubOutput,
}

/// The query submitted for matching: one inbound call rendered as a generic
/// JSON tree plus its metadata flattened to single values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindStubPayload {
  pub service: String,
  pub method: String,
  #[serde(default)]
  pub data: Map<String, Value>,
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub headers: HashMap<String, String>,
}

/// Ledger entry: one distinct observed query and its occurrence count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
  pub record: FindStubPayload,
  pub count: u64,
}

/// Widen a string-to-string header map into a generic value tree so the
/// structural matcher can compare it.
pub(crate) fn copy_headers(headers: &HashMap<String, String>) -> Map<String, Value> {
  headers
    .iter()
    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
    .collect()
}
