//! Thread-safe stub catalog and request ledger.
//!
//! The catalog maps a service name to a method name to the ordered list of
//! stubs declared for that pair. Resolution walks a bucket in insertion order
//! and returns the first stub whose body discipline and header constraint are
//! both satisfied. Every query is recorded in the ledger, matched or not.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use crate::diagnostics::{self, CloseMatch};
use crate::matching;
use crate::stub::{
  FindStubPayload, HeaderConstraint, RequestRecord, Stub, StubEntry, StubOutput, copy_headers,
};

/// Catalog snapshot: service name to method name to the ordered stub bucket.
pub type StubCatalog = HashMap<String, HashMap<String, Vec<StubEntry>>>;

/// Failure taxonomy of stub resolution. The rendered messages are part of the
/// admin API and gRPC error surface.
#[derive(Debug, Error)]
pub enum MatchError {
  #[error("can't find stub for Service: {0}")]
  ServiceNotFound(String),
  #[error("can't find stub for Service:{service} and Method:{method}")]
  MethodNotFound { service: String, method: String },
  #[error("Stub for Service:{service} and Method:{method} is empty")]
  EmptyBucket { service: String, method: String },
  #[error("{0}")]
  NoStubMatched(String),
}

#[derive(Debug, Default)]
struct StoreInner {
  stubs: StubCatalog,
  requests: Vec<RequestRecord>,
}

/// Shared catalog of stubs plus the ledger of observed queries.
///
/// All operations serialise on one process-wide mutex; snapshots are returned
/// by value so callers never read under the lock.
#[derive(Debug, Default)]
pub struct StubStore {
  inner: Mutex<StoreInner>,
}

impl StubStore {
  pub fn new() -> Self {
    StubStore::default()
  }

  /// Append a stub to its bucket, normalising the method name. Buckets keep
  /// insertion order and are never deduplicated.
  pub fn store(&self, stub: Stub) {
    let method = normalize_method(&stub.method);
    debug!("Storing stub for {}/{}", stub.service, method);
    let mut inner = self.inner.lock().unwrap();
    inner
      .stubs
      .entry(stub.service)
      .or_default()
      .entry(method)
      .or_default()
      .push(StubEntry { input: stub.input, output: stub.output });
  }

  /// Snapshot of the full catalog.
  pub fn all(&self) -> StubCatalog {
    self.inner.lock().unwrap().stubs.clone()
  }

  /// Snapshot of the request ledger.
  pub fn all_requests(&self) -> Vec<RequestRecord> {
    self.inner.lock().unwrap().requests.clone()
  }

  /// Empty the catalog and the ledger.
  pub fn clear(&self) {
    let mut inner = self.inner.lock().unwrap();
    inner.stubs.clear();
    inner.requests.clear();
  }

  /// Resolve a query against the catalog. The query is recorded in the
  /// ledger whether or not a stub matches; the returned output is a copy, so
  /// the caller holds no lock while acting on it.
  pub fn find(&self, payload: &FindStubPayload) -> Result<StubOutput, MatchError> {
    let mut payload = payload.clone();
    payload.method = normalize_method(&payload.method);

    let mut inner = self.inner.lock().unwrap();
    record_request(&mut inner.requests, &payload);

    let Some(methods) = inner.stubs.get(&payload.service) else {
      return Err(MatchError::ServiceNotFound(payload.service.clone()));
    };
    let Some(bucket) = methods.get(&payload.method) else {
      return Err(MatchError::MethodNotFound {
        service: payload.service.clone(),
        method: payload.method.clone(),
      });
    };
    if bucket.is_empty() {
      return Err(MatchError::EmptyBucket {
        service: payload.service.clone(),
        method: payload.method.clone(),
      });
    }

    let mut close_matches = vec![];
    for entry in bucket {
      if let Some(expect) = &entry.input.equals {
        let mut close_match = CloseMatch::new("equals", expect.clone());
        if matching::equals(expect, &payload.data)
          && headers_satisfied(entry.input.headers.as_ref(), &payload, &mut close_match)
        {
          return Ok(entry.output.clone());
        }
        close_matches.push(close_match);
      }

      if let Some(expect) = &entry.input.equals_unordered {
        let mut close_match = CloseMatch::new("equals_unordered", expect.clone());
        if matching::equals_unordered(expect, &payload.data)
          && headers_satisfied(entry.input.headers.as_ref(), &payload, &mut close_match)
        {
          return Ok(entry.output.clone());
        }
        close_matches.push(close_match);
      }

      if let Some(expect) = &entry.input.contains {
        let mut close_match = CloseMatch::new("contains", expect.clone());
        if matching::contains(expect, &payload.data)
          && headers_satisfied(entry.input.headers.as_ref(), &payload, &mut close_match)
        {
          return Ok(entry.output.clone());
        }
        close_matches.push(close_match);
      }

      if let Some(expect) = &entry.input.matches {
        let mut close_match = CloseMatch::new("matches", expect.clone());
        if matching::matches(expect, &payload.data)
          && headers_satisfied(entry.input.headers.as_ref(), &payload, &mut close_match)
        {
          return Ok(entry.output.clone());
        }
        close_matches.push(close_match);
      }
    }

    Err(MatchError::NoStubMatched(diagnostics::stub_not_found_report(&payload, &close_matches)))
  }
}

/// Increment the counter of a structurally equal recorded query, or append a
/// fresh record.
fn record_request(requests: &mut Vec<RequestRecord>, payload: &FindStubPayload) {
  for request in requests.iter_mut() {
    if request.record == *payload {
      request.count += 1;
      return;
    }
  }
  requests.push(RequestRecord { record: payload.clone(), count: 1 });
}

/// Evaluate the header constraint of a body-matching stub.
///
/// An absent constraint is satisfied. Otherwise the populated sub-constraints
/// are tried in order and the first satisfied one satisfies the whole; a
/// failing sub-constraint does not block the later ones. The close match
/// records which sub-constraint and expectation were last under test.
fn headers_satisfied(
  constraint: Option<&HeaderConstraint>,
  payload: &FindStubPayload,
  close_match: &mut CloseMatch,
) -> bool {
  let Some(constraint) = constraint else {
    return true;
  };
  let actual = copy_headers(&payload.headers);

  if let Some(expect) = &constraint.equals {
    close_match.headers_rule = Some("equal");
    close_match.headers = Some(expect.clone());
    if matching::equals(&copy_headers(expect), &actual) {
      return true;
    }
  }

  if let Some(expect) = &constraint.equals_unordered {
    close_match.headers_rule = Some("equal_unordered");
    close_match.headers = Some(expect.clone());
    if matching::equals_unordered(&copy_headers(expect), &actual) {
      return true;
    }
  }

  if let Some(expect) = &constraint.contains {
    close_match.headers_rule = Some("contains");
    close_match.headers = Some(expect.clone());
    if matching::header_find(&copy_headers(expect), &actual) {
      return true;
    }
  }

  if let Some(expect) = &constraint.matches {
    close_match.headers_rule = Some("match");
    close_match.headers = Some(expect.clone());
    if matching::matches(&copy_headers(expect), &actual) {
      return true;
    }
  }

  false
}

/// Upper-case the first character of the method name, leaving the rest
/// untouched. Applied identically when storing and when querying, so stubs
/// written by producers that disagree on the leading case still line up.
pub fn normalize_method(method: &str) -> String {
  let mut chars = method.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}
