//! Translates a live gRPC call into a matcher query and the matcher's answer
//! into a gRPC response.

use std::collections::HashMap;
use std::time::Duration;

use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};
use serde_json::{Map, Value};
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, KeyAndValueRef, MetadataMap};
use tonic::{Code, Response, Status};
use tracing::{error, trace, warn};

use crate::storage::StubStore;
use crate::stub::FindStubPayload;

/// Handle one unary call.
///
/// The inbound message is rendered as a generic JSON tree and resolved
/// against the catalog. The winning stub's output is applied in order:
/// response metadata, latency (slept here, after the catalog lock has been
/// released), status and payload. A stub with a non-empty `error` and no
/// `code` is aborted; an explicit `code` of OK responds normally.
pub async fn handle_call(
  store: &StubStore,
  service: &str,
  method: &str,
  metadata: &MetadataMap,
  request: &DynamicMessage,
  response_descriptor: MessageDescriptor,
) -> Result<Response<DynamicMessage>, Status> {
  let payload = FindStubPayload {
    service: service.to_string(),
    method: method.to_string(),
    data: message_to_tree(request)?,
    headers: flatten_metadata(metadata),
  };
  trace!(?payload, "resolving stub for call");

  let output = store.find(&payload).map_err(|err| Status::aborted(err.to_string()))?;

  let response_metadata = output.headers.as_ref().map(build_metadata).unwrap_or_default();

  if let Some(latency) = output.latency {
    tokio::time::sleep(Duration::from_millis(latency)).await;
  }

  if !output.error.is_empty() || output.code.is_some() {
    let code = output.code.map(Code::from_i32).unwrap_or(Code::Aborted);
    if code != Code::Ok {
      return Err(Status::with_metadata(code, output.error, response_metadata));
    }
  }

  let message = tree_to_message(output.data, response_descriptor).map_err(|err| {
    error!("Failed to unmarshal stub output into the response message: {}", err);
    Status::internal(err.to_string())
  })?;
  let mut response = Response::new(message);
  *response.metadata_mut() = response_metadata;
  Ok(response)
}

/// Serialize a message to its canonical JSON tree: schema field names, 64-bit
/// integers as numbers, default-valued fields omitted.
fn message_to_tree(message: &DynamicMessage) -> Result<Map<String, Value>, Status> {
  let options = SerializeOptions::new()
    .use_proto_field_name(true)
    .stringify_64_bit_integers(false);
  let tree = message
    .serialize_with_options(serde_json::value::Serializer, &options)
    .map_err(|err| {
      error!("Failed to marshal the request message: {}", err);
      Status::internal(err.to_string())
    })?;
  match tree {
    Value::Object(map) => Ok(map),
    other => Err(Status::internal(format!("request message rendered as {other}, not an object"))),
  }
}

/// Unmarshal the stub's output data into the outbound message type.
fn tree_to_message(
  data: Map<String, Value>,
  descriptor: MessageDescriptor,
) -> anyhow::Result<DynamicMessage> {
  let message = DynamicMessage::deserialize_with_options(
    descriptor,
    Value::Object(data),
    &DeserializeOptions::new(),
  )?;
  Ok(message)
}

/// Flatten the request metadata to a string-to-string mapping: the first
/// value wins where a header is multi-valued, binary-valued keys are skipped.
fn flatten_metadata(metadata: &MetadataMap) -> HashMap<String, String> {
  let mut headers = HashMap::new();
  for entry in metadata.iter() {
    if let KeyAndValueRef::Ascii(key, value) = entry {
      if let Ok(value) = value.to_str() {
        headers.entry(key.as_str().to_string()).or_insert_with(|| value.to_string());
      }
    }
  }
  headers
}

/// Build outbound metadata from a stub's configured headers. Entries that are
/// not valid gRPC metadata are logged and dropped.
fn build_metadata(headers: &HashMap<String, String>) -> MetadataMap {
  let mut metadata = MetadataMap::new();
  for (key, value) in headers {
    match (key.parse::<AsciiMetadataKey>(), value.parse::<AsciiMetadataValue>()) {
      (Ok(key), Ok(value)) => {
        metadata.insert(key, value);
      }
      _ => warn!("'{}: {}' is not a valid gRPC metadata entry, ignoring it", key, value),
    }
  }
  metadata
}
