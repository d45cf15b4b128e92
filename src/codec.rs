//! gRPC codec for runtime-resolved message types.
//!
//! Tonic's stock codec works with compile-time generated types. This one
//! works with `prost-reflect` message descriptors instead, so the server can
//! decode and encode protobuf for methods that are only known once a
//! descriptor set has been loaded.

use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::Status;
use tonic::codec::{BufferSettings, Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};

/// Codec over dynamic messages. Only decoding needs a descriptor (a
/// `DynamicMessage` carries its own for encoding), so one codec serves both
/// directions of a call.
#[derive(Debug, Clone)]
pub struct DynamicCodec {
  inbound: MessageDescriptor,
}

impl DynamicCodec {
  /// `inbound` describes the messages this side of the wire receives: the
  /// request type on a server, the response type on a client.
  pub fn new(inbound: MessageDescriptor) -> Self {
    DynamicCodec { inbound }
  }
}

impl Codec for DynamicCodec {
  type Encode = DynamicMessage;
  type Decode = DynamicMessage;
  type Encoder = DynamicEncoder;
  type Decoder = DynamicDecoder;

  fn encoder(&mut self) -> Self::Encoder {
    DynamicEncoder {}
  }

  fn decoder(&mut self) -> Self::Decoder {
    DynamicDecoder { inbound: self.inbound.clone() }
  }
}

pub struct DynamicEncoder {}

impl Encoder for DynamicEncoder {
  type Item = DynamicMessage;
  type Error = Status;

  fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
    item
      .encode(dst)
      .map_err(|err| Status::internal(format!("failed to encode message: {err}")))
  }

  fn buffer_settings(&self) -> BufferSettings {
    BufferSettings::default()
  }
}

pub struct DynamicDecoder {
  inbound: MessageDescriptor,
}

impl Decoder for DynamicDecoder {
  type Item = DynamicMessage;
  type Error = Status;

  fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
    let message = DynamicMessage::decode(self.inbound.clone(), src)
      .map_err(|err| Status::internal(format!("failed to decode message: {err}")))?;
    Ok(Some(message))
  }

  fn buffer_settings(&self) -> BufferSettings {
    BufferSettings::default()
  }
}
