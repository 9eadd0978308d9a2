//! Message identity and field codec capabilities.
//!
//! Every value in the generated catalog implements [`Message`]: the
//! compile-time wire identity (name, crc fingerprint, direction) plus
//! big-endian encode/decode of its fields in declared order. The envelope
//! around the fields — message id, client index, context — is owned by
//! [`MsgCodec`](crate::codec::MsgCodec), never by the message itself.

use std::any::Any;

use bytes::{Bytes, BytesMut};

use crate::error::Result;

/// Direction of a message relative to the dataplane peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Sent by the client, carries a client index and a context id.
    Request,
    /// Sent by the peer in answer to a request, echoes the context id.
    Reply,
    /// Asynchronous peer-originated data (events, counters); no context.
    Other,
}

/// Capability set shared by every generated message value.
///
/// Generated types implement this by hand-written-looking field loops; the
/// trait is what lets the registry, codec and dispatcher treat thousands of
/// schema types uniformly.
pub trait Message: Send {
    /// Message name as declared in the schema.
    fn message_name(&self) -> &'static str;

    /// 32-bit fingerprint of the message's field layout.
    fn message_crc(&self) -> u32;

    /// Direction of this message.
    fn message_type(&self) -> MessageType;

    /// Append the message fields to `dst` in declared order.
    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()>;

    /// Read the message fields from `src` in declared order.
    fn decode_fields(&mut self, src: &mut Bytes) -> Result<()>;

    /// Downcast support for notification consumers.
    fn as_any(&self) -> &dyn Any;
}

/// Constructor producing a fresh value of one message type.
///
/// Subscriptions carry a factory so the dispatcher can decode each matching
/// inbound frame into a new value owned by the subscriber.
pub type MessageFactory = fn() -> Box<dyn Message>;
