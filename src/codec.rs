//! Binary codec for the management protocol envelope.
//!
//! Per-message wire layout, big-endian throughout:
//!
//! ```text
//! request: ┌ msg id ┬ client index ┬ context ┬ fields... ┐
//!          │ u16    │ u32          │ u32     │           │
//! reply:   ┌ msg id ┬ context ┬ fields... ┐
//! other:   ┌ msg id ┬ fields... ┐
//! ```
//!
//! There is no frame-level length prefix — framing belongs to the transport.
//! Fixed-length byte arrays are zero-padded; variable-length arrays carry an
//! explicit element count immediately before the elements.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::message::{Message, MessageType};
use crate::registry::IdentityRegistry;

/// Size of the leading message id field.
pub const MSG_ID_SIZE: usize = 2;

/// Envelope size of a request (id + client index + context).
pub const REQUEST_HEADER_SIZE: usize = 10;

/// Envelope size of a reply (id + context).
pub const REPLY_HEADER_SIZE: usize = 6;

/// Codec for typed message values.
///
/// Cheaply cloneable; encoding consults the identity registry for the
/// peer-assigned message id.
#[derive(Clone)]
pub struct MsgCodec {
    registry: Arc<IdentityRegistry>,
}

impl MsgCodec {
    /// Create a codec backed by the given registry.
    pub fn new(registry: Arc<IdentityRegistry>) -> Self {
        Self { registry }
    }

    /// Encode a message value with the given context id.
    ///
    /// Returns the resolved message id and the complete frame. Fails with
    /// [`Error::NilMessage`] when `msg` is absent, [`Error::UnknownMessage`]
    /// when the peer does not know the type, and [`Error::Encoding`] when a
    /// field cannot be represented on the wire.
    pub fn encode(&self, msg: Option<&dyn Message>, context: u32) -> Result<(u16, Vec<u8>)> {
        let msg = msg.ok_or(Error::NilMessage)?;
        let msg_id = self.registry.resolve(msg)?;

        let mut buf = BytesMut::with_capacity(64);
        buf.put_u16(msg_id);
        match msg.message_type() {
            MessageType::Request => {
                buf.put_u32(0); // client index, filled in by the peer
                buf.put_u32(context);
            }
            MessageType::Reply => buf.put_u32(context),
            MessageType::Other => {}
        }
        msg.encode_fields(&mut buf)?;

        Ok((msg_id, buf.to_vec()))
    }

    /// Decode a frame into the supplied message value.
    ///
    /// Reads the envelope for the target's direction, then the fields in
    /// declared order. Fails with [`Error::NilMessage`] when the target is
    /// absent and [`Error::ShortFrame`] when the frame ends mid-field.
    pub fn decode(&self, data: &[u8], msg: Option<&mut dyn Message>) -> Result<()> {
        let msg = msg.ok_or(Error::NilMessage)?;
        let mut buf = Bytes::copy_from_slice(data);

        take_u16(&mut buf, "message id")?;
        match msg.message_type() {
            MessageType::Request => {
                take_u32(&mut buf, "client index")?;
                take_u32(&mut buf, "context")?;
            }
            MessageType::Reply => {
                take_u32(&mut buf, "context")?;
            }
            MessageType::Other => {}
        }
        msg.decode_fields(&mut buf)
    }

    /// Read the leading message id without consuming the rest of the frame.
    pub fn message_id(data: &[u8]) -> Result<u16> {
        if data.len() < MSG_ID_SIZE {
            return Err(Error::ShortFrame("message id"));
        }
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }

    /// Read the context id at its direction-dependent fixed offset.
    ///
    /// Returns `None` for directions that carry no context, or when the
    /// frame is too short to hold one.
    pub fn peek_context(data: &[u8], direction: MessageType) -> Option<u32> {
        let offset = match direction {
            MessageType::Request => MSG_ID_SIZE + 4,
            MessageType::Reply => MSG_ID_SIZE,
            MessageType::Other => return None,
        };
        data.get(offset..offset + 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// Field helpers used by the generated catalog. Each reports the field being
// decoded so short frames carry a usable diagnostic.

/// Read one byte.
pub fn take_u8(src: &mut Bytes, field: &'static str) -> Result<u8> {
    if src.remaining() < 1 {
        return Err(Error::ShortFrame(field));
    }
    Ok(src.get_u8())
}

/// Read a big-endian u16.
pub fn take_u16(src: &mut Bytes, field: &'static str) -> Result<u16> {
    if src.remaining() < 2 {
        return Err(Error::ShortFrame(field));
    }
    Ok(src.get_u16())
}

/// Read a big-endian u32.
pub fn take_u32(src: &mut Bytes, field: &'static str) -> Result<u32> {
    if src.remaining() < 4 {
        return Err(Error::ShortFrame(field));
    }
    Ok(src.get_u32())
}

/// Read a big-endian i32.
pub fn take_i32(src: &mut Bytes, field: &'static str) -> Result<i32> {
    if src.remaining() < 4 {
        return Err(Error::ShortFrame(field));
    }
    Ok(src.get_i32())
}

/// Read a big-endian u64.
pub fn take_u64(src: &mut Bytes, field: &'static str) -> Result<u64> {
    if src.remaining() < 8 {
        return Err(Error::ShortFrame(field));
    }
    Ok(src.get_u64())
}

/// Append a fixed-length byte array, zero-padded to `len`.
///
/// Fails with [`Error::Encoding`] when `value` exceeds the declared length.
pub fn put_fixed_bytes(
    dst: &mut BytesMut,
    value: &[u8],
    len: usize,
    field: &'static str,
) -> Result<()> {
    if value.len() > len {
        return Err(Error::Encoding(format!(
            "{} is {} bytes, wire field holds {}",
            field,
            value.len(),
            len
        )));
    }
    dst.put_slice(value);
    dst.put_bytes(0, len - value.len());
    Ok(())
}

/// Read a fixed-length byte array.
///
/// Fails with [`Error::LengthMismatch`] when the frame holds fewer than
/// `len` remaining bytes.
pub fn take_fixed_bytes(src: &mut Bytes, len: usize, field: &'static str) -> Result<Bytes> {
    if src.remaining() < len {
        return Err(Error::LengthMismatch {
            field,
            need: len,
            have: src.remaining(),
        });
    }
    Ok(src.split_to(len))
}
