//! Control-plane liveness messages.
//!
//! `control_ping` doubles as the multipart terminator: the dispatcher sends
//! one after every dump-style request, and the peer's `control_ping_reply`
//! marks the end of the detail stream.

use std::any::Any;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{take_i32, take_u32};
use crate::error::Result;
use crate::message::{Message, MessageType};

/// Empty liveness request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ControlPing {}

impl Message for ControlPing {
    fn message_name(&self) -> &'static str {
        "control_ping"
    }
    fn message_crc(&self) -> u32 {
        0x51077d14
    }
    fn message_type(&self) -> MessageType {
        MessageType::Request
    }
    fn encode_fields(&self, _dst: &mut BytesMut) -> Result<()> {
        Ok(())
    }
    fn decode_fields(&mut self, _src: &mut Bytes) -> Result<()> {
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for [`ControlPing`].
pub fn new_control_ping() -> Box<dyn Message> {
    Box::new(ControlPing::default())
}

/// Reply to [`ControlPing`]; terminates multipart streams.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ControlPingReply {
    pub retval: i32,
    pub client_index: u32,
    pub vpe_pid: u32,
}

impl Message for ControlPingReply {
    fn message_name(&self) -> &'static str {
        "control_ping_reply"
    }
    fn message_crc(&self) -> u32 {
        0xf6b0b8ca
    }
    fn message_type(&self) -> MessageType {
        MessageType::Reply
    }
    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i32(self.retval);
        dst.put_u32(self.client_index);
        dst.put_u32(self.vpe_pid);
        Ok(())
    }
    fn decode_fields(&mut self, src: &mut Bytes) -> Result<()> {
        self.retval = take_i32(src, "retval")?;
        self.client_index = take_u32(src, "client_index")?;
        self.vpe_pid = take_u32(src, "vpe_pid")?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for [`ControlPingReply`].
pub fn new_control_ping_reply() -> Box<dyn Message> {
    Box::new(ControlPingReply::default())
}
