//! Interface management messages.

use std::any::Any;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{put_fixed_bytes, take_fixed_bytes, take_i32, take_u16, take_u32, take_u8};
use crate::error::Result;
use crate::message::{Message, MessageType};

/// Wire length of an interface name.
pub const INTERFACE_NAME_LEN: usize = 64;

/// Wire length of a dump name filter.
pub const NAME_FILTER_LEN: usize = 49;

/// Wire length of a MAC address.
pub const MAC_ADDRESS_LEN: usize = 6;

/// Dump request eliciting one [`SwInterfaceDetails`] per interface.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SwInterfaceDump {
    pub name_filter_valid: u8,
    /// Zero-padded to [`NAME_FILTER_LEN`] bytes on the wire.
    pub name_filter: Vec<u8>,
}

impl Message for SwInterfaceDump {
    fn message_name(&self) -> &'static str {
        "sw_interface_dump"
    }
    fn message_crc(&self) -> u32 {
        0x9a2f9d4d
    }
    fn message_type(&self) -> MessageType {
        MessageType::Request
    }
    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u8(self.name_filter_valid);
        put_fixed_bytes(dst, &self.name_filter, NAME_FILTER_LEN, "name_filter")
    }
    fn decode_fields(&mut self, src: &mut Bytes) -> Result<()> {
        self.name_filter_valid = take_u8(src, "name_filter_valid")?;
        self.name_filter = take_fixed_bytes(src, NAME_FILTER_LEN, "name_filter")?.to_vec();
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for [`SwInterfaceDump`].
pub fn new_sw_interface_dump() -> Box<dyn Message> {
    Box::new(SwInterfaceDump::default())
}

/// One interface description within a dump stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SwInterfaceDetails {
    pub sw_if_index: u32,
    pub sup_sw_if_index: u32,
    /// Zero-padded to [`INTERFACE_NAME_LEN`] bytes on the wire.
    pub interface_name: Vec<u8>,
    pub admin_up_down: u8,
    pub link_up_down: u8,
    pub link_mtu: u16,
}

impl Message for SwInterfaceDetails {
    fn message_name(&self) -> &'static str {
        "sw_interface_details"
    }
    fn message_crc(&self) -> u32 {
        0xe2d855bb
    }
    fn message_type(&self) -> MessageType {
        MessageType::Reply
    }
    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.sw_if_index);
        dst.put_u32(self.sup_sw_if_index);
        put_fixed_bytes(dst, &self.interface_name, INTERFACE_NAME_LEN, "interface_name")?;
        dst.put_u8(self.admin_up_down);
        dst.put_u8(self.link_up_down);
        dst.put_u16(self.link_mtu);
        Ok(())
    }
    fn decode_fields(&mut self, src: &mut Bytes) -> Result<()> {
        self.sw_if_index = take_u32(src, "sw_if_index")?;
        self.sup_sw_if_index = take_u32(src, "sup_sw_if_index")?;
        self.interface_name =
            take_fixed_bytes(src, INTERFACE_NAME_LEN, "interface_name")?.to_vec();
        self.admin_up_down = take_u8(src, "admin_up_down")?;
        self.link_up_down = take_u8(src, "link_up_down")?;
        self.link_mtu = take_u16(src, "link_mtu")?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for [`SwInterfaceDetails`].
pub fn new_sw_interface_details() -> Box<dyn Message> {
    Box::new(SwInterfaceDetails::default())
}

/// Set interface flags; also delivered by the peer as an interface event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SwInterfaceSetFlags {
    pub sw_if_index: u32,
    pub admin_up_down: u8,
    pub link_up_down: u8,
    pub deleted: u8,
}

impl Message for SwInterfaceSetFlags {
    fn message_name(&self) -> &'static str {
        "sw_interface_set_flags"
    }
    fn message_crc(&self) -> u32 {
        0xc230f9b1
    }
    fn message_type(&self) -> MessageType {
        MessageType::Request
    }
    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.sw_if_index);
        dst.put_u8(self.admin_up_down);
        dst.put_u8(self.link_up_down);
        dst.put_u8(self.deleted);
        Ok(())
    }
    fn decode_fields(&mut self, src: &mut Bytes) -> Result<()> {
        self.sw_if_index = take_u32(src, "sw_if_index")?;
        self.admin_up_down = take_u8(src, "admin_up_down")?;
        self.link_up_down = take_u8(src, "link_up_down")?;
        self.deleted = take_u8(src, "deleted")?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for [`SwInterfaceSetFlags`].
pub fn new_sw_interface_set_flags() -> Box<dyn Message> {
    Box::new(SwInterfaceSetFlags::default())
}

/// Reply to [`SwInterfaceSetFlags`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SwInterfaceSetFlagsReply {
    pub retval: i32,
}

impl Message for SwInterfaceSetFlagsReply {
    fn message_name(&self) -> &'static str {
        "sw_interface_set_flags_reply"
    }
    fn message_crc(&self) -> u32 {
        0xdfbf3afa
    }
    fn message_type(&self) -> MessageType {
        MessageType::Reply
    }
    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i32(self.retval);
        Ok(())
    }
    fn decode_fields(&mut self, src: &mut Bytes) -> Result<()> {
        self.retval = take_i32(src, "retval")?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for [`SwInterfaceSetFlagsReply`].
pub fn new_sw_interface_set_flags_reply() -> Box<dyn Message> {
    Box::new(SwInterfaceSetFlagsReply::default())
}

/// Enable or disable interface event delivery for a subscriber process.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WantInterfaceEvents {
    pub enable_disable: u32,
    pub pid: u32,
}

impl Message for WantInterfaceEvents {
    fn message_name(&self) -> &'static str {
        "want_interface_events"
    }
    fn message_crc(&self) -> u32 {
        0x476f5a08
    }
    fn message_type(&self) -> MessageType {
        MessageType::Request
    }
    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.enable_disable);
        dst.put_u32(self.pid);
        Ok(())
    }
    fn decode_fields(&mut self, src: &mut Bytes) -> Result<()> {
        self.enable_disable = take_u32(src, "enable_disable")?;
        self.pid = take_u32(src, "pid")?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for [`WantInterfaceEvents`].
pub fn new_want_interface_events() -> Box<dyn Message> {
    Box::new(WantInterfaceEvents::default())
}

/// Reply to [`WantInterfaceEvents`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WantInterfaceEventsReply {
    pub retval: i32,
}

impl Message for WantInterfaceEventsReply {
    fn message_name(&self) -> &'static str {
        "want_interface_events_reply"
    }
    fn message_crc(&self) -> u32 {
        0x8d0b408a
    }
    fn message_type(&self) -> MessageType {
        MessageType::Reply
    }
    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i32(self.retval);
        Ok(())
    }
    fn decode_fields(&mut self, src: &mut Bytes) -> Result<()> {
        self.retval = take_i32(src, "retval")?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for [`WantInterfaceEventsReply`].
pub fn new_want_interface_events_reply() -> Box<dyn Message> {
    Box::new(WantInterfaceEventsReply::default())
}

/// Create a loopback interface.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CreateLoopback {
    /// Zero-padded to [`MAC_ADDRESS_LEN`] bytes on the wire.
    pub mac_address: Vec<u8>,
}

impl Message for CreateLoopback {
    fn message_name(&self) -> &'static str {
        "create_loopback"
    }
    fn message_crc(&self) -> u32 {
        0x3b54129c
    }
    fn message_type(&self) -> MessageType {
        MessageType::Request
    }
    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()> {
        put_fixed_bytes(dst, &self.mac_address, MAC_ADDRESS_LEN, "mac_address")
    }
    fn decode_fields(&mut self, src: &mut Bytes) -> Result<()> {
        self.mac_address = take_fixed_bytes(src, MAC_ADDRESS_LEN, "mac_address")?.to_vec();
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for [`CreateLoopback`].
pub fn new_create_loopback() -> Box<dyn Message> {
    Box::new(CreateLoopback::default())
}

/// Reply to [`CreateLoopback`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CreateLoopbackReply {
    pub retval: i32,
    pub sw_if_index: u32,
}

impl Message for CreateLoopbackReply {
    fn message_name(&self) -> &'static str {
        "create_loopback_reply"
    }
    fn message_crc(&self) -> u32 {
        0x9520f804
    }
    fn message_type(&self) -> MessageType {
        MessageType::Reply
    }
    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i32(self.retval);
        dst.put_u32(self.sw_if_index);
        Ok(())
    }
    fn decode_fields(&mut self, src: &mut Bytes) -> Result<()> {
        self.retval = take_i32(src, "retval")?;
        self.sw_if_index = take_u32(src, "sw_if_index")?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for [`CreateLoopbackReply`].
pub fn new_create_loopback_reply() -> Box<dyn Message> {
    Box::new(CreateLoopbackReply::default())
}
