//! Counter messages pushed by the peer.
//!
//! Counter messages are direction "other": the peer originates them without
//! a request, so they carry no context and reach applications only through
//! notification subscriptions.

use std::any::Any;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{take_u32, take_u64, take_u8};
use crate::error::Result;
use crate::message::{Message, MessageType};

/// Per-route counter entry inside [`VnetIp4FibCounters`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ip4FibCounter {
    pub address: u32,
    pub address_length: u8,
    pub packets: u64,
    pub bytes: u64,
}

impl Ip4FibCounter {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.address);
        dst.put_u8(self.address_length);
        dst.put_u64(self.packets);
        dst.put_u64(self.bytes);
    }

    fn decode(src: &mut Bytes) -> Result<Self> {
        Ok(Self {
            address: take_u32(src, "address")?,
            address_length: take_u8(src, "address_length")?,
            packets: take_u64(src, "packets")?,
            bytes: take_u64(src, "bytes")?,
        })
    }
}

/// FIB counters for one IPv4 routing table.
///
/// The counter array carries its element count on the wire immediately
/// before the elements.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VnetIp4FibCounters {
    pub vrf_id: u32,
    pub counters: Vec<Ip4FibCounter>,
}

impl Message for VnetIp4FibCounters {
    fn message_name(&self) -> &'static str {
        "vnet_ip4_fib_counters"
    }
    fn message_crc(&self) -> u32 {
        0x57ffa195
    }
    fn message_type(&self) -> MessageType {
        MessageType::Other
    }
    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32(self.vrf_id);
        dst.put_u32(self.counters.len() as u32);
        for counter in &self.counters {
            counter.encode(dst);
        }
        Ok(())
    }
    fn decode_fields(&mut self, src: &mut Bytes) -> Result<()> {
        self.vrf_id = take_u32(src, "vrf_id")?;
        let count = take_u32(src, "count")?;
        self.counters = Vec::with_capacity(count as usize);
        for _ in 0..count {
            self.counters.push(Ip4FibCounter::decode(src)?);
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory for [`VnetIp4FibCounters`].
pub fn new_vnet_ip4_fib_counters() -> Box<dyn Message> {
    Box::new(VnetIp4FibCounters::default())
}
