//! In-process mock of the transport adapter.
//!
//! The mock stands in for the dataplane peer: it assigns message ids on
//! demand, records every frame the core sends, and answers requests from a
//! queue of canned replies. Queued replies are flushed back through the
//! delivery callback with the context id of the request that triggered them,
//! exactly as the peer would echo it. [`MockAdapter::send_synthetic`] flushes
//! the queue unprompted, which is how tests inject notifications.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{BufMut, BytesMut};

use super::{Adapter, DeliveryFn};
use crate::codec::{MSG_ID_SIZE, REQUEST_HEADER_SIZE};
use crate::error::Result;
use crate::message::{Message, MessageType};

struct MockState {
    ids: HashMap<(String, u32), u16>,
    next_id: u16,
    rejected: HashSet<String>,
    replies: VecDeque<Box<dyn Message>>,
    sent: Vec<Vec<u8>>,
}

/// Mock transport adapter for tests and offline development.
pub struct MockAdapter {
    state: Mutex<MockState>,
    callback: Mutex<Option<Arc<DeliveryFn>>>,
}

impl MockAdapter {
    /// Create a mock with no queued replies and no known ids.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                ids: HashMap::new(),
                next_id: 1,
                rejected: HashSet::new(),
                replies: VecDeque::new(),
                sent: Vec::new(),
            }),
            callback: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock adapter state lock poisoned")
    }

    /// Queue a reply to be delivered on the next request (or synthetic send).
    pub fn mock_reply(&self, msg: Box<dyn Message>) {
        self.state().replies.push_back(msg);
    }

    /// Make `resolve_id` fail for the named message, as a peer that does not
    /// know the type would.
    pub fn reject_message(&self, name: &str) {
        self.state().rejected.insert(name.to_string());
    }

    /// Undo [`reject_message`](Self::reject_message) for the named message.
    pub fn accept_message(&self, name: &str) {
        self.state().rejected.remove(name);
    }

    /// Frames the core has sent, in order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state().sent.clone()
    }

    /// Number of replies still queued.
    pub fn queued_replies(&self) -> usize {
        self.state().replies.len()
    }

    /// Deliver queued replies as peer-originated frames carrying `context`.
    ///
    /// With an empty queue and a complete frame in `data`, the frame itself
    /// is delivered verbatim instead.
    pub fn send_synthetic(&self, context: u32, data: &[u8]) {
        let flushed = self.flush_replies(context);
        if flushed == 0 && data.len() >= MSG_ID_SIZE {
            self.deliver(&[data.to_vec()]);
        }
    }

    /// Encode and deliver every queued reply with the given context id.
    fn flush_replies(&self, context: u32) -> usize {
        let frames: Vec<Vec<u8>> = {
            let mut state = self.state();
            let replies: Vec<_> = state.replies.drain(..).collect();
            replies
                .iter()
                .filter_map(|msg| match encode_inbound(&mut state, msg.as_ref(), context) {
                    Ok(frame) => Some(frame),
                    Err(err) => {
                        tracing::warn!(name = msg.message_name(), %err, "mock reply dropped");
                        None
                    }
                })
                .collect()
        };
        let count = frames.len();
        self.deliver(&frames);
        count
    }

    fn deliver(&self, frames: &[Vec<u8>]) {
        let callback = self
            .callback
            .lock()
            .expect("mock adapter callback lock poisoned")
            .clone();
        match callback {
            Some(cb) => {
                for frame in frames {
                    (*cb)(frame);
                }
            }
            None => {
                if !frames.is_empty() {
                    tracing::warn!("no delivery callback installed, dropping mock frames");
                }
            }
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for MockAdapter {
    fn send(&self, data: &[u8]) -> Result<()> {
        self.state().sent.push(data.to_vec());

        // Requests carry their context at a fixed offset; echo it back on
        // every queued reply, like the peer answering the request.
        if data.len() >= REQUEST_HEADER_SIZE {
            let context = u32::from_be_bytes([data[6], data[7], data[8], data[9]]);
            self.flush_replies(context);
        }
        Ok(())
    }

    fn set_delivery(&self, callback: DeliveryFn) {
        *self
            .callback
            .lock()
            .expect("mock adapter callback lock poisoned") = Some(Arc::new(callback));
    }

    fn resolve_id(&self, name: &str, crc: u32) -> Result<u16> {
        let mut state = self.state();
        if state.rejected.contains(name) {
            return Err(crate::error::Error::UnknownMessage {
                name: name.to_string(),
                crc,
            });
        }
        Ok(assign_id(&mut state, name, crc))
    }
}

fn assign_id(state: &mut MockState, name: &str, crc: u32) -> u16 {
    if let Some(id) = state.ids.get(&(name.to_string(), crc)) {
        return *id;
    }
    let id = state.next_id;
    state.next_id += 1;
    state.ids.insert((name.to_string(), crc), id);
    id
}

/// Build a peer-originated frame for `msg` with the given context.
fn encode_inbound(state: &mut MockState, msg: &dyn Message, context: u32) -> Result<Vec<u8>> {
    let id = assign_id(state, msg.message_name(), msg.message_crc());
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u16(id);
    match msg.message_type() {
        MessageType::Request => {
            buf.put_u32(0);
            buf.put_u32(context);
        }
        MessageType::Reply => buf.put_u32(context),
        MessageType::Other => {}
    }
    msg.encode_fields(&mut buf)?;
    Ok(buf.to_vec())
}
