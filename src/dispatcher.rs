//! Request/reply correlation and notification fan-out.
//!
//! The dispatcher owns the two tables at the center of the client: the
//! correlation table of in-flight conversations and the subscription table.
//! Both sit behind one lock; the per-channel request pumps and the adapter's
//! delivery thread take it for short, never-awaiting critical sections.
//!
//! Delivery policy: every enqueue toward a consumer is a non-blocking offer.
//! A full reply queue drops that frame (logged) without evicting a multipart
//! conversation, and a full subscriber queue drops the notification. Callers
//! that need lossless delivery size their buffers accordingly; the
//! dispatcher never blocks on a slow consumer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::adapter::Adapter;
use crate::channel::ChannelReply;
use crate::codec::{MsgCodec, REQUEST_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::message::{Message, MessageFactory, MessageType};
use crate::registry::IdentityRegistry;
use crate::subscription::{SubscriptionHandle, SubscriptionTable};

/// A request already encoded by its channel, ready to register and send.
pub(crate) struct EncodedRequest {
    pub context: u32,
    pub frame: Vec<u8>,
    pub multipart: bool,
    pub reply_tx: mpsc::Sender<ChannelReply>,
}

/// Subscription mutation requested by a channel.
pub(crate) enum SubscriptionCommand {
    Subscribe {
        factory: MessageFactory,
        queue: mpsc::Sender<Box<dyn Message>>,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
    },
}

struct Conversation {
    channel_id: u32,
    multipart: bool,
    reply_tx: mpsc::Sender<ChannelReply>,
}

#[derive(Default)]
struct DispatcherState {
    conversations: HashMap<u32, Conversation>,
    subscriptions: SubscriptionTable,
}

pub(crate) struct Dispatcher {
    adapter: Arc<dyn Adapter>,
    codec: MsgCodec,
    registry: Arc<IdentityRegistry>,
    /// Id of `control_ping`, sent after every multipart request.
    ping_id: u16,
    /// Id of `control_ping_reply`, the multipart stream terminator.
    sentinel_id: u16,
    next_context: AtomicU32,
    state: Mutex<DispatcherState>,
}

impl Dispatcher {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        codec: MsgCodec,
        registry: Arc<IdentityRegistry>,
        ping_id: u16,
        sentinel_id: u16,
    ) -> Self {
        Self {
            adapter,
            codec,
            registry,
            ping_id,
            sentinel_id,
            next_context: AtomicU32::new(1),
            state: Mutex::new(DispatcherState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().expect("dispatcher state lock poisoned")
    }

    /// Allocate the next context id. Zero is reserved for "no conversation".
    pub fn next_context(&self) -> u32 {
        loop {
            let context = self.next_context.fetch_add(1, Ordering::Relaxed);
            if context != 0 {
                return context;
            }
        }
    }

    /// Register a conversation and push the request to the transport.
    ///
    /// A multipart request is followed by a control ping with the same
    /// context id; its reply is the sentinel that ends the detail stream. A
    /// transport failure is surfaced as a synthesized error reply and the
    /// conversation is evicted.
    pub fn process_request(&self, channel_id: u32, req: EncodedRequest) {
        let EncodedRequest {
            context,
            frame,
            multipart,
            reply_tx,
        } = req;

        self.state().conversations.insert(
            context,
            Conversation {
                channel_id,
                multipart,
                reply_tx: reply_tx.clone(),
            },
        );
        tracing::debug!(context, channel_id, multipart, "sending request");

        if let Err(err) = self.adapter.send(&frame) {
            self.fail_conversation(context, &reply_tx, err);
            return;
        }
        if multipart {
            let ping = self.encode_control_ping(context);
            if let Err(err) = self.adapter.send(&ping) {
                self.fail_conversation(context, &reply_tx, err);
            }
        }
    }

    /// Classify one inbound frame: matched reply or notification.
    ///
    /// Invoked from the adapter's delivery thread.
    pub fn process_frame(&self, data: &[u8]) {
        let msg_id = match MsgCodec::message_id(data) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(%err, "discarding undecodable inbound frame");
                return;
            }
        };

        // Unresolved inbound ids are read with the reply layout: replies
        // dominate inbound traffic and detail types arrive before anything
        // local ever resolved them.
        let direction = self
            .registry
            .reverse(msg_id)
            .map(|ident| ident.direction)
            .unwrap_or(MessageType::Reply);
        let context = MsgCodec::peek_context(data, direction).unwrap_or(0);

        let mut state = self.state();
        if context != 0 {
            if let Some(conv) = state.conversations.get(&context) {
                let last = !conv.multipart || msg_id == self.sentinel_id;
                let reply = ChannelReply {
                    context,
                    data: Bytes::copy_from_slice(data),
                    last_reply: last,
                    error: None,
                };
                let mut evict = last;
                match conv.reply_tx.try_send(reply) {
                    Ok(()) => {
                        tracing::debug!(context, msg_id, last, "reply delivered");
                    }
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(context, msg_id, "reply queue full, dropping reply");
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!(context, "channel gone, discarding reply");
                        evict = true;
                    }
                }
                if evict {
                    state.conversations.remove(&context);
                }
                return;
            }
        }

        self.fan_out(&state, msg_id, data);
    }

    /// Deliver a notification to every subscriber of its message id.
    fn fan_out(&self, state: &DispatcherState, msg_id: u16, data: &[u8]) {
        let Some(entries) = state.subscriptions.matching(msg_id) else {
            tracing::debug!(msg_id, "no conversation and no subscriber, discarding frame");
            return;
        };
        for entry in entries {
            let mut msg = (entry.factory)();
            if let Err(err) = self.codec.decode(data, Some(msg.as_mut())) {
                tracing::warn!(msg_id, %err, "failed to decode notification");
                continue;
            }
            match entry.queue.try_send(msg) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(msg_id, "subscriber queue full, dropping notification");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(msg_id, "subscriber gone, discarding notification");
                }
            }
        }
    }

    /// Apply a subscription mutation and acknowledge it to the channel.
    ///
    /// A subscription only takes effect once the acknowledgement is queued;
    /// notifications racing the subscribe are not delivered to it.
    pub fn process_subscription(
        &self,
        channel_id: u32,
        command: SubscriptionCommand,
        ack_tx: &mpsc::Sender<Result<SubscriptionHandle>>,
    ) {
        let result = match command {
            SubscriptionCommand::Subscribe { factory, queue } => {
                // Resolve outside the state lock; the adapter may block.
                let probe = factory();
                match self.registry.resolve(probe.as_ref()) {
                    Ok(msg_id) => {
                        let handle =
                            self.state()
                                .subscriptions
                                .add(msg_id, channel_id, factory, queue);
                        tracing::debug!(channel_id, msg_id, "subscription added");
                        Ok(handle)
                    }
                    Err(err) => Err(err),
                }
            }
            SubscriptionCommand::Unsubscribe { handle } => {
                if self.state().subscriptions.remove(handle) {
                    tracing::debug!(channel_id, "subscription removed");
                    Ok(handle)
                } else {
                    Err(Error::UnknownSubscription)
                }
            }
        };
        if ack_tx.try_send(result).is_err() {
            tracing::warn!(channel_id, "subscription acknowledgement dropped");
        }
    }

    /// Evict everything a closing channel owns.
    pub fn release_channel(&self, channel_id: u32) {
        let mut state = self.state();
        state
            .conversations
            .retain(|_, conv| conv.channel_id != channel_id);
        state.subscriptions.remove_channel(channel_id);
        tracing::debug!(channel_id, "channel released");
    }

    /// Drop both tables wholesale; used by disconnect.
    pub fn clear(&self) {
        let mut state = self.state();
        state.conversations.clear();
        state.subscriptions.clear();
    }

    fn encode_control_ping(&self, context: u32) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_SIZE);
        buf.put_u16(self.ping_id);
        buf.put_u32(0);
        buf.put_u32(context);
        buf.to_vec()
    }

    fn fail_conversation(&self, context: u32, reply_tx: &mpsc::Sender<ChannelReply>, err: Error) {
        self.state().conversations.remove(&context);
        tracing::warn!(context, %err, "request failed, evicting conversation");
        let _ = reply_tx.try_send(ChannelReply {
            context,
            data: Bytes::new(),
            last_reply: true,
            error: Some(err),
        });
    }

    #[cfg(test)]
    fn pending_conversations(&self) -> usize {
        self.state().conversations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockAdapter;
    use crate::adapter::DeliveryFn;
    use crate::binapi::control::{ControlPing, ControlPingReply};
    use crate::binapi::interfaces::{
        new_sw_interface_set_flags, SwInterfaceDump, SwInterfaceSetFlags,
    };

    fn wired_dispatcher() -> (Arc<MockAdapter>, Arc<Dispatcher>) {
        let adapter = Arc::new(MockAdapter::new());
        let registry = Arc::new(IdentityRegistry::new(adapter.clone()));
        let codec = MsgCodec::new(registry.clone());

        let ping_id = registry.resolve(&ControlPing::default()).unwrap();
        let sentinel_id = registry.resolve(&ControlPingReply::default()).unwrap();

        let dispatcher = Arc::new(Dispatcher::new(
            adapter.clone(),
            codec,
            registry,
            ping_id,
            sentinel_id,
        ));

        let sink = dispatcher.clone();
        adapter.set_delivery(Box::new(move |data| sink.process_frame(data)));
        (adapter, dispatcher)
    }

    fn encode_request(dispatcher: &Dispatcher, msg: &dyn Message, context: u32) -> Vec<u8> {
        dispatcher.codec.encode(Some(msg), context).unwrap().1
    }

    #[test]
    fn test_singleton_reply_and_eviction() {
        let (adapter, dispatcher) = wired_dispatcher();
        let (reply_tx, mut reply_rx) = mpsc::channel(10);

        adapter.mock_reply(Box::new(ControlPingReply {
            retval: -5,
            ..Default::default()
        }));

        let context = dispatcher.next_context();
        let frame = encode_request(&dispatcher, &ControlPing::default(), context);
        dispatcher.process_request(
            1,
            EncodedRequest {
                context,
                frame,
                multipart: false,
                reply_tx,
            },
        );

        let reply = reply_rx.try_recv().unwrap();
        assert_eq!(reply.context, context);
        assert!(reply.last_reply);
        assert!(reply.error.is_none());
        assert_eq!(dispatcher.pending_conversations(), 0);
    }

    #[test]
    fn test_multipart_stream_and_sentinel() {
        let (adapter, dispatcher) = wired_dispatcher();
        let (reply_tx, mut reply_rx) = mpsc::channel(32);

        for _ in 0..3 {
            adapter.mock_reply(Box::new(crate::binapi::interfaces::SwInterfaceDetails {
                ..Default::default()
            }));
        }
        adapter.mock_reply(Box::new(ControlPingReply::default()));

        let context = dispatcher.next_context();
        let frame = encode_request(&dispatcher, &SwInterfaceDump::default(), context);
        dispatcher.process_request(
            1,
            EncodedRequest {
                context,
                frame,
                multipart: true,
                reply_tx,
            },
        );

        for _ in 0..3 {
            let reply = reply_rx.try_recv().unwrap();
            assert!(!reply.last_reply);
        }
        let sentinel = reply_rx.try_recv().unwrap();
        assert!(sentinel.last_reply);
        assert_eq!(dispatcher.pending_conversations(), 0);

        // The dump was followed by a control ping sharing its context.
        let sent = adapter.sent_frames();
        assert_eq!(sent.len(), 2);
        assert_eq!(&sent[1][6..10], &context.to_be_bytes());
    }

    #[test]
    fn test_full_reply_queue_drops_but_keeps_multipart() {
        let (adapter, dispatcher) = wired_dispatcher();
        let (reply_tx, mut reply_rx) = mpsc::channel(1);

        for _ in 0..3 {
            adapter.mock_reply(Box::new(crate::binapi::interfaces::SwInterfaceDetails {
                ..Default::default()
            }));
        }

        let context = dispatcher.next_context();
        let frame = encode_request(&dispatcher, &SwInterfaceDump::default(), context);
        dispatcher.process_request(
            1,
            EncodedRequest {
                context,
                frame,
                multipart: true,
                reply_tx,
            },
        );

        // One detail delivered, two dropped; no sentinel yet, so the
        // conversation must survive the drops.
        assert!(reply_rx.try_recv().is_ok());
        assert!(reply_rx.try_recv().is_err());
        assert_eq!(dispatcher.pending_conversations(), 1);
    }

    #[test]
    fn test_singleton_evicted_even_when_reply_dropped() {
        let (adapter, dispatcher) = wired_dispatcher();
        let (reply_tx, mut reply_rx) = mpsc::channel(1);

        // Occupy the only slot so the real reply is dropped.
        reply_tx
            .try_send(ChannelReply {
                context: 0,
                data: Bytes::new(),
                last_reply: false,
                error: None,
            })
            .unwrap();

        adapter.mock_reply(Box::new(ControlPingReply::default()));
        let context = dispatcher.next_context();
        let frame = encode_request(&dispatcher, &ControlPing::default(), context);
        dispatcher.process_request(
            1,
            EncodedRequest {
                context,
                frame,
                multipart: false,
                reply_tx,
            },
        );

        assert_eq!(dispatcher.pending_conversations(), 0);
        // Only the pre-stuffed filler is readable.
        assert_eq!(reply_rx.try_recv().unwrap().context, 0);
        assert!(reply_rx.try_recv().is_err());
    }

    #[test]
    fn test_late_reply_discarded() {
        let (adapter, dispatcher) = wired_dispatcher();

        // A reply whose context matches nothing: silently discarded.
        adapter.mock_reply(Box::new(ControlPingReply::default()));
        adapter.send_synthetic(0xdead_beef, &[]);

        assert_eq!(dispatcher.pending_conversations(), 0);
    }

    #[test]
    fn test_notification_fan_out_and_unsubscribe() {
        let (adapter, dispatcher) = wired_dispatcher();
        let (notif_tx, mut notif_rx) = mpsc::channel(4);
        let (ack_tx, mut ack_rx) = mpsc::channel(4);

        dispatcher.process_subscription(
            1,
            SubscriptionCommand::Subscribe {
                factory: new_sw_interface_set_flags,
                queue: notif_tx,
            },
            &ack_tx,
        );
        let handle = ack_rx.try_recv().unwrap().unwrap();

        adapter.mock_reply(Box::new(SwInterfaceSetFlags {
            sw_if_index: 3,
            admin_up_down: 1,
            ..Default::default()
        }));
        adapter.send_synthetic(0, &[0]);

        let notif = notif_rx.try_recv().unwrap();
        let flags = notif
            .as_any()
            .downcast_ref::<SwInterfaceSetFlags>()
            .unwrap();
        assert_eq!(flags.sw_if_index, 3);

        dispatcher.process_subscription(
            1,
            SubscriptionCommand::Unsubscribe { handle },
            &ack_tx,
        );
        assert!(ack_rx.try_recv().unwrap().is_ok());

        adapter.mock_reply(Box::new(SwInterfaceSetFlags::default()));
        adapter.send_synthetic(0, &[0]);
        assert!(notif_rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_unknown_handle() {
        let (_, dispatcher) = wired_dispatcher();
        let (notif_tx, _notif_rx) = mpsc::channel::<Box<dyn Message>>(1);
        let (ack_tx, mut ack_rx) = mpsc::channel(2);

        dispatcher.process_subscription(
            1,
            SubscriptionCommand::Subscribe {
                factory: new_sw_interface_set_flags,
                queue: notif_tx,
            },
            &ack_tx,
        );
        let handle = ack_rx.try_recv().unwrap().unwrap();

        dispatcher.process_subscription(2, SubscriptionCommand::Unsubscribe { handle }, &ack_tx);
        assert!(ack_rx.try_recv().unwrap().is_ok());

        dispatcher.process_subscription(2, SubscriptionCommand::Unsubscribe { handle }, &ack_tx);
        assert!(matches!(
            ack_rx.try_recv().unwrap(),
            Err(Error::UnknownSubscription)
        ));
    }

    #[test]
    fn test_transport_error_synthesizes_reply() {
        struct FailingAdapter;
        impl Adapter for FailingAdapter {
            fn send(&self, _data: &[u8]) -> Result<()> {
                Err(Error::Transport("queue detached".into()))
            }
            fn set_delivery(&self, _callback: DeliveryFn) {}
            fn resolve_id(&self, _name: &str, _crc: u32) -> Result<u16> {
                Ok(1)
            }
        }

        let adapter = Arc::new(FailingAdapter);
        let registry = Arc::new(IdentityRegistry::new(adapter.clone()));
        let codec = MsgCodec::new(registry.clone());
        let dispatcher = Dispatcher::new(adapter, codec, registry, 1, 1);

        let (reply_tx, mut reply_rx) = mpsc::channel(4);
        let context = dispatcher.next_context();
        dispatcher.process_request(
            1,
            EncodedRequest {
                context,
                frame: vec![0; REQUEST_HEADER_SIZE],
                multipart: false,
                reply_tx,
            },
        );

        let reply = reply_rx.try_recv().unwrap();
        assert!(reply.last_reply);
        assert!(reply.error.unwrap().to_string().contains("transport error"));
        assert_eq!(dispatcher.pending_conversations(), 0);
    }

    #[test]
    fn test_release_channel_evicts_conversations_and_subscriptions() {
        let (_, dispatcher) = wired_dispatcher();
        let (reply_tx, _reply_rx) = mpsc::channel(4);
        let (notif_tx, _notif_rx) = mpsc::channel::<Box<dyn Message>>(1);
        let (ack_tx, mut ack_rx) = mpsc::channel(2);

        // No queued mock replies: the conversation stays pending.
        let context = dispatcher.next_context();
        let frame = encode_request(&dispatcher, &ControlPing::default(), context);
        dispatcher.process_request(
            7,
            EncodedRequest {
                context,
                frame,
                multipart: false,
                reply_tx,
            },
        );
        dispatcher.process_subscription(
            7,
            SubscriptionCommand::Subscribe {
                factory: new_sw_interface_set_flags,
                queue: notif_tx,
            },
            &ack_tx,
        );
        ack_rx.try_recv().unwrap().unwrap();
        assert_eq!(dispatcher.pending_conversations(), 1);

        dispatcher.release_channel(7);
        assert_eq!(dispatcher.pending_conversations(), 0);
    }

    #[test]
    fn test_context_ids_skip_zero() {
        let (_, dispatcher) = wired_dispatcher();
        dispatcher.next_context.store(u32::MAX, Ordering::Relaxed);

        let a = dispatcher.next_context();
        let b = dispatcher.next_context();
        assert_eq!(a, u32::MAX);
        assert_ne!(b, 0);
    }
}
