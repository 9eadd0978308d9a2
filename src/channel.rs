//! Per-caller API channel.
//!
//! A channel owns four bounded queues: requests and subscription requests
//! flowing toward the dispatcher, replies and subscription acknowledgements
//! flowing back. Requests are encoded and given a fresh context id at send
//! time, so per-channel causality is fixed by the order of `send_request`
//! calls; the channel's pump task registers and transmits them in that order.
//!
//! The fluent [`RequestCtx`] / [`MultiRequestCtx`] wrappers cover the common
//! call patterns; [`ApiChannel::next_reply`] and [`ApiChannel::poll_reply`]
//! expose the raw reply queue for callers that want to drive it themselves.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::codec::MsgCodec;
use crate::dispatcher::{Dispatcher, EncodedRequest, SubscriptionCommand};
use crate::error::{Error, Result};
use crate::message::{Message, MessageFactory};
use crate::registry::IdentityRegistry;
use crate::subscription::SubscriptionHandle;

/// Default request queue capacity.
pub const DEFAULT_REQUEST_QUEUE_SIZE: usize = 100;

/// Default reply queue capacity.
pub const DEFAULT_REPLY_QUEUE_SIZE: usize = 100;

/// Capacity of the subscription request/acknowledgement queues.
pub(crate) const SUBSCRIPTION_QUEUE_SIZE: usize = 16;

/// One reply as delivered by the dispatcher.
#[derive(Debug)]
pub struct ChannelReply {
    /// Context id echoed by the peer.
    pub context: u32,
    /// Raw reply frame; decode with [`ApiChannel::decode_reply`].
    pub data: Bytes,
    /// True for a singleton reply or a multipart sentinel.
    pub last_reply: bool,
    /// Set when the dispatcher synthesized this reply from a failure.
    pub error: Option<Error>,
}

/// Per-caller façade over one connection.
///
/// Channels are independent: closing one, or letting it drop, releases its
/// subscriptions and evicts its in-flight conversations without touching any
/// other channel.
pub struct ApiChannel {
    id: u32,
    codec: MsgCodec,
    registry: Arc<IdentityRegistry>,
    dispatcher: Arc<Dispatcher>,
    req_tx: mpsc::Sender<EncodedRequest>,
    reply_tx: mpsc::Sender<ChannelReply>,
    reply_rx: mpsc::Receiver<ChannelReply>,
    sub_tx: mpsc::Sender<SubscriptionCommand>,
    sub_ack_rx: mpsc::Receiver<Result<SubscriptionHandle>>,
    shutdown: watch::Receiver<bool>,
}

impl ApiChannel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u32,
        codec: MsgCodec,
        registry: Arc<IdentityRegistry>,
        dispatcher: Arc<Dispatcher>,
        req_tx: mpsc::Sender<EncodedRequest>,
        reply_tx: mpsc::Sender<ChannelReply>,
        reply_rx: mpsc::Receiver<ChannelReply>,
        sub_tx: mpsc::Sender<SubscriptionCommand>,
        sub_ack_rx: mpsc::Receiver<Result<SubscriptionHandle>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            codec,
            registry,
            dispatcher,
            req_tx,
            reply_tx,
            reply_rx,
            sub_tx,
            sub_ack_rx,
            shutdown,
        }
    }

    /// Identifier of this channel, unique within the connection.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Send a request expecting a single reply.
    pub async fn send_request(&mut self, msg: &dyn Message) -> Result<RequestCtx<'_>> {
        let context = self.enqueue_request(msg, false).await?;
        Ok(RequestCtx {
            channel: self,
            context,
        })
    }

    /// Send a request expecting a stream of detail replies.
    ///
    /// The stream ends when [`MultiRequestCtx::receive_reply`] returns
    /// `Ok(true)`.
    pub async fn send_multi_request(&mut self, msg: &dyn Message) -> Result<MultiRequestCtx<'_>> {
        let context = self.enqueue_request(msg, true).await?;
        Ok(MultiRequestCtx {
            channel: self,
            context,
        })
    }

    async fn enqueue_request(&mut self, msg: &dyn Message, multipart: bool) -> Result<u32> {
        let context = self.dispatcher.next_context();
        let (_, frame) = self.codec.encode(Some(msg), context)?;
        self.req_tx
            .send(EncodedRequest {
                context,
                frame,
                multipart,
                reply_tx: self.reply_tx.clone(),
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        Ok(context)
    }

    /// Await the next raw reply on this channel.
    pub async fn next_reply(&mut self) -> Result<ChannelReply> {
        if *self.shutdown.borrow_and_update() {
            return Err(Error::Disconnected);
        }
        tokio::select! {
            reply = self.reply_rx.recv() => reply.ok_or(Error::Disconnected),
            _ = self.shutdown.changed() => Err(Error::Disconnected),
        }
    }

    /// Non-blocking read of the reply queue.
    pub fn poll_reply(&mut self) -> Option<ChannelReply> {
        self.reply_rx.try_recv().ok()
    }

    /// Decode a raw reply payload into the supplied message value.
    pub fn decode_reply(&self, reply: &ChannelReply, msg: &mut dyn Message) -> Result<()> {
        self.codec.decode(&reply.data, Some(msg))
    }

    /// Subscribe `queue` to every inbound notification whose identity
    /// matches the factory's message type.
    ///
    /// Delivery into the queue is a non-blocking offer: size the buffer for
    /// the expected burst rate, overflow is dropped.
    pub async fn subscribe_notification(
        &mut self,
        queue: mpsc::Sender<Box<dyn Message>>,
        factory: MessageFactory,
    ) -> Result<SubscriptionHandle> {
        self.sub_tx
            .send(SubscriptionCommand::Subscribe { factory, queue })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        self.sub_ack_rx.recv().await.ok_or(Error::Disconnected)?
    }

    /// Revoke a subscription created on this channel.
    pub async fn unsubscribe_notification(&mut self, handle: SubscriptionHandle) -> Result<()> {
        self.sub_tx
            .send(SubscriptionCommand::Unsubscribe { handle })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        self.sub_ack_rx
            .recv()
            .await
            .ok_or(Error::Disconnected)?
            .map(|_| ())
    }

    /// Verify that the peer supports every listed message type.
    pub fn check_message_compatibility(&self, msgs: &[&dyn Message]) -> Result<()> {
        self.registry.check_compatibility(msgs)
    }

    /// Close the channel.
    ///
    /// Dropping the channel is equivalent: the pump task observes the closed
    /// queues, evicts this channel's conversations and releases its
    /// subscriptions.
    pub fn close(self) {
        tracing::debug!(channel_id = self.id, "channel closing");
    }
}

/// In-flight singleton request.
pub struct RequestCtx<'a> {
    channel: &'a mut ApiChannel,
    context: u32,
}

impl std::fmt::Debug for RequestCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCtx")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl RequestCtx<'_> {
    /// Context id allocated to this request.
    pub fn context(&self) -> u32 {
        self.context
    }

    /// Await and decode the reply to this request.
    ///
    /// Replies still queued from earlier, abandoned requests on the same
    /// channel are skipped.
    pub async fn receive_reply(&mut self, msg: &mut dyn Message) -> Result<()> {
        loop {
            let reply = self.channel.next_reply().await?;
            if reply.context != self.context {
                tracing::warn!(
                    expected = self.context,
                    got = reply.context,
                    "skipping reply for stale context"
                );
                continue;
            }
            if let Some(err) = reply.error {
                return Err(err);
            }
            return self.channel.decode_reply(&reply, msg);
        }
    }
}

/// In-flight multipart request.
pub struct MultiRequestCtx<'a> {
    channel: &'a mut ApiChannel,
    context: u32,
}

impl MultiRequestCtx<'_> {
    /// Context id allocated to this request.
    pub fn context(&self) -> u32 {
        self.context
    }

    /// Await the next detail reply, decoding it into `msg`.
    ///
    /// Returns `Ok(true)` on the terminating sentinel, which carries no
    /// detail payload and leaves `msg` untouched.
    pub async fn receive_reply(&mut self, msg: &mut dyn Message) -> Result<bool> {
        loop {
            let reply = self.channel.next_reply().await?;
            if reply.context != self.context {
                tracing::warn!(
                    expected = self.context,
                    got = reply.context,
                    "skipping reply for stale context"
                );
                continue;
            }
            if let Some(err) = reply.error {
                return Err(err);
            }
            if reply.last_reply {
                return Ok(true);
            }
            self.channel.decode_reply(&reply, msg)?;
            return Ok(false);
        }
    }
}
