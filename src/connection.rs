//! Connection lifecycle and channel factories.
//!
//! A process talks to exactly one dataplane at a time: [`connect`] guards a
//! process-wide flag and fails a second live attempt. Connecting resolves
//! the control ping identities once (the multipart sentinel is connect-time
//! configuration, never a hard-coded id), installs the dispatcher as the
//! adapter's delivery callback, and hands out [`ApiChannel`]s whose request
//! pumps run as tokio tasks.
//!
//! [`Connection::disconnect`] is idempotent: it signals every pump, clears
//! both dispatcher tables and releases the singleton flag even when callers
//! still hold channels.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::adapter::Adapter;
use crate::binapi::control::{ControlPing, ControlPingReply};
use crate::channel::{
    ApiChannel, DEFAULT_REPLY_QUEUE_SIZE, DEFAULT_REQUEST_QUEUE_SIZE, SUBSCRIPTION_QUEUE_SIZE,
};
use crate::codec::MsgCodec;
use crate::dispatcher::{Dispatcher, EncodedRequest, SubscriptionCommand};
use crate::error::{Error, Result};
use crate::registry::IdentityRegistry;
use crate::subscription::SubscriptionHandle;

/// Process-wide connection guard.
static CONNECTION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Open the process's connection to the dataplane.
///
/// Fails with [`Error::AlreadyConnected`] while another connection is live;
/// the flag is released by [`Connection::disconnect`] (or drop), including
/// when this function itself fails partway through.
pub fn connect(adapter: Arc<dyn Adapter>) -> Result<Connection> {
    if CONNECTION_ACTIVE
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(Error::AlreadyConnected);
    }

    match connect_inner(adapter) {
        Ok(connection) => Ok(connection),
        Err(err) => {
            CONNECTION_ACTIVE.store(false, Ordering::SeqCst);
            Err(err)
        }
    }
}

fn connect_inner(adapter: Arc<dyn Adapter>) -> Result<Connection> {
    let registry = Arc::new(IdentityRegistry::new(adapter.clone()));
    let codec = MsgCodec::new(registry.clone());

    // Resolve the multipart machinery up front; a peer that cannot answer a
    // control ping is not usable at all.
    let ping_id = registry.resolve(&ControlPing::default())?;
    let sentinel_id = registry.resolve(&ControlPingReply::default())?;

    let dispatcher = Arc::new(Dispatcher::new(
        adapter.clone(),
        codec.clone(),
        registry.clone(),
        ping_id,
        sentinel_id,
    ));

    let sink = dispatcher.clone();
    adapter.set_delivery(Box::new(move |data| sink.process_frame(data)));

    let (shutdown, _) = watch::channel(false);
    tracing::debug!(ping_id, sentinel_id, "connected");

    Ok(Connection {
        core: Arc::new(ConnCore {
            adapter,
            registry,
            codec,
            dispatcher,
            shutdown,
            next_channel_id: AtomicU32::new(1),
            disconnected: AtomicBool::new(false),
        }),
    })
}

struct ConnCore {
    // Held for ownership: the connection exclusively owns the transport for
    // its whole lifetime, even though sends flow through the dispatcher.
    #[allow(dead_code)]
    adapter: Arc<dyn Adapter>,
    registry: Arc<IdentityRegistry>,
    codec: MsgCodec,
    dispatcher: Arc<Dispatcher>,
    shutdown: watch::Sender<bool>,
    next_channel_id: AtomicU32,
    disconnected: AtomicBool,
}

impl ConnCore {
    fn teardown(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        self.dispatcher.clear();
        CONNECTION_ACTIVE.store(false, Ordering::SeqCst);
        tracing::debug!("disconnected");
    }
}

impl Drop for ConnCore {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// A live connection to the dataplane.
pub struct Connection {
    core: Arc<ConnCore>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a channel with default queue sizes.
    pub fn new_channel(&self) -> Result<ApiChannel> {
        self.new_channel_buffered(DEFAULT_REQUEST_QUEUE_SIZE, DEFAULT_REPLY_QUEUE_SIZE)
    }

    /// Create a channel with the given request and reply queue capacities.
    ///
    /// Must be called within a tokio runtime: the channel's request pump is
    /// spawned here.
    pub fn new_channel_buffered(&self, req_size: usize, reply_size: usize) -> Result<ApiChannel> {
        if self.core.disconnected.load(Ordering::SeqCst) {
            return Err(Error::Disconnected);
        }

        let id = self.core.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let (req_tx, req_rx) = mpsc::channel(req_size.max(1));
        let (reply_tx, reply_rx) = mpsc::channel(reply_size.max(1));
        let (sub_tx, sub_rx) = mpsc::channel(SUBSCRIPTION_QUEUE_SIZE);
        let (ack_tx, ack_rx) = mpsc::channel(SUBSCRIPTION_QUEUE_SIZE);

        tokio::spawn(channel_pump(
            id,
            req_rx,
            sub_rx,
            ack_tx,
            self.core.dispatcher.clone(),
            self.core.shutdown.subscribe(),
        ));
        tracing::debug!(channel_id = id, req_size, reply_size, "channel opened");

        Ok(ApiChannel::new(
            id,
            self.core.codec.clone(),
            self.core.registry.clone(),
            self.core.dispatcher.clone(),
            req_tx,
            reply_tx,
            reply_rx,
            sub_tx,
            ack_rx,
            self.core.shutdown.subscribe(),
        ))
    }

    /// Tear the connection down. Safe to call more than once.
    pub fn disconnect(&self) {
        self.core.teardown();
    }
}

/// Per-channel event loop: feeds the dispatcher until the channel or the
/// connection goes away, then releases everything the channel owned.
async fn channel_pump(
    channel_id: u32,
    mut req_rx: mpsc::Receiver<EncodedRequest>,
    mut sub_rx: mpsc::Receiver<SubscriptionCommand>,
    ack_tx: mpsc::Sender<Result<SubscriptionHandle>>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            req = req_rx.recv() => match req {
                Some(req) => dispatcher.process_request(channel_id, req),
                None => break,
            },
            command = sub_rx.recv() => match command {
                Some(command) => dispatcher.process_subscription(channel_id, command, &ack_tx),
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    dispatcher.release_channel(channel_id);
}
