//! # dataplane-client
//!
//! Client for a dataplane process's binary management API, spoken over a
//! shared-memory message queue.
//!
//! ## Architecture
//!
//! ```text
//! caller ──► ApiChannel ──► request queue ──► dispatcher ──► codec ──► adapter
//!                                                │
//! caller ◄── reply queue ◄───────────────────────┤ (correlate by context id)
//! subscribers ◄── notification queues ◄──────────┘ (fan out by message id)
//! ```
//!
//! One [`connect`] call per process opens the transport and starts the
//! dispatcher; any number of channels multiplex request/reply conversations
//! over it, correlated by a 32-bit context id the peer echoes in every
//! reply. Dump-style requests stream detail replies terminated by a control
//! ping reply sentinel. Inbound frames matching no conversation are
//! notifications, fanned out to subscribers by message identity.
//!
//! Delivery toward consumers is drop-on-full by design: the dataplane cannot
//! be slowed down, so a full reply or subscriber queue sheds the frame and
//! the client logs it. Size buffers for the bursts you expect.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use dataplane_client::adapter::mock::MockAdapter;
//! use dataplane_client::binapi::control::{ControlPing, ControlPingReply};
//! use dataplane_client::connect;
//!
//! #[tokio::main]
//! async fn main() -> dataplane_client::Result<()> {
//!     let adapter = Arc::new(MockAdapter::new());
//!     let conn = connect(adapter)?;
//!     let mut channel = conn.new_channel()?;
//!
//!     let mut reply = ControlPingReply::default();
//!     channel
//!         .send_request(&ControlPing::default())
//!         .await?
//!         .receive_reply(&mut reply)
//!         .await?;
//!
//!     conn.disconnect();
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod binapi;
pub mod channel;
pub mod codec;
pub mod connection;
pub mod error;
pub mod message;
pub mod registry;

mod dispatcher;
mod subscription;

pub use channel::{ApiChannel, ChannelReply, MultiRequestCtx, RequestCtx};
pub use connection::{connect, Connection};
pub use error::{Error, Result};
pub use message::{Message, MessageFactory, MessageType};
pub use subscription::SubscriptionHandle;
