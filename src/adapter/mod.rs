//! Transport adapter port.
//!
//! The core speaks to the dataplane through this narrow duplex surface. A
//! real adapter wraps the shared-memory queue pair; [`mock::MockAdapter`]
//! implements the same surface in-process for tests and offline development.
//!
//! The adapter owns its delivery thread: once a callback is installed via
//! [`Adapter::set_delivery`], inbound frames are pushed into the core from
//! that thread, so the callback must be cheap and must not block.

pub mod mock;

use crate::error::Result;

/// Inbound frame callback, invoked from an adapter-owned thread.
pub type DeliveryFn = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Duplex port to the dataplane process.
pub trait Adapter: Send + Sync {
    /// Push one encoded frame to the peer.
    ///
    /// Callable from any thread; the transport serializes internally. Frame
    /// loss on this local queue is catastrophic, so there are no retries.
    fn send(&self, data: &[u8]) -> Result<()>;

    /// Install the inbound frame callback, replacing any previous one.
    fn set_delivery(&self, callback: DeliveryFn);

    /// Ask the peer for the numeric id bound to `(name, crc)`.
    ///
    /// The binding is fixed for the life of the connection.
    fn resolve_id(&self, name: &str, crc: u32) -> Result<u16>;
}
