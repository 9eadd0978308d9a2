//! Error types for dataplane-client.

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A live connection already exists in this process.
    #[error("only one connection per process is allowed")]
    AlreadyConnected,

    /// The peer does not know this message's (name, crc) identity.
    #[error("unknown message: {name} (crc 0x{crc:08x})")]
    UnknownMessage {
        /// Message name as declared in the schema.
        name: String,
        /// Fingerprint of the message's field layout.
        crc: u32,
    },

    /// A nil message value was handed to the codec.
    #[error("nil message passed to codec")]
    NilMessage,

    /// Frame ended before all declared fields were read.
    #[error("unexpected EOF while decoding {0}")]
    ShortFrame(&'static str),

    /// A fixed-length field had fewer bytes than its declared length.
    #[error("length mismatch in {field}: need {need} bytes, have {have}")]
    LengthMismatch {
        /// Field being decoded.
        field: &'static str,
        /// Declared wire length.
        need: usize,
        /// Bytes remaining in the frame.
        have: usize,
    },

    /// A field value cannot be represented on the wire.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Transport-level send failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The channel was closed before the operation completed.
    #[error("channel closed")]
    ChannelClosed,

    /// The connection has been torn down.
    #[error("connection disconnected")]
    Disconnected,

    /// The handle does not name an active subscription.
    #[error("unknown subscription handle")]
    UnknownSubscription,

    /// One or more message types are not supported by the connected peer.
    #[error("incompatible messages: {0}")]
    IncompatibleMessages(String),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
