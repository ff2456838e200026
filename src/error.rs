//! Error types for muxwire.

use thiserror::Error;

/// Main error type for all muxwire operations.
#[derive(Debug, Error)]
pub enum MuxwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed block: inconsistent sub-lengths, undersized prefix, etc.
    #[error("codec error: {0}")]
    Codec(String),

    /// Declared block length exceeds the configured maximum.
    #[error("block length {length} exceeds maximum {max}")]
    OversizedBlock { length: u32, max: u32 },

    /// The peer closed the stream cleanly between blocks.
    ///
    /// Read loops treat this as a termination signal, not a fault.
    #[error("end of stream")]
    EndOfStream,

    /// The peer closed the stream in the middle of a block.
    #[error("stream truncated mid-block")]
    Truncated,

    /// No handler is registered for the given message id.
    #[error("no handler registered for message id {0}")]
    UnknownMessageId(i32),

    /// `unuse` was called with a key that was never registered.
    #[error("middleware key '{0}' not found")]
    UnknownMiddleware(String),

    /// Binding the listener or packet socket failed.
    #[error("listen failed: {0}")]
    Listen(#[source] std::io::Error),

    /// Network name or operation not supported by this build.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// `listen_and_serve` was called on a server that is already running.
    #[error("server is already serving")]
    AlreadyServing,

    /// `stop` was called on a server that is not running.
    #[error("server already stopped")]
    AlreadyStopped,
}

/// Result type alias using MuxwireError.
pub type Result<T> = std::result::Result<T, MuxwireError>;
