//! Error handling for fabrikd
//!
//! Provides error types for the layers of the daemon:
//! - Protocol errors (wire framing, message shape)
//! - Device errors (transport faults, liveness)
//! - Server errors (socket lifecycle, connection registry)
//!
//! All error types use `thiserror` for ergonomic error handling. Client-facing
//! protocol violations are NOT represented here: they are answered in-band with
//! `data_error`/`action_error` messages and never abort a connection.

use thiserror::Error;

/// Wire protocol error type
///
/// Represents unrecoverable framing failures on a client connection. A frame
/// that decodes but has the wrong shape is handled in-band instead.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The byte stream contains a prefix that is not valid MessagePack
    #[error("Undecodable byte stream: {reason}")]
    CorruptStream {
        /// Decoder failure description.
        reason: String,
    },

    /// A message could not be encoded for transmission
    #[error("Failed to encode {action} message: {reason}")]
    Encode {
        /// The action field of the message being encoded.
        action: String,
        /// The encoder failure description.
        reason: String,
    },

    /// A connection accumulated more undecoded bytes than allowed
    #[error("Inbound buffer overflow: {size} bytes without a complete message")]
    BufferOverflow {
        /// Accumulated byte count at the time of the failure.
        size: usize,
    },
}

/// Device transport error type
///
/// Represents faults raised by the device link or the command pipeline.
/// Transient conditions (buffer-full, transmission retry) never surface as
/// errors: they are absorbed by the retry discipline.
#[derive(Error, Debug, Clone)]
pub enum DeviceError {
    /// The device declared a fatal protocol condition
    #[error("Fatal device error: {reason}")]
    Fatal {
        /// Device-reported reason.
        reason: String,
    },

    /// The device transport is no longer believed reachable
    #[error("Device liveness lost: {reason}")]
    LivenessLost {
        /// What tripped the liveness threshold.
        reason: String,
    },

    /// The command pipeline is shut down
    #[error("Command pipeline stopped")]
    PipelineStopped,
}

/// Server error type
///
/// Represents socket lifecycle failures of the daemon itself.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The control socket could not be bound
    #[error("Failed to bind control socket {path}: {reason}")]
    Bind {
        /// The socket path.
        path: String,
        /// The bind failure description.
        reason: String,
    },

    /// A connection is not present in the registry
    #[error("Unknown connection {0}")]
    UnknownConnection(u64),

    /// The server is shutting down
    #[error("Server stopping")]
    Stopping,
}

/// Main error type for fabrikd
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Wire protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Device transport error
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Server error
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this error should stop the whole daemon
    pub fn is_fatal_for_daemon(&self) -> bool {
        matches!(self, Error::Device(DeviceError::LivenessLost { .. }))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
