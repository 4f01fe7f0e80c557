//! Incremental frame decoding
//!
//! Each connection owns one [`FrameDecoder`]. Bytes are fed in as they
//! arrive; complete MessagePack values are pulled out and classified. A
//! truncated value is not an error, only a reason to wait for the next read.

use crate::error::ProtocolError;
use crate::proto::message::ClientAction;
use rmpv::Value;
use std::io::{Cursor, ErrorKind};

/// Default cap on undecoded inbound bytes per connection.
///
/// A well-behaved client never gets near this; hitting it means the stream
/// is not framed MessagePack and the connection is torn down.
pub const MAX_INBOUND_BUFFER: usize = 1024 * 1024;

/// One decoded inbound value, classified by shape
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A well-formed `{action, data}` request with a known action
    Request {
        /// The requested operation.
        action: ClientAction,
        /// The action-specific payload, uninterpreted.
        data: Value,
    },
    /// A well-formed `{action, data}` shape naming no known operation
    UnknownAction {
        /// The unrecognized action name.
        action: String,
    },
    /// Not a map, or missing `action`/`data`
    Malformed,
}

/// Incremental decoder for one connection's inbound byte stream
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_buffer: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder with the default buffer cap
    pub fn new() -> Self {
        Self::with_max_buffer(MAX_INBOUND_BUFFER)
    }

    /// Create a decoder with a custom buffer cap
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_buffer,
        }
    }

    /// Append newly read bytes
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of undecoded bytes held
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete frame, if one is buffered
    ///
    /// `Ok(None)` means the buffer holds only a prefix of the next value.
    /// `Err` means the stream is unrecoverable for this connection.
    pub fn try_next(&mut self) -> Result<Option<InboundFrame>, ProtocolError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(self.buf.as_slice());
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                self.buf.drain(..consumed);
                Ok(Some(classify(value)))
            }
            Err(ref e) if is_truncated(e) => {
                if self.buf.len() > self.max_buffer {
                    return Err(ProtocolError::BufferOverflow {
                        size: self.buf.len(),
                    });
                }
                Ok(None)
            }
            Err(e) => Err(ProtocolError::CorruptStream {
                reason: e.to_string(),
            }),
        }
    }
}

/// Whether a decode failure means "need more bytes" rather than corruption
fn is_truncated(err: &rmpv::decode::Error) -> bool {
    match err {
        rmpv::decode::Error::InvalidMarkerRead(io) | rmpv::decode::Error::InvalidDataRead(io) => {
            io.kind() == ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

/// Classify a decoded value against the `{action, data}` shape
fn classify(value: Value) -> InboundFrame {
    let Value::Map(entries) = value else {
        return InboundFrame::Malformed;
    };

    let mut action: Option<String> = None;
    let mut data: Option<Value> = None;
    for (key, val) in entries {
        match key.as_str() {
            Some("action") => match val.as_str() {
                Some(name) => action = Some(name.to_string()),
                None => return InboundFrame::Malformed,
            },
            Some("data") => data = Some(val),
            _ => {}
        }
    }

    let (Some(action), Some(data)) = (action, data) else {
        return InboundFrame::Malformed;
    };

    match ClientAction::parse(&action) {
        Some(action) => InboundFrame::Request { action, data },
        None => InboundFrame::UnknownAction { action },
    }
}
