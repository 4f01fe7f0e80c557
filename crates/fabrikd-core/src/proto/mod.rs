//! Control-socket wire protocol
//!
//! Every message on the socket, in both directions, is one self-describing
//! MessagePack map with exactly two logical fields: `action` (string) and
//! `data` (action-specific value). Messages are decoded incrementally from
//! the connection's byte stream: several may arrive in one read and one may
//! span multiple reads.

pub mod codec;
pub mod message;

pub use codec::{FrameDecoder, InboundFrame};
pub use message::{ClientAction, InfoSnapshot, SegmentLabel, ServerMessage};

/// Protocol version reported in the `server_info` greeting
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");
