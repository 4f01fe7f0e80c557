//! # Fabrikd Core
//!
//! Core types, error taxonomy, and wire protocol for fabrikd.
//! Provides the fundamental abstractions shared by the device layer and the
//! socket server: printer state, subscription topics, and the MessagePack
//! message framing spoken on the control socket.

pub mod error;
pub mod proto;
pub mod state;

pub use error::{DeviceError, Error, ProtocolError, Result, ServerError};

pub use proto::{
    ClientAction, FrameDecoder, InboundFrame, InfoSnapshot, SegmentLabel, ServerMessage,
    PROTOCOL_VERSION,
};

pub use state::{ConnectionId, MachineInfo, PrinterState, Segment, Temperatures, Topic, TopicSelector};
