//! # Fabrikd
//!
//! A local control daemon for a single attached 3D printer. Clients connect
//! over a Unix socket, subscribe to topics (temperature, status, raw device
//! output), submit print jobs and control macros, and receive continuous
//! asynchronous updates.
//!
//! ## Architecture
//!
//! Fabrikd is organized as a workspace with multiple crates:
//!
//! 1. **fabrikd-core** - Shared types, error taxonomy, wire protocol
//! 2. **fabrikd-device** - Device link seam, command pipeline, output parsing
//! 3. **fabrikd-server** - Connection multiplexer, printer controller, print jobs
//! 4. **fabrikd** - Main binary that integrates all crates

pub mod config;

pub use config::Config;

pub use fabrikd_core::{
    ClientAction, ConnectionId, DeviceError, Error, FrameDecoder, InboundFrame, InfoSnapshot,
    PrinterState, ProtocolError, Result, Segment, SegmentLabel, ServerError, ServerMessage, Topic,
    TopicSelector, PROTOCOL_VERSION,
};

pub use fabrikd_device::{
    CommandPipeline, DeviceFamily, DeviceLink, PipelineConfig, PipelineEvent, SendOutcome,
    SimConfig, SimLink,
};

pub use fabrikd_server::{Controller, ControllerConfig, Daemon, DaemonConfig, JobRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with console output and `RUST_LOG`
/// environment variable support, defaulting to INFO.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .try_init()?;

    Ok(())
}
