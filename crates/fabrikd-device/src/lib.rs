//! # Fabrikd Device
//!
//! The device side of the daemon: the transport seam ([`DeviceLink`]), the
//! command pipeline that serializes and retries everything sent through that
//! seam, parsing of raw device output, and a simulated device family used by
//! tests and bench runs.
//!
//! The physical transport (serial driver, subprocess bridge, vendor SDK) is
//! an external collaborator. This crate only fixes the interface it must
//! present: issue one command line and report an explicit outcome, invoke a
//! callback per received line, report liveness.

pub mod link;
pub mod parse;
pub mod pipeline;
pub mod sim;

pub use link::{DeviceFamily, DeviceLink, ErrorClass, SendOutcome};
pub use pipeline::{CommandPipeline, PipelineConfig, PipelineEvent};
pub use sim::{SimConfig, SimLink};
