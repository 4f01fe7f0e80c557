//! # Fabrikd Server
//!
//! The client-facing half of the daemon: the Unix-socket connection
//! multiplexer, the subscription sets, the printer controller with its
//! broadcast and telemetry loops, and the print-job state machine.
//!
//! Everything here coordinates through two channels and one lock: client
//! requests dispatch synchronously into the controller, job control and
//! pipeline events flow over mpsc channels into the job runner, and the
//! shared printer state sits behind a single mutex that is never held
//! across I/O.

pub mod controller;
pub mod daemon;
pub mod job;
pub mod mux;
pub mod shared;
pub mod subscriptions;

pub use controller::{Controller, ControllerConfig};
pub use daemon::{Daemon, DaemonConfig};
pub use job::{JobRequest, JobRunner};
pub use mux::{Outbound, Registry, Server, ServerConfig};
pub use shared::{new_shared, Shared, SharedState};
pub use subscriptions::SubscriptionSets;
