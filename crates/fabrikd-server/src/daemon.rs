//! Daemon assembly
//!
//! Builds the whole control plane over one device link and runs it: the
//! command pipeline worker, the job runner, the controller's broadcast,
//! telemetry, and line loops, and the socket server. The binary and the
//! integration tests both start here.

use crate::controller::{Controller, ControllerConfig};
use crate::job::JobRunner;
use crate::mux::{Registry, Server, ServerConfig};
use crate::shared::new_shared;
use fabrikd_core::error::Result;
use fabrikd_device::link::DeviceLink;
use fabrikd_device::pipeline::{CommandPipeline, PipelineConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Full daemon configuration
#[derive(Debug, Clone, Default)]
pub struct DaemonConfig {
    /// Control socket path
    pub socket_path: PathBuf,
    /// Controller cadences
    pub controller: ControllerConfig,
    /// Pipeline retry discipline
    pub pipeline: PipelineConfig,
}

impl DaemonConfig {
    /// Configuration rooted at a socket path, defaults elsewhere
    pub fn at(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }
}

/// An assembled, not-yet-running daemon
pub struct Daemon {
    server: Arc<Server>,
    controller: Arc<Controller>,
    pipeline: Arc<CommandPipeline>,
    runner: JobRunner,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Daemon {
    /// Assemble the control plane over a device link
    pub fn new(link: Arc<dyn DeviceLink>, config: DaemonConfig) -> Self {
        let shared = new_shared(link.family().default_machine_info());
        let shutdown = Arc::new(watch::channel(false).0);

        let (pipeline, pipeline_events) = CommandPipeline::new(link.clone(), config.pipeline);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Registry::new());

        let controller = Arc::new(Controller::new(
            shared.clone(),
            registry.clone(),
            pipeline.clone(),
            jobs_tx,
            link,
            config.controller,
            shutdown.clone(),
        ));
        let runner = JobRunner::new(shared.clone(), pipeline.clone(), jobs_rx, pipeline_events);
        let server = Arc::new(Server::new(
            ServerConfig {
                socket_path: config.socket_path,
                ..Default::default()
            },
            registry,
            controller.clone(),
            shared,
            shutdown.clone(),
        ));

        Self {
            server,
            controller,
            pipeline,
            runner,
            shutdown,
        }
    }

    /// Handle for requesting shutdown from outside (signal handler, tests)
    pub fn shutdown_handle(&self) -> Arc<watch::Sender<bool>> {
        self.shutdown.clone()
    }

    /// Spawn the background workers and serve until shutdown
    pub async fn run(self) -> Result<()> {
        let Self {
            server,
            controller,
            pipeline,
            runner,
            shutdown,
        } = self;

        tokio::spawn(pipeline.run(shutdown.subscribe()));
        tokio::spawn(runner.run(shutdown.subscribe()));
        tokio::spawn(controller.clone().broadcast_loop());
        tokio::spawn(controller.clone().telemetry_loop());
        tokio::spawn(controller.line_loop());

        server.run().await
    }
}
