//! Print job state machine
//!
//! Drives a print through its segments, `None → Starting → Printing →
//! Ending → None`, invoking the registered routines at segment boundaries.
//! The runner is the only task that owns the job and the only place that
//! decides a print is complete. Segment advances are triggered by the
//! pipeline's drain events; faults cancel the job outright.

use crate::shared::Shared;
use fabrikd_core::proto::{SegmentLabel, ServerMessage};
use fabrikd_core::state::Segment;
use fabrikd_device::pipeline::{CommandPipeline, PipelineEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Routine names bound to the job lifecycle
const START_ROUTINE: &str = "start_print";
const END_ROUTINE: &str = "end_print";
const CANCEL_ROUTINE: &str = "cancel_print";
const PAUSE_ROUTINE: &str = "pause_print";
const RESUME_ROUTINE: &str = "resume_print";

/// Control requests from the printer controller to the job runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    /// Begin a print of the given file (state guard already passed)
    Start {
        /// Path of the print file.
        path: String,
    },
    /// Stop the active print, flushing pending commands
    Stop,
    /// Halt body streaming, keeping the cursor
    Pause,
    /// Restart body streaming from the kept cursor
    Resume,
}

/// The one active print job
#[derive(Debug)]
struct PrintJob {
    path: String,
}

/// Executes print jobs on its own task
pub struct JobRunner {
    shared: Shared,
    pipeline: Arc<CommandPipeline>,
    requests: mpsc::UnboundedReceiver<JobRequest>,
    pipeline_events: mpsc::UnboundedReceiver<PipelineEvent>,
    job: Option<PrintJob>,
}

impl JobRunner {
    /// Wire up a runner over the shared state and the pipeline
    pub fn new(
        shared: Shared,
        pipeline: Arc<CommandPipeline>,
        requests: mpsc::UnboundedReceiver<JobRequest>,
        pipeline_events: mpsc::UnboundedReceiver<PipelineEvent>,
    ) -> Self {
        Self {
            shared,
            pipeline,
            requests,
            pipeline_events,
            job: None,
        }
    }

    /// Runner loop; reacts to control requests and pipeline events
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        enum Wake {
            Request(Option<JobRequest>),
            Pipeline(Option<PipelineEvent>),
            Shutdown,
        }

        loop {
            let wake = tokio::select! {
                req = self.requests.recv() => Wake::Request(req),
                event = self.pipeline_events.recv() => Wake::Pipeline(event),
                _ = shutdown.changed() => Wake::Shutdown,
            };
            match wake {
                Wake::Request(Some(req)) => self.handle_request(req).await,
                Wake::Pipeline(Some(PipelineEvent::StreamDrained)) => self.advance().await,
                Wake::Pipeline(Some(PipelineEvent::Fault(reason))) => self.on_fault(&reason),
                Wake::Request(None) | Wake::Pipeline(None) | Wake::Shutdown => break,
            }
        }
        tracing::debug!("job runner stopped");
    }

    async fn handle_request(&mut self, request: JobRequest) {
        match request {
            JobRequest::Start { path } => {
                if self.job.is_some() {
                    tracing::warn!(path = %path, "start request while a job is active, ignoring");
                    return;
                }
                self.job = Some(PrintJob { path });
                match self.routine(START_ROUTINE) {
                    Some(commands) => self.pipeline.arm_stream(commands, false),
                    // Zero-duration starting segment
                    None => self.advance().await,
                }
            }
            JobRequest::Stop => {
                self.pipeline.clear();
                if let Some(commands) = self.routine(CANCEL_ROUTINE) {
                    self.pipeline.submit_control(commands);
                }
                self.job = None;
            }
            JobRequest::Pause => {
                self.pipeline.pause_stream();
                if let Some(commands) = self.routine(PAUSE_ROUTINE) {
                    self.pipeline.submit_control(commands);
                }
            }
            JobRequest::Resume => {
                if let Some(commands) = self.routine(RESUME_ROUTINE) {
                    self.pipeline.submit_control(commands);
                }
                self.pipeline.resume_stream();
            }
        }
    }

    /// Advance past the segment whose command batch just drained
    ///
    /// Loops so that an unregistered routine yields a zero-duration
    /// segment instead of a stall.
    async fn advance(&mut self) {
        loop {
            let segment = self.shared.lock().printer.current_segment;
            match segment {
                // A non-job batch drained, nothing to advance
                Segment::None => return,
                Segment::Starting => {
                    let Some(job) = &self.job else { return };
                    let lines = match load_lines(&job.path).await {
                        Ok(lines) => lines,
                        Err(e) => {
                            tracing::error!(
                                path = %job.path,
                                error = %e,
                                "cannot open print file, abandoning job"
                            );
                            self.abandon();
                            return;
                        }
                    };
                    {
                        let mut state = self.shared.lock();
                        state.printer.current_segment = Segment::Printing;
                        state.buffer_event(ServerMessage::SegmentCompleted(SegmentLabel::Start));
                    }
                    self.pipeline.arm_stream(lines, true);
                    return;
                }
                Segment::Printing => {
                    let routine = {
                        let mut state = self.shared.lock();
                        state.printer.current_segment = Segment::Ending;
                        state.buffer_event(ServerMessage::SegmentCompleted(SegmentLabel::Print));
                        state.routines.get(END_ROUTINE).cloned()
                    };
                    match routine {
                        Some(commands) => {
                            self.pipeline.arm_stream(commands, false);
                            return;
                        }
                        // Zero-duration ending segment
                        None => continue,
                    }
                }
                Segment::Ending => {
                    {
                        let mut state = self.shared.lock();
                        state.buffer_event(ServerMessage::PrintComplete);
                        state.buffer_event(ServerMessage::SegmentCompleted(SegmentLabel::End));
                        state.reset_job_state();
                    }
                    self.job = None;
                    tracing::info!("print complete");
                    return;
                }
            }
        }
    }

    /// Abandon the job after a fatal job-level error (unopenable file)
    fn abandon(&mut self) {
        self.pipeline.clear();
        {
            let mut state = self.shared.lock();
            state.buffer_event(ServerMessage::PrintCancelled);
            state.reset_job_state();
        }
        self.job = None;
    }

    /// Cancel the job after a fatal device error
    fn on_fault(&mut self, reason: &str) {
        tracing::error!(reason, "fatal device error");
        if self.job.is_none() {
            return;
        }
        {
            let mut state = self.shared.lock();
            state.buffer_event(ServerMessage::PrintCancelled);
            state.reset_job_state();
        }
        self.job = None;
    }

    fn routine(&self, name: &str) -> Option<Vec<String>> {
        self.shared.lock().routines.get(name).cloned()
    }
}

/// Load a print file as trimmed, non-empty command lines
async fn load_lines(path: &str) -> std::io::Result<Vec<String>> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
