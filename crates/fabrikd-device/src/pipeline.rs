//! Command pipeline with retry and flow-control discipline
//!
//! Funnels every outbound device command through ordered queues, one per
//! logical priority: the `immediate` lane (telemetry polls, control-action
//! routines) and the `stream` lane (print body plus commands submitted
//! against an active print). Within a lane, FIFO is strict; nothing is ever
//! reordered, skipped, or duplicated once acknowledged.
//!
//! One long-lived worker task owns all sends. A transient device error
//! (buffer-full, transmission hiccup) retries the same line after a fixed
//! backoff; a fatal one clears the queues and raises a fault event so the
//! job layer can cancel the print. Sustained transient failures on a single
//! line past a threshold flip the liveness flag.

use crate::link::{DeviceLink, SendOutcome};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

/// Tuning knobs for the pipeline worker
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Fixed backoff between retries of one line
    pub retry_backoff: Duration,
    /// Settle delay before the first command of a newly armed batch
    pub settle_delay: Duration,
    /// Consecutive transient failures on one line before liveness is lost
    pub fail_threshold: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(100),
            settle_delay: Duration::from_millis(100),
            fail_threshold: 25,
        }
    }
}

/// Events raised by the pipeline worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The armed stream batch has fully drained
    StreamDrained,
    /// The device declared a fatal condition; queues were cleared
    Fault(String),
}

#[derive(Default)]
struct Queues {
    immediate: VecDeque<String>,
    stream: VecDeque<String>,
    /// A stream batch is armed; its drain fires [`PipelineEvent::StreamDrained`]
    stream_armed: bool,
    /// Stream sends bump the progress cursor (body batches only)
    track_progress: bool,
    /// Sleep the settle delay before the next stream send
    settle_pending: bool,
}

enum Step {
    Send { line: String, stream: bool },
    Settle,
    Idle,
}

/// Serializes all writes to the device link
pub struct CommandPipeline {
    link: Arc<dyn DeviceLink>,
    queues: Mutex<Queues>,
    wake: Notify,
    events: mpsc::UnboundedSender<PipelineEvent>,
    stream_paused: AtomicBool,
    ok: AtomicBool,
    stream_cursor: AtomicU64,
    config: PipelineConfig,
}

impl CommandPipeline {
    /// Create a pipeline over a device link
    ///
    /// The returned receiver carries drain and fault events for the job
    /// layer; the worker must be started separately with [`Self::run`].
    pub fn new(
        link: Arc<dyn DeviceLink>,
        config: PipelineConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let pipeline = Arc::new(Self {
            link,
            queues: Mutex::new(Queues::default()),
            wake: Notify::new(),
            events,
            stream_paused: AtomicBool::new(false),
            ok: AtomicBool::new(true),
            stream_cursor: AtomicU64::new(0),
            config,
        });
        (pipeline, events_rx)
    }

    /// Submit client commands
    ///
    /// While a print body is streaming these join the stream lane, keeping
    /// strict submission order with the body's own lines; otherwise they go
    /// out directly through the immediate lane.
    pub fn submit(&self, commands: Vec<String>) {
        {
            let mut q = self.queues.lock();
            if q.stream_armed {
                q.stream.extend(commands);
            } else {
                q.immediate.extend(commands);
            }
        }
        self.wake.notify_one();
    }

    /// Submit commands on the immediate lane unconditionally
    ///
    /// Used by the telemetry poll and by control-action routines
    /// (pause/resume/cancel), which must not sit behind a paused stream.
    pub fn submit_control(&self, commands: Vec<String>) {
        self.queues.lock().immediate.extend(commands);
        self.wake.notify_one();
    }

    /// Arm a stream batch (segment routine or print body)
    ///
    /// Draining fires [`PipelineEvent::StreamDrained`]. An empty batch
    /// drains immediately. `track_progress` is set for the print body so
    /// the cursor reflects body lines only.
    pub fn arm_stream(&self, commands: Vec<String>, track_progress: bool) {
        if commands.is_empty() {
            let _ = self.events.send(PipelineEvent::StreamDrained);
            return;
        }
        {
            let mut q = self.queues.lock();
            q.stream.extend(commands);
            q.stream_armed = true;
            q.track_progress = track_progress;
            q.settle_pending = true;
        }
        if track_progress {
            self.stream_cursor.store(0, Ordering::Relaxed);
        }
        self.wake.notify_one();
    }

    /// Halt further stream-lane submission; entries and cursor are kept
    pub fn pause_stream(&self) {
        self.stream_paused.store(true, Ordering::Relaxed);
    }

    /// Resume stream-lane submission from where it stopped
    pub fn resume_stream(&self) {
        self.stream_paused.store(false, Ordering::Relaxed);
        self.wake.notify_one();
    }

    /// Whether the stream lane is paused
    pub fn is_stream_paused(&self) -> bool {
        self.stream_paused.load(Ordering::Relaxed)
    }

    /// Flush both lanes and disarm the stream (print stop/cancel)
    ///
    /// No drain event fires for a cleared batch.
    pub fn clear(&self) {
        let mut q = self.queues.lock();
        q.immediate.clear();
        q.stream.clear();
        q.stream_armed = false;
        q.track_progress = false;
        q.settle_pending = false;
        drop(q);
        self.stream_paused.store(false, Ordering::Relaxed);
        self.stream_cursor.store(0, Ordering::Relaxed);
    }

    /// Body lines sent from the currently tracked batch
    pub fn stream_cursor(&self) -> u64 {
        self.stream_cursor.load(Ordering::Relaxed)
    }

    /// Combined liveness: the link's own flag and the sustained-failure flag
    pub fn is_ok(&self) -> bool {
        self.ok.load(Ordering::Relaxed) && self.link.is_ok()
    }

    /// Worker loop; owns every send to the device link
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.next_step() {
                Step::Send { line, stream } => {
                    if !self.dispatch(&line, stream, &shutdown).await {
                        break;
                    }
                }
                Step::Settle => tokio::time::sleep(self.config.settle_delay).await,
                Step::Idle => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        tracing::debug!("command pipeline worker stopped");
    }

    fn next_step(&self) -> Step {
        let mut q = self.queues.lock();
        if let Some(line) = q.immediate.pop_front() {
            return Step::Send {
                line,
                stream: false,
            };
        }
        if !self.stream_paused.load(Ordering::Relaxed) {
            if !q.stream.is_empty() && q.settle_pending {
                q.settle_pending = false;
                return Step::Settle;
            }
            if let Some(line) = q.stream.pop_front() {
                return Step::Send { line, stream: true };
            }
        }
        Step::Idle
    }

    /// Send one line through the retry discipline; false stops the worker
    async fn dispatch(&self, line: &str, stream: bool, shutdown: &watch::Receiver<bool>) -> bool {
        let mut failures = 0u32;
        loop {
            if *shutdown.borrow() {
                return false;
            }
            match self.link.send_line(line).await {
                SendOutcome::Ok => break,
                SendOutcome::Transient(reason) => {
                    failures += 1;
                    if failures >= self.config.fail_threshold {
                        tracing::warn!(
                            command = line,
                            failures,
                            "sustained transient failures, declaring device unreachable"
                        );
                        self.ok.store(false, Ordering::Relaxed);
                        return false;
                    }
                    tracing::debug!(command = line, reason = %reason, "transient device error, retrying");
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                SendOutcome::Fatal(reason) => {
                    tracing::error!(command = line, reason = %reason, "fatal device error, clearing queues");
                    self.clear();
                    let _ = self.events.send(PipelineEvent::Fault(reason));
                    return true;
                }
            }
        }

        if stream {
            let drained = {
                let mut q = self.queues.lock();
                if q.track_progress {
                    self.stream_cursor.fetch_add(1, Ordering::Relaxed);
                }
                let drained = q.stream_armed && q.stream.is_empty();
                if drained {
                    q.stream_armed = false;
                    q.track_progress = false;
                }
                drained
            };
            if drained {
                let _ = self.events.send(PipelineEvent::StreamDrained);
            }
        }
        true
    }
}
