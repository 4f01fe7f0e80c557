//! Shared daemon state
//!
//! One mutex guards everything the broadcast tick, the telemetry poll, the
//! job runner, and the request handlers touch: printer state, subscriber
//! sets, the routine table, and the per-tick event/raw buffers. The lock is
//! snapshotted and released before any socket or device I/O.

use crate::subscriptions::SubscriptionSets;
use fabrikd_core::proto::ServerMessage;
use fabrikd_core::state::{MachineInfo, PrinterState};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Cap on buffered raw device lines between ticks.
///
/// A chatty device cannot grow the buffer without bound if the broadcast
/// tick stalls; the oldest lines are dropped first.
const MAX_RAW_BUFFER: usize = 4096;

/// State guarded by the daemon's single shared lock
#[derive(Debug)]
pub struct SharedState {
    /// Printer state owned by the controller
    pub printer: PrinterState,
    /// Per-topic subscriber sets
    pub subs: SubscriptionSets,
    /// Named command routines (macros), replaced per key on update
    pub routines: HashMap<String, Vec<String>>,
    /// Lifecycle/error events buffered for the next tick's info delivery
    pub events: VecDeque<ServerMessage>,
    /// Raw device lines buffered for the next tick's raw delivery
    pub raw_lines: VecDeque<String>,
}

/// Handle to the shared state
pub type Shared = Arc<Mutex<SharedState>>;

impl SharedState {
    /// Fresh state seeded with a device family's identity defaults
    pub fn new(machine_info: MachineInfo) -> Self {
        Self {
            printer: PrinterState::new(machine_info),
            subs: SubscriptionSets::default(),
            routines: HashMap::new(),
            events: VecDeque::new(),
            raw_lines: VecDeque::new(),
        }
    }

    /// Buffer a lifecycle event for the next tick's info subscribers
    pub fn buffer_event(&mut self, event: ServerMessage) {
        self.events.push_back(event);
    }

    /// Buffer a raw device line for the next tick's raw subscribers
    pub fn buffer_raw_line(&mut self, line: String) {
        if self.raw_lines.len() >= MAX_RAW_BUFFER {
            self.raw_lines.pop_front();
        }
        self.raw_lines.push_back(line);
    }

    /// Reset every job-related field to the idle shape
    ///
    /// Upholds the invariant that `current_line` exists only while a job
    /// is in flight.
    pub fn reset_job_state(&mut self) {
        self.printer.printing = false;
        self.printer.paused = false;
        self.printer.current_line = None;
        self.printer.current_segment = fabrikd_core::state::Segment::None;
    }
}

/// Build a shared handle
pub fn new_shared(machine_info: MachineInfo) -> Shared {
    Arc::new(Mutex::new(SharedState::new(machine_info)))
}
