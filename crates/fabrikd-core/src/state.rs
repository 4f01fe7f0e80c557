//! Printer state model
//!
//! The state shared between the telemetry poll, the broadcast tick, and the
//! client-facing command handlers. All of it lives behind one lock owned by
//! the controller; this module only defines the data.

use rmpv::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Live extruder/bed temperatures keyed by sensor id (`t`, `t0`, `b`, ...)
pub type Temperatures = HashMap<String, f64>;

/// Firmware-identification facts, merge-updated as the device reports them
pub type MachineInfo = HashMap<String, Value>;

/// Opaque identifier of one client connection
///
/// Allocated from a monotonic counter on accept; never reused within a
/// server lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// One phase of a print job's lifecycle
///
/// Cyclic: `None → Starting → Printing → Ending → None`, a single active job
/// at a time. `None` is both the initial and the terminal-per-job phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    /// No job is active
    #[default]
    None,
    /// The start routine is running (or about to)
    Starting,
    /// The print body is streaming
    Printing,
    /// The end routine is running (or about to)
    Ending,
}

impl Segment {
    /// Wire representation of this segment
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::None => "none",
            Segment::Starting => "starting",
            Segment::Printing => "printing",
            Segment::Ending => "ending",
        }
    }

    /// The next segment in the cycle
    pub fn next(&self) -> Segment {
        match self {
            Segment::None => Segment::Starting,
            Segment::Starting => Segment::Printing,
            Segment::Printing => Segment::Ending,
            Segment::Ending => Segment::None,
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broadcast topic a client can opt into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Live temperature readings, once per tick
    Temperature,
    /// Status snapshot plus buffered lifecycle/error events, once per tick
    Info,
    /// Raw device output lines, drained once per tick
    Raw,
}

impl Topic {
    /// All topics, in broadcast delivery order
    pub const ALL: [Topic; 3] = [Topic::Temperature, Topic::Info, Topic::Raw];
}

/// A subscription request target: one topic, or all of them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicSelector {
    /// A single topic
    One(Topic),
    /// Every topic
    All,
}

impl TopicSelector {
    /// Parse the wire `type` field of a subscribe/unsubscribe request
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "temperature" => Some(TopicSelector::One(Topic::Temperature)),
            "info" => Some(TopicSelector::One(Topic::Info)),
            "raw" => Some(TopicSelector::One(Topic::Raw)),
            "all" => Some(TopicSelector::All),
            _ => None,
        }
    }

    /// The topics this selector covers
    pub fn topics(&self) -> &'static [Topic] {
        match self {
            TopicSelector::One(Topic::Temperature) => &[Topic::Temperature],
            TopicSelector::One(Topic::Info) => &[Topic::Info],
            TopicSelector::One(Topic::Raw) => &[Topic::Raw],
            TopicSelector::All => &Topic::ALL,
        }
    }
}

/// Device state owned by the printer controller
///
/// Invariants: `current_line` is `Some` only while `printing || paused`;
/// `current_segment != Segment::None` implies a print job is set.
#[derive(Debug, Clone, Default)]
pub struct PrinterState {
    /// Sensor temperatures, merge-updated from device output
    pub temperatures: Temperatures,
    /// Next body line to send, while a job is active
    pub current_line: Option<u64>,
    /// A print job is in flight
    pub printing: bool,
    /// The in-flight job is paused
    pub paused: bool,
    /// Firmware identity facts, merge-updated
    pub machine_info: MachineInfo,
    /// Current print-job segment
    pub current_segment: Segment,
    /// Device transport liveness
    pub ok: bool,
}

impl PrinterState {
    /// Fresh state for a device family, seeded with its identity defaults
    pub fn new(machine_info: MachineInfo) -> Self {
        Self {
            machine_info,
            ok: true,
            ..Default::default()
        }
    }

    /// Merge newly parsed temperatures; existing sensors are overwritten,
    /// absent sensors keep their last reading
    pub fn merge_temperatures(&mut self, readings: Temperatures) {
        self.temperatures.extend(readings);
    }

    /// Merge newly parsed firmware-identification facts
    pub fn merge_machine_info(&mut self, facts: MachineInfo) {
        self.machine_info.extend(facts);
    }
}
