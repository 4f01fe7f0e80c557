//! Server-to-client messages and the client action table

use crate::error::ProtocolError;
use crate::state::{MachineInfo, Segment, Temperatures};
use rmpv::Value;
use serde::{Deserialize, Serialize};

/// Actions a client may send
///
/// Anything else on the wire is answered with `action_error` and otherwise
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    /// Request a `machine_info` snapshot reply
    MachineInfo,
    /// Submit device commands (`data: list<string>`)
    SendCommands,
    /// Start a print job (`data: path`)
    PrintFile,
    /// Stop the active print
    StopPrint,
    /// Pause the active print
    PausePrint,
    /// Resume a paused print
    ResumePrint,
    /// Run a named routine (`data: name`)
    RunRoutine,
    /// Merge routine definitions (`data: map<name, list<string>>`)
    UpdateRoutines,
    /// Join subscriber set(s) (`data: {type}`)
    Subscribe,
    /// Leave subscriber set(s) (`data: {type}`)
    Unsubscribe,
}

impl ClientAction {
    /// Parse a wire action name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "machine_info" => Some(Self::MachineInfo),
            "send_commands" => Some(Self::SendCommands),
            "print_file" => Some(Self::PrintFile),
            "stop_print" => Some(Self::StopPrint),
            "pause_print" => Some(Self::PausePrint),
            "resume_print" => Some(Self::ResumePrint),
            "run_routine" => Some(Self::RunRoutine),
            "update_routines" => Some(Self::UpdateRoutines),
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            _ => None,
        }
    }

    /// Wire name of this action
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MachineInfo => "machine_info",
            Self::SendCommands => "send_commands",
            Self::PrintFile => "print_file",
            Self::StopPrint => "stop_print",
            Self::PausePrint => "pause_print",
            Self::ResumePrint => "resume_print",
            Self::RunRoutine => "run_routine",
            Self::UpdateRoutines => "update_routines",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Which segment boundary a `segment_completed` event marks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentLabel {
    /// The start routine finished
    Start,
    /// The print body finished streaming
    Print,
    /// The end routine finished
    End,
}

impl SegmentLabel {
    /// Wire value carried in the event's `data` field
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentLabel::Start => "start_segment",
            SegmentLabel::Print => "print_segment",
            SegmentLabel::End => "end_segment",
        }
    }
}

/// The status snapshot delivered to `info` subscribers each tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoSnapshot {
    /// Next body line to send, while a job is active
    pub current_line: Option<u64>,
    /// A print job is in flight
    pub printing: bool,
    /// The in-flight job is paused
    pub paused: bool,
    /// Firmware identity facts
    pub machine_info: MachineInfo,
    /// Current print-job segment
    pub current_segment: Segment,
}

/// A message from the server to a client
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Greeting sent once per connection, on accept
    ServerInfo {
        /// Protocol version.
        version: String,
        /// Daemon process id.
        pid: u32,
    },
    /// Temperature readings, to `temperature` subscribers
    Temperature(Temperatures),
    /// Status snapshot, to `info` subscribers
    Info(InfoSnapshot),
    /// One raw device output line, to `raw` subscribers
    Raw(String),
    /// Machine identity snapshot, replied to a `machine_info` request
    MachineInfo(MachineInfo),
    /// A print job was accepted and is starting
    PrintStarted,
    /// The active print was stopped by a client
    PrintStopped,
    /// The active print was paused
    PrintPaused,
    /// The paused print was resumed
    PrintResumed,
    /// The job ran to completion
    PrintComplete,
    /// The job was abandoned after a fatal device error
    PrintCancelled,
    /// A segment boundary was crossed
    SegmentCompleted(SegmentLabel),
    /// Device liveness was lost; the server is about to stop
    Disconnected,
    /// The request's `data` field was malformed
    DataError(String),
    /// The request's `action` field named no known operation
    ActionError(String),
    /// A `run_routine` request named no registered routine
    RoutineError(String),
}

impl ServerMessage {
    /// Wire name of this message's `action` field
    pub fn action(&self) -> &'static str {
        match self {
            Self::ServerInfo { .. } => "server_info",
            Self::Temperature(_) => "temperature",
            Self::Info(_) => "info",
            Self::Raw(_) => "raw",
            Self::MachineInfo(_) => "machine_info",
            Self::PrintStarted => "print_started",
            Self::PrintStopped => "print_stopped",
            Self::PrintPaused => "print_paused",
            Self::PrintResumed => "print_resumed",
            Self::PrintComplete => "print_complete",
            Self::PrintCancelled => "print_cancelled",
            Self::SegmentCompleted(_) => "segment_completed",
            Self::Disconnected => "disconnected",
            Self::DataError(_) => "data_error",
            Self::ActionError(_) => "action_error",
            Self::RoutineError(_) => "routine_error",
        }
    }

    /// Build this message's `data` value
    fn data(&self) -> Result<Value, ProtocolError> {
        let encode_err = |e: rmpv::ext::Error| ProtocolError::Encode {
            action: self.action().to_string(),
            reason: e.to_string(),
        };

        Ok(match self {
            Self::ServerInfo { version, pid } => Value::Map(vec![
                (Value::from("version"), Value::from(version.as_str())),
                (Value::from("pid"), Value::from(*pid)),
            ]),
            Self::Temperature(temps) => rmpv::ext::to_value(temps).map_err(encode_err)?,
            Self::Info(snapshot) => rmpv::ext::to_value(snapshot).map_err(encode_err)?,
            Self::Raw(line) => Value::from(line.as_str()),
            Self::MachineInfo(info) => rmpv::ext::to_value(info).map_err(encode_err)?,
            Self::SegmentCompleted(label) => Value::from(label.as_str()),
            Self::DataError(msg) | Self::ActionError(msg) | Self::RoutineError(msg) => {
                Value::from(msg.as_str())
            }
            // Lifecycle events carry an empty payload
            Self::PrintStarted
            | Self::PrintStopped
            | Self::PrintPaused
            | Self::PrintResumed
            | Self::PrintComplete
            | Self::PrintCancelled
            | Self::Disconnected => Value::from(""),
        })
    }

    /// Encode this message as one wire frame
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let frame = Value::Map(vec![
            (Value::from("action"), Value::from(self.action())),
            (Value::from("data"), self.data()?),
        ]);

        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &frame).map_err(|e| ProtocolError::Encode {
            action: self.action().to_string(),
            reason: e.to_string(),
        })?;
        Ok(buf)
    }

    /// Standard reply for a request whose `data` field is malformed
    pub fn malformed_data() -> Self {
        Self::DataError("Malformed data.".to_string())
    }

    /// Standard reply for an unknown `action` field
    pub fn invalid_action() -> Self {
        Self::ActionError("Invalid action.".to_string())
    }

    /// Standard reply for an invalid subscription type
    pub fn invalid_subscription() -> Self {
        Self::DataError("Invalid subscription type.".to_string())
    }

    /// Standard reply for an unknown routine name
    pub fn unknown_routine() -> Self {
        Self::RoutineError("routine not defined".to_string())
    }
}
