//! Printer controller
//!
//! Owns the client-facing command API and the two background cadences: the
//! 1 Hz broadcast tick that fans state out to subscribers, and the telemetry
//! poll that keeps the printer state fed from the device. Request dispatch
//! is synchronous; everything slow happens on the pipeline worker or the job
//! runner, reached through channels.

use crate::job::JobRequest;
use crate::mux::Outbound;
use crate::shared::Shared;
use fabrikd_core::proto::{ClientAction, InboundFrame, InfoSnapshot, ServerMessage};
use fabrikd_core::state::{ConnectionId, Segment, Topic, TopicSelector};
use fabrikd_device::link::DeviceLink;
use fabrikd_device::parse::{parse_machine_identity, parse_temperatures};
use fabrikd_device::pipeline::CommandPipeline;
use rmpv::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::RecvError, mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Cadence configuration for the controller's background loops
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Broadcast tick period
    pub broadcast_interval: Duration,
    /// Telemetry poll period
    pub poll_interval: Duration,
    /// Delay before the identification batch on startup
    pub identify_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            broadcast_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            identify_delay: Duration::from_secs(1),
        }
    }
}

/// The printer controller
pub struct Controller {
    shared: Shared,
    outbound: Arc<dyn Outbound>,
    pipeline: Arc<CommandPipeline>,
    jobs: mpsc::UnboundedSender<JobRequest>,
    link: Arc<dyn DeviceLink>,
    config: ControllerConfig,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Controller {
    /// Wire up a controller over the shared state and its collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shared: Shared,
        outbound: Arc<dyn Outbound>,
        pipeline: Arc<CommandPipeline>,
        jobs: mpsc::UnboundedSender<JobRequest>,
        link: Arc<dyn DeviceLink>,
        config: ControllerConfig,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            shared,
            outbound,
            pipeline,
            jobs,
            link,
            config,
            shutdown,
        }
    }

    /// Handle one decoded inbound frame from a connection
    ///
    /// Protocol violations are answered in-band on the same connection and
    /// never mutate state; the connection stays open.
    pub fn dispatch(&self, id: ConnectionId, frame: InboundFrame) {
        match frame {
            InboundFrame::Malformed => self.reply(id, ServerMessage::malformed_data()),
            InboundFrame::UnknownAction { action } => {
                tracing::debug!(%id, action = %action, "unknown action");
                self.reply(id, ServerMessage::invalid_action());
            }
            InboundFrame::Request { action, data } => match action {
                ClientAction::MachineInfo => self.machine_info(id),
                ClientAction::SendCommands => self.send_commands(id, &data),
                ClientAction::PrintFile => self.print_file(id, &data),
                ClientAction::StopPrint => self.stop_print(id),
                ClientAction::PausePrint => self.pause_print(id),
                ClientAction::ResumePrint => self.resume_print(id),
                ClientAction::RunRoutine => self.run_routine(id, &data),
                ClientAction::UpdateRoutines => self.update_routines(id, &data),
                ClientAction::Subscribe => self.subscribe(id, &data, true),
                ClientAction::Unsubscribe => self.subscribe(id, &data, false),
            },
        }
    }

    fn reply(&self, id: ConnectionId, msg: ServerMessage) {
        self.outbound.enqueue(id, msg);
    }

    fn machine_info(&self, id: ConnectionId) {
        let info = self.shared.lock().printer.machine_info.clone();
        self.reply(id, ServerMessage::MachineInfo(info));
    }

    fn send_commands(&self, id: ConnectionId, data: &Value) {
        match as_string_list(data) {
            Some(commands) => self.pipeline.submit(commands),
            None => self.reply(id, ServerMessage::malformed_data()),
        }
    }

    fn print_file(&self, id: ConnectionId, data: &Value) {
        let Some(path) = data.as_str() else {
            return self.reply(id, ServerMessage::malformed_data());
        };

        {
            let mut state = self.shared.lock();
            if state.printer.printing
                || state.printer.paused
                || state.printer.current_segment != Segment::None
            {
                drop(state);
                return self.reply(
                    id,
                    ServerMessage::DataError("Print already in progress.".to_string()),
                );
            }
            // The submitter always hears about its own print
            state.subs.subscribe(id, TopicSelector::One(Topic::Info));
            state.buffer_event(ServerMessage::PrintStarted);
            state.printer.printing = true;
            state.printer.current_segment = Segment::Starting;
        }

        tracing::info!(%id, path, "print accepted");
        let _ = self.jobs.send(JobRequest::Start {
            path: path.to_string(),
        });
    }

    fn stop_print(&self, _id: ConnectionId) {
        let active = {
            let mut state = self.shared.lock();
            let active = state.printer.printing
                || state.printer.paused
                || state.printer.current_segment != Segment::None;
            if active {
                state.buffer_event(ServerMessage::PrintStopped);
                state.reset_job_state();
            }
            active
        };
        if active {
            tracing::info!("print stopped by client");
            let _ = self.jobs.send(JobRequest::Stop);
        }
    }

    fn pause_print(&self, _id: ConnectionId) {
        let proceed = {
            let mut state = self.shared.lock();
            let proceed = state.printer.printing && !state.printer.paused;
            if proceed {
                state.printer.paused = true;
                state.buffer_event(ServerMessage::PrintPaused);
            }
            proceed
        };
        if proceed {
            let _ = self.jobs.send(JobRequest::Pause);
        }
    }

    fn resume_print(&self, _id: ConnectionId) {
        let proceed = {
            let mut state = self.shared.lock();
            let proceed = state.printer.paused;
            if proceed {
                state.printer.paused = false;
                state.buffer_event(ServerMessage::PrintResumed);
            }
            proceed
        };
        if proceed {
            let _ = self.jobs.send(JobRequest::Resume);
        }
    }

    fn run_routine(&self, id: ConnectionId, data: &Value) {
        let Some(name) = data.as_str() else {
            return self.reply(id, ServerMessage::malformed_data());
        };

        let commands = self.shared.lock().routines.get(name).cloned();
        match commands {
            Some(commands) => self.pipeline.submit(commands),
            None => self.reply(id, ServerMessage::unknown_routine()),
        }
    }

    fn update_routines(&self, id: ConnectionId, data: &Value) {
        // Validate the whole update before touching the table: the call
        // either fully applies or fully rejects.
        let Some(entries) = data.as_map() else {
            return self.reply(id, ServerMessage::malformed_data());
        };

        let mut update = HashMap::with_capacity(entries.len());
        for (name, commands) in entries {
            let (Some(name), Some(commands)) = (name.as_str(), as_string_list(commands)) else {
                return self.reply(id, ServerMessage::malformed_data());
            };
            update.insert(name.to_string(), commands);
        }

        self.shared.lock().routines.extend(update);
    }

    fn subscribe(&self, id: ConnectionId, data: &Value, join: bool) {
        let Some(kind) = type_field(data) else {
            return self.reply(id, ServerMessage::malformed_data());
        };
        let Some(selector) = TopicSelector::parse(kind) else {
            return self.reply(id, ServerMessage::invalid_subscription());
        };

        let mut state = self.shared.lock();
        if join {
            state.subs.subscribe(id, selector);
        } else {
            state.subs.unsubscribe(id, selector);
        }
    }

    /// One broadcast tick: snapshot under the lock, deliver after it
    ///
    /// Delivery order per tick is temperature → info(+events) → raw, for
    /// every subscriber present at snapshot time. A liveness loss appends
    /// `disconnected` to this tick's events and then stops the server.
    pub fn broadcast_tick(&self) {
        let (temps, snapshot, mut events, raw_lines, temp_subs, info_subs, raw_subs, ok) = {
            let mut state = self.shared.lock();
            (
                state.printer.temperatures.clone(),
                InfoSnapshot {
                    current_line: state.printer.current_line,
                    printing: state.printer.printing,
                    paused: state.printer.paused,
                    machine_info: state.printer.machine_info.clone(),
                    current_segment: state.printer.current_segment,
                },
                state.events.drain(..).collect::<Vec<_>>(),
                state.raw_lines.drain(..).collect::<Vec<_>>(),
                state.subs.members(Topic::Temperature),
                state.subs.members(Topic::Info),
                state.subs.members(Topic::Raw),
                state.printer.ok,
            )
        };

        if !ok {
            tracing::error!("device disconnected");
            events.push(ServerMessage::Disconnected);
        }

        for &id in &temp_subs {
            self.outbound.enqueue(id, ServerMessage::Temperature(temps.clone()));
        }
        for &id in &info_subs {
            self.outbound.enqueue(id, ServerMessage::Info(snapshot.clone()));
            for event in &events {
                self.outbound.enqueue(id, event.clone());
            }
        }
        for &id in &raw_subs {
            for line in &raw_lines {
                self.outbound.enqueue(id, ServerMessage::Raw(line.clone()));
            }
        }

        if !ok {
            // Fail fast: no reconnection attempts, stop the whole daemon
            self.shutdown.send_replace(true);
        }
    }

    /// Broadcast loop: one tick per period until shutdown
    pub async fn broadcast_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.broadcast_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            self.broadcast_tick();
        }
        tracing::debug!("broadcast loop stopped");
    }

    /// Telemetry loop: identification batch once, then the periodic poll
    pub async fn telemetry_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();

        // Let the transport settle before asking the firmware who it is
        tokio::select! {
            _ = tokio::time::sleep(self.config.identify_delay) => {}
            _ = shutdown.changed() => return,
        }
        self.pipeline
            .submit_control(vec!["M115".to_string(), "M114".to_string()]);

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            self.pipeline.submit_control(vec!["M105".to_string()]);

            let mut state = self.shared.lock();
            state.printer.ok = self.pipeline.is_ok();
            if state.printer.printing || state.printer.paused {
                state.printer.current_line = Some(self.pipeline.stream_cursor());
            } else {
                state.printer.current_line = None;
            }
        }
        tracing::debug!("telemetry loop stopped");
    }

    /// Device output loop: parse and buffer every received line
    pub async fn line_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut lines = self.link.lines();
        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Ok(line) => self.ingest_line(&line),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "device output receiver lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("line loop stopped");
    }

    /// Merge one raw device line into state and the raw buffer
    pub fn ingest_line(&self, line: &str) {
        let readings = parse_temperatures(line);
        let identity = parse_machine_identity(line);

        let mut state = self.shared.lock();
        state.buffer_raw_line(line.to_string());
        if !readings.is_empty() {
            state.printer.merge_temperatures(readings);
        }
        if let Some(facts) = identity {
            state.printer.merge_machine_info(facts);
        }
    }
}

/// Interpret a data value as a list of command strings
fn as_string_list(data: &Value) -> Option<Vec<String>> {
    data.as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Extract the `type` field of a subscribe/unsubscribe payload
fn type_field(data: &Value) -> Option<&str> {
    data.as_map()?
        .iter()
        .find(|(k, _)| k.as_str() == Some("type"))
        .and_then(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::new_shared;
    use fabrikd_device::pipeline::PipelineConfig;
    use fabrikd_device::sim::{SimConfig, SimLink};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<(ConnectionId, ServerMessage)>>,
    }

    impl RecordingSink {
        fn for_conn(&self, id: ConnectionId) -> Vec<ServerMessage> {
            self.messages
                .lock()
                .iter()
                .filter(|(to, _)| *to == id)
                .map(|(_, msg)| msg.clone())
                .collect()
        }

        fn actions_for(&self, id: ConnectionId) -> Vec<&'static str> {
            self.for_conn(id).iter().map(|m| m.action()).collect()
        }

        fn clear(&self) {
            self.messages.lock().clear();
        }
    }

    impl Outbound for RecordingSink {
        fn enqueue(&self, id: ConnectionId, msg: ServerMessage) {
            self.messages.lock().push((id, msg));
        }
    }

    struct Fixture {
        controller: Controller,
        sink: Arc<RecordingSink>,
        shared: crate::shared::Shared,
        jobs: mpsc::UnboundedReceiver<JobRequest>,
        shutdown: Arc<watch::Sender<bool>>,
    }

    fn fixture() -> Fixture {
        let link = Arc::new(SimLink::new(SimConfig::default()));
        let shared = new_shared(link.family().default_machine_info());
        let (pipeline, _events) = fabrikd_device::pipeline::CommandPipeline::new(
            link.clone(),
            PipelineConfig::default(),
        );
        let (jobs_tx, jobs) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink::default());
        let shutdown = Arc::new(watch::channel(false).0);
        let controller = Controller::new(
            shared.clone(),
            sink.clone(),
            pipeline,
            jobs_tx,
            link,
            ControllerConfig::default(),
            shutdown.clone(),
        );
        Fixture {
            controller,
            sink,
            shared,
            jobs,
            shutdown,
        }
    }

    fn request(action: ClientAction, data: Value) -> InboundFrame {
        InboundFrame::Request { action, data }
    }

    fn type_payload(kind: &str) -> Value {
        Value::Map(vec![(Value::from("type"), Value::from(kind))])
    }

    const CLIENT: ConnectionId = ConnectionId(1);

    #[test]
    fn test_subscribe_is_idempotent_through_dispatch() {
        let fx = fixture();
        for _ in 0..3 {
            fx.controller
                .dispatch(CLIENT, request(ClientAction::Subscribe, type_payload("info")));
        }
        let state = fx.shared.lock();
        assert_eq!(state.subs.members(Topic::Info).len(), 1);
        assert!(fx.sink.for_conn(CLIENT).is_empty());
    }

    #[test]
    fn test_bogus_subscription_type_is_rejected_without_mutation() {
        let fx = fixture();
        fx.controller
            .dispatch(CLIENT, request(ClientAction::Subscribe, type_payload("bogus")));

        match fx.sink.for_conn(CLIENT).as_slice() {
            [ServerMessage::DataError(msg)] => assert_eq!(msg, "Invalid subscription type."),
            other => panic!("unexpected replies: {:?}", other),
        }
        assert!(fx.shared.lock().subs.is_empty());
    }

    #[test]
    fn test_subscription_without_type_field_is_malformed() {
        let fx = fixture();
        fx.controller
            .dispatch(CLIENT, request(ClientAction::Subscribe, Value::from(3)));

        match fx.sink.for_conn(CLIENT).as_slice() {
            [ServerMessage::DataError(msg)] => assert_eq!(msg, "Malformed data."),
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_action_and_malformed_frame_replies() {
        let fx = fixture();
        fx.controller.dispatch(
            CLIENT,
            InboundFrame::UnknownAction {
                action: "reboot".to_string(),
            },
        );
        fx.controller.dispatch(CLIENT, InboundFrame::Malformed);
        assert_eq!(fx.sink.actions_for(CLIENT), vec!["action_error", "data_error"]);
    }

    #[test]
    fn test_update_routines_applies_fully() {
        let fx = fixture();
        let data = Value::Map(vec![
            (
                Value::from("start_print"),
                Value::Array(vec![Value::from("G28"), Value::from("M109 S210")]),
            ),
            (
                Value::from("end_print"),
                Value::Array(vec![Value::from("M104 S0")]),
            ),
        ]);
        fx.controller
            .dispatch(CLIENT, request(ClientAction::UpdateRoutines, data));

        let state = fx.shared.lock();
        assert_eq!(state.routines["start_print"], vec!["G28", "M109 S210"]);
        assert_eq!(state.routines["end_print"], vec!["M104 S0"]);
        assert!(fx.sink.for_conn(CLIENT).is_empty());
    }

    #[test]
    fn test_update_routines_rejects_fully_on_any_bad_value() {
        let fx = fixture();
        // Seed an existing routine that must survive untouched
        fx.shared
            .lock()
            .routines
            .insert("end_print".to_string(), vec!["M104 S0".to_string()]);

        let data = Value::Map(vec![
            (
                Value::from("start_print"),
                Value::Array(vec![Value::from("G28")]),
            ),
            (Value::from("end_print"), Value::from("not a list")),
        ]);
        fx.controller
            .dispatch(CLIENT, request(ClientAction::UpdateRoutines, data));

        match fx.sink.for_conn(CLIENT).as_slice() {
            [ServerMessage::DataError(msg)] => assert_eq!(msg, "Malformed data."),
            other => panic!("unexpected replies: {:?}", other),
        }
        let state = fx.shared.lock();
        assert!(!state.routines.contains_key("start_print"));
        assert_eq!(state.routines["end_print"], vec!["M104 S0"]);
    }

    #[test]
    fn test_pause_while_not_printing_is_a_no_op() {
        let mut fx = fixture();
        fx.controller
            .dispatch(CLIENT, request(ClientAction::PausePrint, Value::from("")));

        assert!(fx.jobs.try_recv().is_err());
        let state = fx.shared.lock();
        assert!(!state.printer.paused);
        assert!(state.events.is_empty());
    }

    #[test]
    fn test_pause_and_resume_guards() {
        let mut fx = fixture();
        fx.shared.lock().printer.printing = true;

        fx.controller
            .dispatch(CLIENT, request(ClientAction::PausePrint, Value::from("")));
        assert_eq!(fx.jobs.try_recv().unwrap(), JobRequest::Pause);
        assert!(fx.shared.lock().printer.paused);

        // Second pause while already paused: no-op
        fx.controller
            .dispatch(CLIENT, request(ClientAction::PausePrint, Value::from("")));
        assert!(fx.jobs.try_recv().is_err());

        fx.controller
            .dispatch(CLIENT, request(ClientAction::ResumePrint, Value::from("")));
        assert_eq!(fx.jobs.try_recv().unwrap(), JobRequest::Resume);
        assert!(!fx.shared.lock().printer.paused);

        // Resume while not paused: no-op
        fx.controller
            .dispatch(CLIENT, request(ClientAction::ResumePrint, Value::from("")));
        assert!(fx.jobs.try_recv().is_err());

        let events: Vec<_> = fx.shared.lock().events.iter().map(|e| e.action()).collect();
        assert_eq!(events, vec!["print_paused", "print_resumed"]);
    }

    #[test]
    fn test_print_file_subscribes_caller_and_starts_job() {
        let mut fx = fixture();
        fx.controller.dispatch(
            CLIENT,
            request(ClientAction::PrintFile, Value::from("/tmp/cube.gcode")),
        );

        assert_eq!(
            fx.jobs.try_recv().unwrap(),
            JobRequest::Start {
                path: "/tmp/cube.gcode".to_string()
            }
        );
        let state = fx.shared.lock();
        assert!(state.subs.is_member(CLIENT, Topic::Info));
        assert!(state.printer.printing);
        assert_eq!(state.printer.current_segment, Segment::Starting);
        assert_eq!(state.events.front().unwrap().action(), "print_started");
    }

    #[test]
    fn test_second_print_file_is_rejected() {
        let mut fx = fixture();
        fx.controller.dispatch(
            CLIENT,
            request(ClientAction::PrintFile, Value::from("/tmp/a.gcode")),
        );
        fx.jobs.try_recv().unwrap();

        fx.controller.dispatch(
            CLIENT,
            request(ClientAction::PrintFile, Value::from("/tmp/b.gcode")),
        );
        assert!(fx.jobs.try_recv().is_err());
        match fx.sink.for_conn(CLIENT).as_slice() {
            [ServerMessage::DataError(msg)] => assert_eq!(msg, "Print already in progress."),
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn test_stop_without_active_job_is_a_no_op() {
        let mut fx = fixture();
        fx.controller
            .dispatch(CLIENT, request(ClientAction::StopPrint, Value::from("")));
        assert!(fx.jobs.try_recv().is_err());
        assert!(fx.shared.lock().events.is_empty());
    }

    #[test]
    fn test_run_routine_unknown_name_replies_routine_error() {
        let fx = fixture();
        fx.controller
            .dispatch(CLIENT, request(ClientAction::RunRoutine, Value::from("warmup")));

        match fx.sink.for_conn(CLIENT).as_slice() {
            [ServerMessage::RoutineError(msg)] => assert_eq!(msg, "routine not defined"),
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn test_machine_info_reply_carries_identity() {
        let fx = fixture();
        fx.controller
            .dispatch(CLIENT, request(ClientAction::MachineInfo, Value::from("")));

        match fx.sink.for_conn(CLIENT).as_slice() {
            [ServerMessage::MachineInfo(info)] => {
                assert_eq!(info["type"].as_str(), Some("Sim"));
            }
            other => panic!("unexpected replies: {:?}", other),
        }
    }

    #[test]
    fn test_send_commands_requires_a_list() {
        let fx = fixture();
        fx.controller.dispatch(
            CLIENT,
            request(ClientAction::SendCommands, Value::from("G28")),
        );
        match fx.sink.for_conn(CLIENT).as_slice() {
            [ServerMessage::DataError(msg)] => assert_eq!(msg, "Malformed data."),
            other => panic!("unexpected replies: {:?}", other),
        }

        fx.sink.clear();
        fx.controller.dispatch(
            CLIENT,
            request(
                ClientAction::SendCommands,
                Value::Array(vec![Value::from("G28"), Value::from(12)]),
            ),
        );
        assert_eq!(fx.sink.actions_for(CLIENT), vec!["data_error"]);
    }

    #[test]
    fn test_broadcast_tick_orders_temperature_info_raw() {
        let fx = fixture();
        {
            let mut state = fx.shared.lock();
            state.subs.subscribe(CLIENT, TopicSelector::All);
            state.printer.merge_temperatures(
                [("t".to_string(), 210.0)].into_iter().collect(),
            );
            state.buffer_event(ServerMessage::PrintStarted);
            state.buffer_raw_line("ok".to_string());
            state.buffer_raw_line("echo: busy".to_string());
        }

        fx.controller.broadcast_tick();
        assert_eq!(
            fx.sink.actions_for(CLIENT),
            vec!["temperature", "info", "print_started", "raw", "raw"]
        );

        // Buffers drained: the next tick repeats only the periodic messages
        fx.sink.clear();
        fx.controller.broadcast_tick();
        assert_eq!(fx.sink.actions_for(CLIENT), vec!["temperature", "info"]);
    }

    #[test]
    fn test_info_snapshot_reflects_printer_state() {
        let fx = fixture();
        {
            let mut state = fx.shared.lock();
            state.subs.subscribe(CLIENT, TopicSelector::One(Topic::Info));
            state.printer.printing = true;
            state.printer.current_line = Some(5);
            state.printer.current_segment = Segment::Printing;
        }

        fx.controller.broadcast_tick();
        match fx.sink.for_conn(CLIENT).as_slice() {
            [ServerMessage::Info(snapshot)] => {
                assert_eq!(snapshot.current_line, Some(5));
                assert!(snapshot.printing);
                assert!(!snapshot.paused);
                assert_eq!(snapshot.current_segment, Segment::Printing);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn test_ingest_line_merges_state_and_buffers_raw() {
        let fx = fixture();
        fx.controller.ingest_line("ok T:210.4 B:60.1");
        fx.controller.ingest_line(
            "FIRMWARE_NAME:Sailfish v7.7; MACHINE_TYPE:Replicator2 EXTRUDER_COUNT:2",
        );

        let state = fx.shared.lock();
        assert_eq!(state.printer.temperatures["t"], 210.4);
        assert_eq!(state.printer.temperatures["b"], 60.1);
        assert_eq!(
            state.printer.machine_info["machine_type"].as_str(),
            Some("Replicator2")
        );
        // Family defaults survive the merge
        assert_eq!(state.printer.machine_info["type"].as_str(), Some("Sim"));
        assert_eq!(state.raw_lines.len(), 2);
    }

    #[test]
    fn test_liveness_loss_broadcasts_disconnected_then_stops() {
        let fx = fixture();
        {
            let mut state = fx.shared.lock();
            state.subs.subscribe(CLIENT, TopicSelector::One(Topic::Info));
            state.printer.ok = false;
        }

        fx.controller.broadcast_tick();
        assert_eq!(fx.sink.actions_for(CLIENT), vec!["info", "disconnected"]);
        assert!(*fx.shutdown.borrow());
    }
}
