//! Simulated device family
//!
//! A loopback [`DeviceLink`] that acknowledges commands, answers the
//! standard query commands with canned reports, and can be scripted to fail
//! sends or drop liveness. The daemon's `sim` device family runs on it; the
//! pipeline, controller, and server tests drive it everywhere a real
//! transport would sit.

use crate::link::{DeviceFamily, DeviceLink, SendOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// Simulated device tuning
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Family identity the sim reports (classification follows it)
    pub family: DeviceFamily,
    /// Artificial acknowledgment latency per line
    pub ack_delay: Duration,
    /// Answer `M105`/`M115`/`M114` with canned reports
    pub auto_respond: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            family: DeviceFamily::Sim,
            ack_delay: Duration::ZERO,
            auto_respond: true,
        }
    }
}

#[derive(Default)]
struct SimState {
    scripted: VecDeque<SendOutcome>,
    sent: Vec<String>,
}

/// Scriptable loopback device link
pub struct SimLink {
    config: SimConfig,
    lines_tx: broadcast::Sender<String>,
    ok: AtomicBool,
    state: Mutex<SimState>,
}

impl SimLink {
    /// Create a sim link
    pub fn new(config: SimConfig) -> Self {
        let (lines_tx, _) = broadcast::channel(256);
        Self {
            config,
            lines_tx,
            ok: AtomicBool::new(true),
            state: Mutex::new(SimState::default()),
        }
    }

    /// Script the next send to fail with `reason`
    ///
    /// The outcome variant follows the family's classification list, so a
    /// scripted "build cancelled" comes back fatal and a scripted "buffer
    /// full" transient, exactly as a real link would report them.
    pub fn fail_next(&self, reason: &str) {
        self.fail_next_times(reason, 1);
    }

    /// Script the next `times` sends to fail with `reason`
    pub fn fail_next_times(&self, reason: &str, times: usize) {
        let outcome = match self.config.family.classify(reason) {
            crate::link::ErrorClass::Transient => SendOutcome::Transient(reason.to_string()),
            crate::link::ErrorClass::Fatal => SendOutcome::Fatal(reason.to_string()),
        };
        let mut state = self.state.lock();
        for _ in 0..times {
            state.scripted.push_back(outcome.clone());
        }
    }

    /// Flip the liveness flag
    pub fn set_ok(&self, ok: bool) {
        self.ok.store(ok, Ordering::Relaxed);
    }

    /// Every line acknowledged so far, in send order
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Emit an arbitrary device output line
    pub fn inject_line(&self, line: &str) {
        let _ = self.lines_tx.send(line.to_string());
    }

    fn auto_respond(&self, line: &str) {
        let response = match line.split_whitespace().next() {
            Some("M105") => "ok T:210.0 /210.0 B:60.0 /60.0",
            Some("M115") => {
                "FIRMWARE_NAME:FabrikSim 1.0; MACHINE_TYPE:SimBot EXTRUDER_COUNT:1 \
                 UUID:00000000-0000-4000-8000-000000000001"
            }
            Some("M114") => "X:0.00 Y:0.00 Z:0.00 E:0.00",
            _ => "ok",
        };
        let _ = self.lines_tx.send(response.to_string());
    }
}

#[async_trait]
impl DeviceLink for SimLink {
    async fn send_line(&self, line: &str) -> SendOutcome {
        if !self.ok.load(Ordering::Relaxed) {
            return SendOutcome::Transient("device unreachable".to_string());
        }
        if !self.config.ack_delay.is_zero() {
            tokio::time::sleep(self.config.ack_delay).await;
        }

        if let Some(outcome) = self.state.lock().scripted.pop_front() {
            return outcome;
        }

        self.state.lock().sent.push(line.to_string());
        if self.config.auto_respond {
            self.auto_respond(line);
        }
        SendOutcome::Ok
    }

    fn lines(&self) -> broadcast::Receiver<String> {
        self.lines_tx.subscribe()
    }

    fn is_ok(&self) -> bool {
        self.ok.load(Ordering::Relaxed)
    }

    fn family(&self) -> DeviceFamily {
        self.config.family
    }
}
