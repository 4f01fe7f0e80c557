//! Device transport seam
//!
//! One trait, one variant implementation per device family. The rest of the
//! daemon depends only on [`DeviceLink`]; nothing above this line knows
//! whether lines go to a serial driver, a subprocess bridge, or a mock.

use async_trait::async_trait;
use fabrikd_core::state::MachineInfo;
use rmpv::Value;
use tokio::sync::broadcast;

/// Outcome of one send attempt
///
/// Explicit result, never exception-driven control flow: the pipeline acts
/// on the variant, the link never panics or returns `Err` for device-side
/// conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The device accepted the line
    Ok,
    /// A recoverable condition; retry the same line after backoff
    Transient(String),
    /// An unrecoverable condition; abandon the current print job
    Fatal(String),
}

/// Classification of a device-reported error condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry the same command after a fixed backoff
    Transient,
    /// Abandon the in-flight print, clear the queue
    Fatal,
}

/// Supported device families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceFamily {
    /// Simulated device (tests, bench runs)
    #[default]
    Sim,
    /// RepRap-style firmware behind a serial bridge
    Reprap,
    /// MakerBot-style firmware behind an x3g bridge
    Makerbot,
}

impl DeviceFamily {
    /// Parse a configuration value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sim" => Some(Self::Sim),
            "reprap" => Some(Self::Reprap),
            "makerbot" => Some(Self::Makerbot),
            _ => None,
        }
    }

    /// Family name as used in configuration and machine identity
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sim => "sim",
            Self::Reprap => "reprap",
            Self::Makerbot => "makerbot",
        }
    }

    /// Machine identity defaults reported before the firmware answers `M115`
    pub fn default_machine_info(&self) -> MachineInfo {
        let mut info = MachineInfo::new();
        let type_name = match self {
            Self::Sim => "Sim",
            Self::Reprap => "RepRap",
            Self::Makerbot => "MakerBot",
        };
        info.insert("type".to_string(), Value::from(type_name));
        info.insert("model".to_string(), Value::from("Unknown"));
        if matches!(self, Self::Makerbot) {
            info.insert("uuid".to_string(), Value::Nil);
        }
        info
    }

    /// Classify a device-reported error condition
    ///
    /// Each family names its fatal conditions explicitly; anything it does
    /// not name is transient-with-backoff. Fatal for every family: the
    /// device cancelled the build itself, or refuses commands because a
    /// build is already active.
    pub fn classify(&self, reason: &str) -> ErrorClass {
        let fatal_markers: &[&str] = match self {
            Self::Sim => &["build cancelled", "active build"],
            Self::Reprap => &["kill() called", "printer stopped"],
            Self::Makerbot => &["build cancelled", "active build", "bot is building"],
        };

        let lowered = reason.to_ascii_lowercase();
        if fatal_markers.iter().any(|m| lowered.contains(m)) {
            ErrorClass::Fatal
        } else {
            ErrorClass::Transient
        }
    }
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The interface a device transport presents to the daemon
///
/// `send_line` resolves once the device has acknowledged or rejected the
/// line; concurrent callers are serialized by the pipeline, never by the
/// link. Received lines fan out on a broadcast channel so the controller's
/// parser and any diagnostics can listen independently.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Issue one command line to the device
    async fn send_line(&self, line: &str) -> SendOutcome;

    /// Subscribe to decoded device output lines
    fn lines(&self) -> broadcast::Receiver<String>;

    /// Whether the transport is currently believed reachable
    fn is_ok(&self) -> bool;

    /// The device family behind this link
    fn family(&self) -> DeviceFamily;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_parse() {
        assert_eq!(DeviceFamily::parse("sim"), Some(DeviceFamily::Sim));
        assert_eq!(DeviceFamily::parse("makerbot"), Some(DeviceFamily::Makerbot));
        assert_eq!(DeviceFamily::parse("prusa"), None);
    }

    #[test]
    fn test_default_identity_is_seeded() {
        let info = DeviceFamily::Makerbot.default_machine_info();
        assert_eq!(info["type"].as_str(), Some("MakerBot"));
        assert_eq!(info["model"].as_str(), Some("Unknown"));
        assert!(info["uuid"].is_nil());

        let info = DeviceFamily::Reprap.default_machine_info();
        assert!(!info.contains_key("uuid"));
    }

    #[test]
    fn test_fatal_classification_is_per_family() {
        assert_eq!(
            DeviceFamily::Makerbot.classify("Build cancelled by device"),
            ErrorClass::Fatal
        );
        assert_eq!(
            DeviceFamily::Makerbot.classify("active build conflict"),
            ErrorClass::Fatal
        );
        // Unnamed conditions default to transient-with-backoff
        assert_eq!(
            DeviceFamily::Makerbot.classify("checksum mismatch, resend"),
            ErrorClass::Transient
        );
        assert_eq!(
            DeviceFamily::Sim.classify("buffer full"),
            ErrorClass::Transient
        );
    }
}
