//! Device output line parsing
//!
//! Extracts temperature readings and firmware-identification facts out of
//! raw device output. Both RepRap-style reports (`ok T:210.4 /210.0 B:60.1`)
//! and bridge-style reports (`T0 temperature: 210c`) are understood; sensor
//! ids are normalized to lowercase.

use fabrikd_core::state::{MachineInfo, Temperatures};
use rmpv::Value;

/// Whether a token names a temperature sensor (`T`, `T0`, `B`, `B1`, ...)
fn is_sensor_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some('T' | 'B')) && chars.all(|c| c.is_ascii_digit())
}

/// Parse every temperature reading present in a device output line
///
/// Unknown tokens are skipped; a line with no readings yields an empty map.
pub fn parse_temperatures(line: &str) -> Temperatures {
    let mut readings = Temperatures::new();

    // RepRap style: whitespace-separated `SENSOR:VALUE` tokens
    for token in line.split_whitespace() {
        if let Some((name, value)) = token.split_once(':') {
            if is_sensor_name(name) {
                if let Ok(value) = value.parse::<f64>() {
                    readings.insert(name.to_ascii_lowercase(), value);
                }
            }
        }
    }

    // Bridge style: `SENSOR temperature: VALUEc`
    let mut rest = line;
    while let Some(pos) = rest.find(" temperature: ") {
        let (head, tail) = rest.split_at(pos);
        let tail = &tail[" temperature: ".len()..];

        if let Some(name) = head.split_whitespace().last().filter(|n| is_sensor_name(n)) {
            let raw = tail
                .split_whitespace()
                .next()
                .unwrap_or("")
                .trim_end_matches(['c', 'C']);
            if let Ok(value) = raw.parse::<f64>() {
                readings.insert(name.to_ascii_lowercase(), value);
            }
        }
        rest = tail;
    }

    readings
}

/// Extract the value following `marker`, terminated by any of `stops`
fn field_after<'a>(line: &'a str, marker: &str, stops: &[char]) -> Option<&'a str> {
    let start = line.find(marker)? + marker.len();
    let rest = &line[start..];
    let end = rest.find(|c| stops.contains(&c)).unwrap_or(rest.len());
    let value = rest[..end].trim();
    (!value.is_empty()).then_some(value)
}

/// Whether `s` has the canonical 8-4-4-4-12 hex UUID shape
fn is_uuid(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 5
        && parts
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(p, len)| p.len() == len && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Parse a firmware-identification line (the `M115` reply)
///
/// Returns `None` for lines that are not identification reports. Fields the
/// firmware omits are simply absent from the result; `uuid` is always
/// present, `Nil` when unreported.
pub fn parse_machine_identity(line: &str) -> Option<MachineInfo> {
    if !line.contains("FIRMWARE") {
        return None;
    }

    let mut facts = MachineInfo::new();

    if let Some(name) = field_after(line, "FIRMWARE_NAME:", &[';']) {
        facts.insert("firmware_name".to_string(), Value::from(name));
    }
    if let Some(machine) = field_after(line, "MACHINE_TYPE:", &[' ', ';']) {
        facts.insert("machine_type".to_string(), Value::from(machine));
    }
    if let Some(count) = field_after(line, "EXTRUDER_COUNT:", &[' ', ';']) {
        if let Ok(count) = count.parse::<u64>() {
            facts.insert("extruder_count".to_string(), Value::from(count));
        }
    }

    let uuid = field_after(line, "UUID:", &[' ', ';'])
        .map(|u| u.to_ascii_lowercase())
        .filter(|u| is_uuid(u));
    facts.insert(
        "uuid".to_string(),
        uuid.map(Value::from).unwrap_or(Value::Nil),
    );

    if facts.len() == 1 {
        // Nothing but the placeholder uuid: not an identification report
        return None;
    }
    Some(facts)
}
