use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{DeviceSummary, PolicyControl};

pub const AWAKE_MARKER: &str = " mWakefulness=Awake";
pub const UNKNOWN_PACKAGE_MARKER: &str = "Unknown package";

fn attached_device_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    // Only the literal "device" state counts; offline, unauthorized and recovery are unusable.
    RE.get_or_init(|| Regex::new(r"^(.*?)\s+device$").ok()).as_ref()
}

/// Devices from `adb devices` that are ready for commands.
pub fn parse_attached_devices(output: &str) -> Vec<DeviceSummary> {
    let Some(re) = attached_device_re() else {
        return Vec::new();
    };
    output
        .lines()
        .map(|line| line.trim_end_matches('\r').trim())
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let serial = caps[1].trim();
            if serial.is_empty() {
                return None;
            }
            Some(DeviceSummary {
                serial: serial.to_string(),
                state: "device".to_string(),
            })
        })
        .collect()
}

pub fn is_awake(dumpsys_power: &str) -> bool {
    dumpsys_power.contains(AWAKE_MARKER)
}

pub fn is_unknown_package(output: &str) -> bool {
    output.contains(UNKNOWN_PACKAGE_MARKER)
}

pub fn is_frame_ready(line: &str, marker: &str) -> bool {
    line.trim_end_matches(['\r', '\n']).ends_with(marker)
}

/// `settings get` prints `null` for keys that were never written.
pub fn parse_settings_value(output: &str) -> PolicyControl {
    match output.lines().map(str::trim).find(|line| !line.is_empty()) {
        None | Some("null") => PolicyControl::Unset,
        Some(value) => PolicyControl::Value(value.to_string()),
    }
}
