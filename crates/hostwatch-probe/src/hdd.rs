use crate::tool::{run_tool, TOOL_TIMEOUT};
use hostwatch_common::types::{HddDrive, HddMetrics};

pub fn collect() -> HddMetrics {
    let mut drives = Vec::new();
    for device in block_devices() {
        drives.push(query_smart(&device));
    }
    HddMetrics { drives }
}

fn query_smart(device: &str) -> HddDrive {
    let mut drive = HddDrive {
        name: device.to_string(),
        temperature_c: 0.0,
        power_on_hours: 0,
        health_status: "Unknown".to_string(),
    };
    let Some(output) = run_tool("smartctl", &["-A", "-H", device], TOOL_TIMEOUT) else {
        return drive;
    };
    parse_smartctl(&output, &mut drive);
    drive
}

fn parse_smartctl(output: &str, drive: &mut HddDrive) {
    for line in output.lines() {
        if line.contains("Temperature_Celsius") || line.contains("Temperature Sensor") {
            if let Some(value) = last_number(line) {
                drive.temperature_c = value;
            }
        } else if line.contains("Power_On_Hours") {
            if let Some(value) = last_number(line) {
                drive.power_on_hours = value as u64;
            }
        }
    }
    drive.health_status = if output.contains("PASSED") {
        "PASSED"
    } else if output.contains("FAILED") {
        "FAILED"
    } else if output.contains("OK") {
        "OK"
    } else {
        "Unknown"
    }
    .to_string();
}

/// SMART attribute rows end in the raw value, sometimes with trailing
/// annotations; take the last numeric token.
fn last_number(line: &str) -> Option<f64> {
    line.split_whitespace()
        .rev()
        .find_map(|token| token.parse::<f64>().ok())
}

#[cfg(target_os = "linux")]
fn block_devices() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    let mut devices: Vec<String> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            (name.starts_with("sd") && name.len() == 3)
                || (name.starts_with("nvme")
                    && name.contains('n')
                    && name.ends_with(|c: char| c.is_ascii_digit())
                    && !name.contains('p'))
        })
        .map(|name| format!("/dev/{name}"))
        .collect();
    devices.sort();
    devices
}

#[cfg(windows)]
fn block_devices() -> Vec<String> {
    let Some(output) = run_tool(
        "wmic",
        &["diskdrive", "get", "DeviceID", "/format:list"],
        TOOL_TIMEOUT,
    ) else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| line.strip_prefix("DeviceID="))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

#[cfg(not(any(target_os = "linux", windows)))]
fn block_devices() -> Vec<String> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sata_smart_attributes() {
        let output = "\
SMART overall-health self-assessment test result: PASSED
  9 Power_On_Hours          0x0032   099   099   000    Old_age   Always       -       12345
194 Temperature_Celsius     0x0022   036   052   000    Old_age   Always       -       36 (Min/Max 20/52)";
        let mut drive = HddDrive {
            name: "/dev/sda".into(),
            temperature_c: 0.0,
            power_on_hours: 0,
            health_status: "Unknown".into(),
        };
        parse_smartctl(output, &mut drive);
        assert_eq!(drive.health_status, "PASSED");
        assert_eq!(drive.power_on_hours, 12345);
        assert_eq!(drive.temperature_c, 36.0);
    }

    #[test]
    fn failed_health_is_reported() {
        let mut drive = HddDrive {
            name: "/dev/sdb".into(),
            temperature_c: 0.0,
            power_on_hours: 0,
            health_status: "Unknown".into(),
        };
        parse_smartctl(
            "SMART overall-health self-assessment test result: FAILED!",
            &mut drive,
        );
        assert_eq!(drive.health_status, "FAILED");
    }

    #[test]
    fn unreadable_devices_degrade_to_unknown() {
        let drive = query_smart("/dev/hostwatch-does-not-exist");
        assert_eq!(drive.health_status, "Unknown");
        assert_eq!(drive.power_on_hours, 0);
    }

    #[test]
    fn last_number_skips_trailing_annotations() {
        assert_eq!(last_number("a b 36 (Min/Max 20/52)"), Some(36.0));
        assert_eq!(last_number("Temperature Sensor 1: 35"), Some(35.0));
        assert_eq!(last_number("no numbers here"), None);
    }
}
