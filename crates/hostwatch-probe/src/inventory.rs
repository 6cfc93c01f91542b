//! One-shot hardware and OS facts. Sampled like any other family but
//! effectively static for the life of the host.

use crate::gpu;
use crate::tool::{run_tool, TOOL_TIMEOUT};
use hostwatch_common::types::InventoryInfo;
use sysinfo::{CpuRefreshKind, Networks, RefreshKind, System};

const HYPERVISOR_SIGNATURES: [&str; 11] = [
    "vmware",
    "virtualbox",
    "kvm",
    "qemu",
    "xen",
    "hyper-v",
    "virtual machine",
    "parallels",
    "bochs",
    "bhyve",
    "ovirt",
];

const MAX_SOFTWARE_ENTRIES: usize = 500;

/// "virtual" when any known hypervisor signature shows up in the platform
/// identity strings, else "physical".
pub fn machine_type() -> String {
    let virtualized = platform_strings().iter().any(|value| {
        let value = value.to_lowercase();
        HYPERVISOR_SIGNATURES.iter().any(|sig| value.contains(sig))
    });
    if virtualized { "virtual" } else { "physical" }.to_string()
}

pub fn collect() -> InventoryInfo {
    let refresh = RefreshKind::nothing().with_cpu(CpuRefreshKind::everything());
    let sys = System::new_with_specifics(refresh);

    let (cpu_model, cpu_frequency) = match sys.cpus().first() {
        Some(cpu) => (
            cpu.brand().trim().to_string(),
            format!("{} MHz", cpu.frequency()),
        ),
        None => (String::new(), String::new()),
    };

    let (disk_model, disk_type, disk_total_bytes) = primary_disk();
    let (mac_addresses, ip_addresses) = addresses();

    InventoryInfo {
        device_type: device_type(),
        manufacturer: identity("sys_vendor", "Manufacturer"),
        model: identity("product_name", "Model"),
        serial_number: identity("product_serial", "IdentifyingNumber"),
        uuid: identity("product_uuid", "UUID"),
        os_name: System::name().unwrap_or_default(),
        os_version: System::os_version().unwrap_or_default(),
        cpu_model,
        cpu_frequency,
        memory_type: memory_type(),
        disk_model,
        disk_type,
        disk_total_bytes,
        gpu_model: gpu::model_name(),
        mac_addresses,
        ip_addresses,
        installed_software: installed_software(),
    }
}

/// MAC and IP address lists for the non-loopback interfaces.
pub fn addresses() -> (Vec<String>, Vec<String>) {
    let networks = Networks::new_with_refreshed_list();
    let mut macs = Vec::new();
    let mut ips = Vec::new();
    for (name, data) in networks.iter() {
        if name == "lo" || name.starts_with("Loopback") {
            continue;
        }
        let mac = data.mac_address().to_string();
        if mac != "00:00:00:00:00:00" && !macs.contains(&mac) {
            macs.push(mac);
        }
        for network in data.ip_networks() {
            let ip = network.addr.to_string();
            if !ips.contains(&ip) {
                ips.push(ip);
            }
        }
    }
    (macs, ips)
}

#[cfg(target_os = "linux")]
fn dmi(name: &str) -> String {
    std::fs::read_to_string(format!("/sys/class/dmi/id/{name}"))
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

#[cfg(target_os = "linux")]
fn platform_strings() -> Vec<String> {
    vec![
        dmi("sys_vendor"),
        dmi("product_name"),
        dmi("board_vendor"),
        dmi("bios_vendor"),
    ]
}

#[cfg(target_os = "linux")]
fn identity(dmi_name: &str, _wmi_field: &str) -> String {
    dmi(dmi_name)
}

#[cfg(target_os = "linux")]
fn device_type() -> String {
    if machine_type() == "virtual" {
        return "virtual machine".to_string();
    }
    match dmi("chassis_type").parse::<u32>().unwrap_or(0) {
        3 | 4 | 6 | 7 => "desktop",
        8 | 9 | 10 | 14 | 31 => "laptop",
        17 | 23 | 25 => "server",
        _ => "unknown",
    }
    .to_string()
}

#[cfg(target_os = "linux")]
fn memory_type() -> String {
    // Module type needs DMI table access (root); leave unknown otherwise.
    run_tool("dmidecode", &["-t", "memory"], TOOL_TIMEOUT)
        .and_then(|out| {
            out.lines()
                .filter_map(|line| line.trim().strip_prefix("Type: "))
                .find(|value| *value != "Unknown" && !value.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(target_os = "linux")]
fn primary_disk() -> (String, String, u64) {
    for candidate in ["nvme0n1", "sda", "vda"] {
        let base = format!("/sys/block/{candidate}");
        if !std::path::Path::new(&base).exists() {
            continue;
        }
        let model = std::fs::read_to_string(format!("{base}/device/model"))
            .map(|value| value.trim().to_string())
            .unwrap_or_default();
        let rotational = std::fs::read_to_string(format!("{base}/queue/rotational"))
            .map(|value| value.trim() == "1")
            .unwrap_or(false);
        let sectors: u64 = std::fs::read_to_string(format!("{base}/size"))
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0);
        let kind = if candidate.starts_with("nvme") {
            "NVMe"
        } else if rotational {
            "HDD"
        } else {
            "SSD"
        };
        return (model, kind.to_string(), sectors * 512);
    }
    (String::new(), String::new(), 0)
}

#[cfg(target_os = "linux")]
fn installed_software() -> Vec<String> {
    let listed = run_tool(
        "dpkg-query",
        &["-W", "-f", "${binary:Package} ${Version}\n"],
        TOOL_TIMEOUT,
    )
    .or_else(|| run_tool("rpm", &["-qa"], TOOL_TIMEOUT));
    match listed {
        Some(output) => output
            .lines()
            .take(MAX_SOFTWARE_ENTRIES)
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}

#[cfg(windows)]
fn wmic_value(alias: &str, field: &str) -> String {
    run_tool(
        "wmic",
        &[alias, "get", field, "/format:list"],
        TOOL_TIMEOUT,
    )
    .and_then(|out| {
        out.lines()
            .find_map(|line| line.strip_prefix(&format!("{field}=")).map(str::trim).map(str::to_string))
    })
    .unwrap_or_default()
}

#[cfg(windows)]
fn platform_strings() -> Vec<String> {
    vec![
        wmic_value("computersystem", "Manufacturer"),
        wmic_value("computersystem", "Model"),
        wmic_value("bios", "Manufacturer"),
    ]
}

#[cfg(windows)]
fn identity(_dmi_name: &str, wmi_field: &str) -> String {
    wmic_value("csproduct", wmi_field)
}

#[cfg(windows)]
fn device_type() -> String {
    if machine_type() == "virtual" {
        "virtual machine".to_string()
    } else {
        "desktop".to_string()
    }
}

#[cfg(windows)]
fn memory_type() -> String {
    match wmic_value("memorychip", "SMBIOSMemoryType").parse::<u32>().unwrap_or(0) {
        20 => "DDR",
        21 => "DDR2",
        24 => "DDR3",
        26 => "DDR4",
        34 => "DDR5",
        _ => "Unknown",
    }
    .to_string()
}

#[cfg(windows)]
fn primary_disk() -> (String, String, u64) {
    let model = wmic_value("diskdrive", "Model");
    let size = wmic_value("diskdrive", "Size").parse().unwrap_or(0);
    let kind = wmic_value("diskdrive", "MediaType");
    (model, kind, size)
}

#[cfg(windows)]
fn installed_software() -> Vec<String> {
    run_tool("wmic", &["product", "get", "Name"], TOOL_TIMEOUT)
        .map(|out| {
            out.lines()
                .skip(1)
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .take(MAX_SOFTWARE_ENTRIES)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(not(any(target_os = "linux", windows)))]
fn platform_strings() -> Vec<String> {
    Vec::new()
}

#[cfg(not(any(target_os = "linux", windows)))]
fn identity(_dmi_name: &str, _wmi_field: &str) -> String {
    String::new()
}

#[cfg(not(any(target_os = "linux", windows)))]
fn device_type() -> String {
    "unknown".to_string()
}

#[cfg(not(any(target_os = "linux", windows)))]
fn memory_type() -> String {
    "Unknown".to_string()
}

#[cfg(not(any(target_os = "linux", windows)))]
fn primary_disk() -> (String, String, u64) {
    (String::new(), String::new(), 0)
}

#[cfg(not(any(target_os = "linux", windows)))]
fn installed_software() -> Vec<String> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_type_is_binary() {
        let value = machine_type();
        assert!(value == "physical" || value == "virtual");
    }

    #[test]
    fn collect_fills_os_identity() {
        let inventory = collect();
        // sysinfo knows the OS name on every supported platform.
        assert!(!inventory.os_name.is_empty());
        assert!(inventory.installed_software.len() <= MAX_SOFTWARE_ENTRIES);
    }
}
