use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Sentinel for percentage values the platform cannot provide.
pub const PERCENT_UNAVAILABLE: f64 = -1.0;

/// The metric families a snapshot can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricFamily {
    Cpu,
    Memory,
    Disk,
    Network,
    Gpu,
    Hdd,
    User,
    Inventory,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 8] = [
        MetricFamily::Cpu,
        MetricFamily::Memory,
        MetricFamily::Disk,
        MetricFamily::Network,
        MetricFamily::Gpu,
        MetricFamily::Hdd,
        MetricFamily::User,
        MetricFamily::Inventory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricFamily::Cpu => "cpu",
            MetricFamily::Memory => "memory",
            MetricFamily::Disk => "disk",
            MetricFamily::Network => "network",
            MetricFamily::Gpu => "gpu",
            MetricFamily::Hdd => "hdd",
            MetricFamily::User => "user",
            MetricFamily::Inventory => "inventory",
        }
    }
}

impl std::str::FromStr for MetricFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(MetricFamily::Cpu),
            "memory" => Ok(MetricFamily::Memory),
            "disk" => Ok(MetricFamily::Disk),
            "network" => Ok(MetricFamily::Network),
            "gpu" => Ok(MetricFamily::Gpu),
            "hdd" => Ok(MetricFamily::Hdd),
            "user" => Ok(MetricFamily::User),
            "inventory" => Ok(MetricFamily::Inventory),
            _ => Err(format!("unknown metric family: {s}")),
        }
    }
}

/// Set of families one collection cycle should sample.
pub type FamilySelection = HashSet<MetricFamily>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub usage_percent: f64,
    pub temperature_c: f64,
    pub core_usage: Vec<f64>,
    pub core_temperatures_c: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskPartition {
    pub mount_point: String,
    pub filesystem: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub partitions: Vec<DiskPartition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterfaceMetrics {
    pub name: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Bytes per second over the in-call sampling window.
    pub bandwidth_sent: u64,
    pub bandwidth_received: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConnection {
    pub local_ip: String,
    pub local_port: u16,
    pub remote_ip: String,
    pub remote_port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub interfaces: Vec<NetworkInterfaceMetrics>,
    pub connections: Vec<NetworkConnection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuMetrics {
    pub temperature_c: f64,
    /// -1 when no supported GPU tool is available.
    pub usage_percent: f64,
    pub memory_used: u64,
    pub memory_total: u64,
}

impl Default for GpuMetrics {
    fn default() -> Self {
        Self {
            temperature_c: 0.0,
            usage_percent: PERCENT_UNAVAILABLE,
            memory_used: 0,
            memory_total: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HddDrive {
    pub name: String,
    pub temperature_c: f64,
    pub power_on_hours: u64,
    pub health_status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HddMetrics {
    pub drives: Vec<HddDrive>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetrics {
    pub username: String,
    pub domain: String,
    pub full_name: String,
    pub sid_or_uid: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryInfo {
    pub device_type: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub uuid: String,
    pub os_name: String,
    pub os_version: String,
    pub cpu_model: String,
    pub cpu_frequency: String,
    pub memory_type: String,
    pub disk_model: String,
    pub disk_type: String,
    pub disk_total_bytes: u64,
    pub gpu_model: String,
    pub mac_addresses: Vec<String>,
    pub ip_addresses: Vec<String>,
    pub installed_software: Vec<String>,
}

/// Everything one collection cycle produced. Families that were not sampled
/// stay `None` and are omitted from the serialized form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Seconds since the Unix epoch at sampling time.
    pub timestamp: i64,
    pub machine_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hdd: Option<HddMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<InventoryInfo>,
}

/// Inbound command envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Command {
    pub command: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: String,
}

/// Outbound command envelope. Always carried in an HTTP 200 body; transport
/// status codes are reserved for failures of the endpoint itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    pub data: Value,
    pub timestamp: String,
}

impl CommandResponse {
    fn stamp() -> String {
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
    }

    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            timestamp: Self::stamp(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::fail_with(message, Value::Object(Default::default()))
    }

    pub fn fail_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
            timestamp: Self::stamp(),
        }
    }
}

/// Outcome of one child-process execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub combined: String,
    pub timed_out: bool,
    pub truncated: bool,
}

/// Query-facing copy of one job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub completed: bool,
    pub timed_out: bool,
    pub cancel_requested: bool,
    pub truncated: bool,
    pub exit_code: i32,
    /// Wall clock, seconds since the Unix epoch; 0 until set.
    pub started_at: u64,
    pub completed_at: u64,
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_round_trips_through_str() {
        for family in MetricFamily::ALL {
            let parsed: MetricFamily = family.as_str().parse().unwrap();
            assert_eq!(parsed, family);
        }
        assert!("wiggle".parse::<MetricFamily>().is_err());
    }

    #[test]
    fn snapshot_omits_unsampled_families() {
        let snapshot = MetricsSnapshot {
            timestamp: 1_700_000_000,
            machine_type: "physical".into(),
            cpu: Some(CpuMetrics::default()),
            ..Default::default()
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value.get("cpu").is_some());
        assert!(value.get("disk").is_none());
        assert!(value.get("inventory").is_none());
    }

    #[test]
    fn gpu_default_uses_unavailable_sentinel() {
        let gpu = GpuMetrics::default();
        assert_eq!(gpu.usage_percent, PERCENT_UNAVAILABLE);
        let value = serde_json::to_value(&gpu).unwrap();
        assert_eq!(value["usage_percent"], serde_json::json!(-1.0));
    }

    #[test]
    fn command_defaults_missing_fields() {
        let cmd: Command = serde_json::from_str(r#"{"command":"restart"}"#).unwrap();
        assert_eq!(cmd.command, "restart");
        assert!(cmd.data.is_null());
        assert!(cmd.timestamp.is_empty());
    }

    #[test]
    fn response_timestamp_has_millis() {
        let resp = CommandResponse::ok("done", Value::Null);
        // 2024-01-01T00:00:00.123
        assert_eq!(resp.timestamp.len(), 23);
        assert!(resp.timestamp.contains('.'));
    }
}
