use hostwatch_common::types::MetricFamily;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "agent_config.json";

/// Environment override for the metrics sink, applied once at startup.
pub const SERVER_URL_ENV: &str = "MONITORING_AGENT_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub machine_name: String,

    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_command_server_host")]
    pub command_server_host: String,
    #[serde(default = "default_command_server_port")]
    pub command_server_port: u16,

    #[serde(default = "default_update_frequency_s")]
    pub update_frequency_s: u64,
    #[serde(default = "default_enabled_metrics")]
    pub enabled_metrics: HashMap<String, bool>,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: String,
    #[serde(default = "default_allowed_interpreters")]
    pub allowed_interpreters: Vec<String>,
    #[serde(default = "default_max_script_timeout_sec")]
    pub max_script_timeout_sec: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_true")]
    pub enable_user_parameters: bool,
    #[serde(default)]
    pub enable_inline_commands: bool,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_job_retention_seconds")]
    pub job_retention_seconds: u64,

    #[serde(default = "default_true")]
    pub audit_log_enabled: bool,
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: String,

    /// Named command templates with `$1..$9` placeholders. A key ending in
    /// `[*]` accepts positional parameters.
    #[serde(default)]
    pub user_parameters: HashMap<String, String>,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8000/metrics".to_string()
}

fn default_command_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_command_server_port() -> u16 {
    8081
}

fn default_update_frequency_s() -> u64 {
    10
}

fn default_enabled_metrics() -> HashMap<String, bool> {
    MetricFamily::ALL
        .iter()
        .map(|family| (family.as_str().to_string(), true))
        .collect()
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_max_buffer_size() -> usize {
    100
}

fn default_scripts_dir() -> String {
    "scripts".to_string()
}

fn default_allowed_interpreters() -> Vec<String> {
    ["python", "bash", "cmd", "powershell"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_script_timeout_sec() -> u64 {
    300
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_job_retention_seconds() -> u64 {
    3600
}

fn default_audit_log_path() -> String {
    "agent_audit.log".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        // Every field carries a serde default, so an empty object is the
        // canonical default configuration.
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl AgentConfig {
    /// Load from `path`. A missing file yields defaults silently; a broken
    /// file yields defaults with a warning. This never fails: the in-memory
    /// configuration stays authoritative.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "configuration loaded");
                    config
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err,
                        "configuration unreadable, using defaults");
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no configuration file, using defaults");
                Self::default()
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err,
                    "configuration unreadable, using defaults");
                Self::default()
            }
        }
    }

    /// Persist atomically: write a sibling file, then rename over the target.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)
    }

    /// Apply a partial update. Unspecified keys keep their values, unknown
    /// keys are ignored, and `enabled_metrics` merges per family.
    pub fn merge(&mut self, update: &Value) {
        let Some(map) = update.as_object() else {
            return;
        };

        if let Some(v) = map.get("agent_id").and_then(Value::as_str) {
            self.agent_id = v.to_string();
        }
        if let Some(v) = map.get("machine_name").and_then(Value::as_str) {
            self.machine_name = v.to_string();
        }
        if let Some(v) = map.get("server_url").and_then(Value::as_str) {
            self.server_url = v.to_string();
        }
        if let Some(v) = map.get("command_server_host").and_then(Value::as_str) {
            self.command_server_host = v.to_string();
        }
        if let Some(v) = map.get("command_server_port").and_then(Value::as_u64) {
            self.command_server_port = v as u16;
        }
        if let Some(v) = map.get("update_frequency_s").and_then(Value::as_u64) {
            self.update_frequency_s = v.max(1);
        }
        if let Some(metrics) = map.get("enabled_metrics").and_then(Value::as_object) {
            for (family, flag) in metrics {
                if let Some(flag) = flag.as_bool() {
                    self.enabled_metrics.insert(family.clone(), flag);
                }
            }
        }
        if let Some(v) = map.get("send_timeout_ms").and_then(Value::as_u64) {
            self.send_timeout_ms = v;
        }
        if let Some(v) = map.get("max_buffer_size").and_then(Value::as_u64) {
            self.max_buffer_size = v as usize;
        }
        if let Some(v) = map.get("scripts_dir").and_then(Value::as_str) {
            self.scripts_dir = v.to_string();
        }
        if let Some(v) = map.get("allowed_interpreters").and_then(Value::as_array) {
            self.allowed_interpreters = v
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = map.get("max_script_timeout_sec").and_then(Value::as_u64) {
            self.max_script_timeout_sec = v;
        }
        if let Some(v) = map.get("max_output_bytes").and_then(Value::as_u64) {
            self.max_output_bytes = v as usize;
        }
        if let Some(v) = map.get("enable_user_parameters").and_then(Value::as_bool) {
            self.enable_user_parameters = v;
        }
        if let Some(v) = map.get("enable_inline_commands").and_then(Value::as_bool) {
            self.enable_inline_commands = v;
        }
        if let Some(v) = map.get("max_concurrent_jobs").and_then(Value::as_u64) {
            self.max_concurrent_jobs = v as usize;
        }
        if let Some(v) = map.get("job_retention_seconds").and_then(Value::as_u64) {
            self.job_retention_seconds = v;
        }
        if let Some(v) = map.get("audit_log_enabled").and_then(Value::as_bool) {
            self.audit_log_enabled = v;
        }
        if let Some(v) = map.get("audit_log_path").and_then(Value::as_str) {
            self.audit_log_path = v.to_string();
        }
        if let Some(params) = map.get("user_parameters").and_then(Value::as_object) {
            for (key, template) in params {
                if let Some(template) = template.as_str() {
                    self.user_parameters
                        .insert(key.clone(), template.to_string());
                }
            }
        }
    }

    /// Fill in identity fields that are still empty.
    pub fn auto_detect(&mut self) {
        if self.agent_id.is_empty() {
            let millis = chrono::Utc::now().timestamp_millis();
            let suffix: u32 = rand::thread_rng().gen_range(1000..=9999);
            self.agent_id = format!("agent_{millis}_{suffix}");
            tracing::info!(agent_id = %self.agent_id, "agent id derived");
        }
        if self.machine_name.is_empty() {
            self.machine_name =
                hostwatch_probe::host_name().unwrap_or_else(|| "Unknown-Machine".to_string());
            tracing::info!(machine_name = %self.machine_name, "machine name detected");
        }
    }

    pub fn is_metric_enabled(&self, family: MetricFamily) -> bool {
        self.enabled_metrics
            .get(family.as_str())
            .copied()
            .unwrap_or(false)
    }

    pub fn enabled_families(&self) -> Vec<MetricFamily> {
        MetricFamily::ALL
            .iter()
            .copied()
            .filter(|family| self.is_metric_enabled(*family))
            .collect()
    }

    /// Absolute scripts directory, resolved against the executable directory
    /// when configured as relative.
    pub fn scripts_path(&self) -> PathBuf {
        let configured = Path::new(&self.scripts_dir);
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            exe_dir().join(configured)
        }
    }

    pub fn audit_path(&self) -> PathBuf {
        let configured = Path::new(&self.audit_log_path);
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            exe_dir().join(configured)
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.is_empty() {
                tracing::info!(server_url = %url, "server url overridden from environment");
                self.server_url = url;
            }
        }
    }
}

/// Directory holding the agent binary; configuration and scripts live next
/// to it.
pub fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_path(name: &str) -> PathBuf {
    exe_dir().join(name)
}
