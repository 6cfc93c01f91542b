use crate::tool::{run_tool, TOOL_TIMEOUT};
use hostwatch_common::types::GpuMetrics;

/// Vendor tools are tried in order; with none present the default carries
/// the `usage_percent = -1` sentinel.
pub fn collect() -> GpuMetrics {
    nvidia().or_else(amd).unwrap_or_default()
}

fn nvidia() -> Option<GpuMetrics> {
    let output = run_tool(
        "nvidia-smi",
        &[
            "--query-gpu=temperature.gpu,utilization.gpu,memory.used,memory.total",
            "--format=csv,noheader,nounits",
        ],
        TOOL_TIMEOUT,
    )?;
    parse_nvidia_csv(&output)
}

fn parse_nvidia_csv(output: &str) -> Option<GpuMetrics> {
    let line = output.lines().next()?;
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return None;
    }
    Some(GpuMetrics {
        temperature_c: fields[0].parse().ok()?,
        usage_percent: fields[1].parse().ok()?,
        // nvidia-smi reports MiB with --nounits.
        memory_used: fields[2].parse::<u64>().ok()? * 1024 * 1024,
        memory_total: fields[3].parse::<u64>().ok()? * 1024 * 1024,
    })
}

fn amd() -> Option<GpuMetrics> {
    let output = run_tool(
        "rocm-smi",
        &["--showtemp", "--showuse", "--showmemuse", "--json"],
        TOOL_TIMEOUT,
    )?;
    parse_rocm_json(&output)
}

fn parse_rocm_json(output: &str) -> Option<GpuMetrics> {
    let json: serde_json::Value = serde_json::from_str(output).ok()?;
    // rocm-smi keys the report by card ("card0", ...).
    let card = json.as_object()?.values().next()?.as_object()?;

    let mut metrics = GpuMetrics {
        usage_percent: 0.0,
        ..GpuMetrics::default()
    };
    for (key, value) in card {
        let text = value.as_str().unwrap_or_default();
        if key.contains("Temperature") && metrics.temperature_c == 0.0 {
            metrics.temperature_c = text.parse().unwrap_or(0.0);
        } else if key.contains("GPU use") {
            metrics.usage_percent = text.parse().unwrap_or(0.0);
        } else if key.contains("VRAM") && key.contains("Used") {
            metrics.memory_used = parse_u64(value);
        } else if key.contains("VRAM") && key.contains("Total") {
            metrics.memory_total = parse_u64(value);
        }
    }
    Some(metrics)
}

fn parse_u64(value: &serde_json::Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

/// Model string for the inventory report.
pub fn model_name() -> String {
    run_tool(
        "nvidia-smi",
        &["--query-gpu=name", "--format=csv,noheader"],
        TOOL_TIMEOUT,
    )
    .and_then(|out| out.lines().next().map(|line| line.trim().to_string()))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostwatch_common::types::PERCENT_UNAVAILABLE;

    #[test]
    fn nvidia_csv_parses_and_scales_memory() {
        let metrics = parse_nvidia_csv("45, 12, 1024, 8192").unwrap();
        assert_eq!(metrics.temperature_c, 45.0);
        assert_eq!(metrics.usage_percent, 12.0);
        assert_eq!(metrics.memory_used, 1024 * 1024 * 1024);
        assert_eq!(metrics.memory_total, 8192 * 1024 * 1024);
    }

    #[test]
    fn malformed_nvidia_output_is_rejected() {
        assert!(parse_nvidia_csv("").is_none());
        assert!(parse_nvidia_csv("45, 12").is_none());
        assert!(parse_nvidia_csv("a, b, c, d").is_none());
    }

    #[test]
    fn rocm_json_is_parsed() {
        let json = r#"{"card0":{"Temperature (Sensor edge) (C)":"52.0",
            "GPU use (%)":"37","GPU Memory Allocated (VRAM%)":"10",
            "VRAM Total Memory (B)":"8573157376","VRAM Total Used Memory (B)":"1020054016"}}"#;
        let metrics = parse_rocm_json(json).unwrap();
        assert_eq!(metrics.temperature_c, 52.0);
        assert_eq!(metrics.usage_percent, 37.0);
        assert_eq!(metrics.memory_total, 8_573_157_376);
        assert_eq!(metrics.memory_used, 1_020_054_016);
    }

    #[test]
    fn no_tool_yields_sentinel() {
        // collect() may find a real GPU on a dev box; the default contract
        // is what the rest of the agent relies on.
        let fallback = GpuMetrics::default();
        assert_eq!(fallback.usage_percent, PERCENT_UNAVAILABLE);
        assert_eq!(fallback.memory_total, 0);
    }
}
