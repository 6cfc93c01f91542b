use hostwatch_common::types::CpuMetrics;
use std::time::Duration;
use sysinfo::{Components, CpuRefreshKind, RefreshKind, System, MINIMUM_CPU_UPDATE_INTERVAL};

/// Usage is the delta between two counter samples taken inside this call;
/// nothing is carried between calls.
pub fn collect() -> CpuMetrics {
    let refresh = RefreshKind::nothing().with_cpu(CpuRefreshKind::everything());
    let mut sys = System::new_with_specifics(refresh);
    sys.refresh_cpu_usage();
    std::thread::sleep(sample_interval());
    sys.refresh_cpu_usage();

    let mut components = Components::new();
    components.refresh(true);

    CpuMetrics {
        usage_percent: sys.global_cpu_usage() as f64,
        temperature_c: package_temperature(&components).unwrap_or(0.0),
        core_usage: sys.cpus().iter().map(|cpu| cpu.cpu_usage() as f64).collect(),
        core_temperatures_c: core_temperatures(&components),
    }
}

fn sample_interval() -> Duration {
    MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(200))
}

fn is_cpu_sensor(label: &str) -> bool {
    let label = label.to_lowercase();
    label.contains("cpu")
        || label.contains("package")
        || label.contains("tctl")
        || label.contains("tdie")
        || label.contains("core")
}

/// Hottest CPU-ish sensor; laptops often expose several.
fn package_temperature(components: &Components) -> Option<f64> {
    components
        .iter()
        .filter(|c| is_cpu_sensor(c.label()))
        .filter_map(|c| c.temperature())
        .map(f64::from)
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
}

fn core_temperatures(components: &Components) -> Vec<f64> {
    components
        .iter()
        .filter(|c| is_cpu_sensor(c.label()))
        .filter_map(|c| c.temperature())
        .map(f64::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_is_a_percentage_or_nan() {
        let metrics = collect();
        assert!(
            metrics.usage_percent.is_nan()
                || (0.0..=100.0).contains(&metrics.usage_percent)
        );
        assert!(!metrics.core_usage.is_empty());
        for core in &metrics.core_usage {
            assert!(core.is_nan() || (0.0..=100.0).contains(core));
        }
    }

    #[test]
    fn sample_interval_is_at_least_200ms() {
        assert!(sample_interval() >= Duration::from_millis(200));
    }
}
