use hostwatch_common::types::{DiskMetrics, DiskPartition};
use sysinfo::Disks;

/// Mounts that never represent real local storage.
const PSEUDO_MOUNT_PREFIXES: [&str; 5] = ["/snap/", "/sys/", "/proc/", "/dev/", "/run/"];

pub fn collect() -> DiskMetrics {
    let disks = Disks::new_with_refreshed_list();
    let mut partitions = Vec::new();

    for disk in disks.iter() {
        let mount_point = disk.mount_point().to_string_lossy().to_string();
        if PSEUDO_MOUNT_PREFIXES
            .iter()
            .any(|prefix| mount_point.starts_with(prefix))
        {
            continue;
        }
        if disk.is_removable() {
            continue;
        }
        let total = disk.total_space();
        if total == 0 {
            continue;
        }

        let free = disk.available_space();
        let used = total.saturating_sub(free);
        partitions.push(DiskPartition {
            mount_point,
            filesystem: disk.file_system().to_string_lossy().to_string(),
            total_bytes: total,
            used_bytes: used,
            free_bytes: free,
            usage_percent: used as f64 * 100.0 / total as f64,
        });
    }

    DiskMetrics { partitions }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_have_consistent_accounting() {
        let metrics = collect();
        for partition in &metrics.partitions {
            assert!(partition.total_bytes > 0);
            assert!(partition.used_bytes + partition.free_bytes <= partition.total_bytes);
            assert!((0.0..=100.0).contains(&partition.usage_percent));
            assert!(!partition.mount_point.is_empty());
        }
    }
}
