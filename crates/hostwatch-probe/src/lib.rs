//! Host metrics probe.
//!
//! One module per metric family. `Probe::collect` is stateless: the rate
//! metrics (CPU usage, interface bandwidth) take both of their samples
//! inside a single call, so a probe created a moment ago produces the same
//! quality of data as one that has been running for hours.

pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod hdd;
pub mod inventory;
pub mod memory;
pub mod network;
pub mod tool;
pub mod user;

use hostwatch_common::types::{FamilySelection, MetricFamily, MetricsSnapshot};

/// Hostname as the OS reports it.
pub fn host_name() -> Option<String> {
    sysinfo::System::host_name()
}

#[derive(Default)]
pub struct Probe;

impl Probe {
    pub fn new() -> Self {
        Self
    }

    /// Sample the requested families. Unreadable sources degrade to
    /// zero/default values; this never fails.
    pub fn collect(&self, enabled: &FamilySelection) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot {
            timestamp: chrono::Utc::now().timestamp(),
            machine_type: inventory::machine_type(),
            ..Default::default()
        };

        if enabled.contains(&MetricFamily::Cpu) {
            snapshot.cpu = Some(cpu::collect());
        }
        if enabled.contains(&MetricFamily::Memory) {
            snapshot.memory = Some(memory::collect());
        }
        if enabled.contains(&MetricFamily::Disk) {
            snapshot.disk = Some(disk::collect());
        }
        if enabled.contains(&MetricFamily::Network) {
            snapshot.network = Some(network::collect());
        }
        if enabled.contains(&MetricFamily::Gpu) {
            snapshot.gpu = Some(gpu::collect());
        }
        if enabled.contains(&MetricFamily::Hdd) {
            snapshot.hdd = Some(hdd::collect());
        }
        if enabled.contains(&MetricFamily::User) {
            snapshot.user = Some(user::collect());
        }
        if enabled.contains(&MetricFamily::Inventory) {
            snapshot.inventory = Some(inventory::collect());
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn collect_honors_the_family_selection() {
        let probe = Probe::new();
        let enabled: FamilySelection =
            HashSet::from([MetricFamily::Cpu, MetricFamily::Memory]);
        let snapshot = probe.collect(&enabled);

        assert!(snapshot.cpu.is_some());
        assert!(snapshot.memory.is_some());
        assert!(snapshot.disk.is_none());
        assert!(snapshot.network.is_none());
        assert!(snapshot.gpu.is_none());
        assert!(snapshot.timestamp > 0);
        assert!(snapshot.machine_type == "physical" || snapshot.machine_type == "virtual");
    }

    #[test]
    fn empty_selection_yields_bare_snapshot() {
        let probe = Probe::new();
        let snapshot = probe.collect(&FamilySelection::new());
        assert!(snapshot.cpu.is_none());
        assert!(snapshot.inventory.is_none());
        assert!(snapshot.timestamp > 0);
    }
}
