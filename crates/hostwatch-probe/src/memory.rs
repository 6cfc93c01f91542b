use hostwatch_common::types::MemoryMetrics;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

pub fn collect() -> MemoryMetrics {
    let refresh = RefreshKind::nothing().with_memory(MemoryRefreshKind::everything());
    let sys = System::new_with_specifics(refresh);

    let total = sys.total_memory();
    // Available is the better "free" figure: it counts reclaimable caches.
    let free = sys.available_memory();
    let used = total.saturating_sub(free);
    let usage_percent = if total > 0 {
        used as f64 * 100.0 / total as f64
    } else {
        0.0
    };

    MemoryMetrics {
        total_bytes: total,
        used_bytes: used,
        free_bytes: free,
        usage_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_are_consistent() {
        let metrics = collect();
        assert!(metrics.total_bytes > 0);
        assert!(metrics.used_bytes + metrics.free_bytes <= metrics.total_bytes);
        assert!((0.0..=100.0).contains(&metrics.usage_percent));
    }
}
