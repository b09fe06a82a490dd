//! Process resource usage for the `/metrics` route.
//!
//! Operational observability only; not part of the execution contract.

use std::path::Path;
use sysinfo::{Disks, System};

use crate::protocol::{DiskMetrics, MemoryMetrics, MetricsResponse};

/// Takes a point-in-time snapshot of CPU, memory, and disk usage.
///
/// CPU usage needs two samples a short interval apart, so this suspends
/// briefly between refreshes.
pub async fn snapshot() -> MetricsResponse {
    let mut system = System::new();
    system.refresh_cpu_usage();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    system.refresh_cpu_usage();
    system.refresh_memory();

    let total = system.total_memory();
    let available = system.available_memory();
    let memory_percent = if total > 0 {
        ratio_percent(total - available, total)
    } else {
        0.0
    };

    MetricsResponse {
        cpu_percent: system.global_cpu_usage(),
        memory: MemoryMetrics {
            total,
            available,
            percent: memory_percent,
        },
        disk: root_disk_metrics(),
    }
}

fn root_disk_metrics() -> DiskMetrics {
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.iter().next());

    match root {
        Some(disk) => {
            let total = disk.total_space();
            let free = disk.available_space();
            let percent = if total > 0 {
                ratio_percent(total - free, total)
            } else {
                0.0
            };
            DiskMetrics {
                total,
                free,
                percent,
            }
        }
        None => DiskMetrics {
            total: 0,
            free: 0,
            percent: 0.0,
        },
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio_percent(used: u64, total: u64) -> f32 {
    (used as f64 / total as f64 * 100.0) as f32
}
