// src/utils/system.rs: System functions

use std::time::Duration;

use anyhow::{anyhow, Result};
use log::warn;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::time::sleep;

/// Below this much free memory a warning is logged; vsearch holds all uniques in RAM.
const LOW_RAM_BYTES: u64 = 2 * 1_073_741_824;


/// Determines number of cores that can be used for the per-OTU worker pool
///
/// # Arguments
///
/// * `args_threads` - Upper bound from `--threads`
///
/// # Returns
///
/// Result<usize, f32> usable cores, current cpu usage
pub async fn detect_cores_and_load(args_threads: usize) -> Result<(usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    // usage is a delta between two refreshes
    sleep(Duration::from_millis(100)).await;
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    let cpu_load = system.global_cpu_usage();

    let physical_cores = System::physical_core_count().unwrap_or(1);
    let max_cores = physical_cores.min(args_threads).max(1);
    Ok((max_cores, cpu_load))
}


/// Finds the amount of total and available RAM
///
/// # Returns
///
/// Result<u64, u64> total ram, available ram in bytes
pub fn detect_ram() -> Result<(u64, u64)> {
    let refresh_kind = RefreshKind::nothing().with_memory(MemoryRefreshKind::everything());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_memory_specifics(MemoryRefreshKind::everything());

    let total_ram = system.total_memory();
    let available_ram = if cfg!(target_os = "macos") {
        // macOS reports available_memory as 0 on some releases
        total_ram.saturating_sub(system.used_memory())
    } else {
        system.available_memory()
    };

    if total_ram == 0 || available_ram == 0 {
        return Err(anyhow!("Failed to detect valid RAM values"));
    }
    if available_ram < LOW_RAM_BYTES {
        warn!(
            "Low available RAM ({} MiB of {} MiB); dereplication of large samples may fail",
            available_ram / 1_048_576,
            total_ram / 1_048_576
        );
    }
    Ok((total_ram, available_ram))
}
