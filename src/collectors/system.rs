//! Last-resort strategies backed by `sysinfo`, appended to the end of chains
//! whose native sources came up empty.

use crate::collectors::probe;
use crate::collectors::HostContext;
use crate::snapshot::{Memory, Swap};
use std::time::Duration;
use sysinfo::{CpuExt, System, SystemExt};

pub fn host_name(host: &HostContext) -> Option<String> {
    host.with_sysinfo(|s| s.host_name())?.and_then(probe::non_empty)
}

pub fn os_name(host: &HostContext) -> Option<(String, Option<String>)> {
    host.with_sysinfo(|s| (s.name(), s.os_version()))
        .and_then(|(name, version)| Some((probe::non_empty(name?)?, version)))
}

pub fn kernel_version(host: &HostContext) -> Option<String> {
    host.with_sysinfo(|s| s.kernel_version())?
        .and_then(probe::non_empty)
}

pub fn uptime_secs(host: &HostContext) -> Option<u64> {
    host.with_sysinfo(|s| s.uptime()).filter(|v| *v > 0)
}

pub fn process_count(host: &HostContext) -> Option<u64> {
    host.with_sysinfo(|s| {
        s.refresh_processes();
        s.processes().len() as u64
    })
    .filter(|n| *n > 0)
}

pub fn cpu_brand(host: &HostContext) -> Option<String> {
    host.with_sysinfo(|s| {
        s.refresh_cpu();
        s.cpus().first().map(|c| c.brand().to_string())
    })?
    .and_then(probe::non_empty)
}

pub fn cpu_counts(host: &HostContext) -> Option<(u16, u16)> {
    host.with_sysinfo(|s| {
        s.refresh_cpu();
        let logical = s.cpus().len() as u16;
        let physical = s.physical_core_count().unwrap_or(0) as u16;
        (physical, logical)
    })
    .filter(|(_, logical)| *logical > 0)
}

/// Average usage across cores from two refreshes.
pub fn cpu_usage(host: &HostContext) -> Option<f64> {
    host.with_sysinfo(|s| {
        s.refresh_cpu();
        std::thread::sleep(Duration::from_millis(200));
        s.refresh_cpu();
        average_usage(s)
    })?
}

fn average_usage(system: &System) -> Option<f64> {
    let cpus = system.cpus();
    if cpus.is_empty() {
        return None;
    }
    let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
    Some(f64::from(sum / cpus.len() as f32))
}

pub fn memory(host: &HostContext) -> Option<Memory> {
    host.with_sysinfo(|s| {
        s.refresh_memory();
        let total = s.total_memory();
        let free = s.available_memory();
        Memory {
            total,
            used: total.saturating_sub(free),
            free,
        }
    })
    .filter(|m| m.total > 0)
}

pub fn swap(host: &HostContext) -> Option<Swap> {
    host.with_sysinfo(|s| {
        s.refresh_memory();
        Swap {
            total: s.total_swap(),
            used: s.used_swap(),
            free: s.free_swap(),
            device: String::new(),
        }
    })
    .filter(|s| s.total > 0)
}
