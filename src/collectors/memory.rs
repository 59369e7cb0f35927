use crate::collectors::chain::{Chain, Platform};
use crate::collectors::probe;
use crate::collectors::{system, HostContext};
use crate::snapshot::{Memory, Swap};
use std::collections::HashMap;

/// /proc/meminfo in bytes.
pub fn parse_meminfo(text: &str) -> HashMap<String, u64> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let key = fields.next()?.trim_end_matches(':');
            let kib: u64 = fields.next()?.parse().ok()?;
            Some((key.to_string(), kib * 1024))
        })
        .collect()
}

pub fn memory_from_meminfo(info: &HashMap<String, u64>) -> Option<Memory> {
    let total = *info.get("MemTotal").filter(|t| **t > 0)?;
    let field = |k: &str| info.get(k).copied().unwrap_or(0);
    let available = match info.get("MemAvailable") {
        Some(v) if *v > 0 => *v,
        _ => field("MemFree") + field("Buffers") + field("Cached") + field("SReclaimable"),
    };
    Some(Memory {
        total,
        used: total.saturating_sub(available),
        free: available,
    })
}

/// Sums the devices listed in /proc/swaps.
pub fn parse_swaps(text: &str) -> Option<Swap> {
    let mut swap = Swap::default();
    let mut devices = Vec::new();
    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let (Ok(size), Ok(used)) = (fields[2].parse::<u64>(), fields[3].parse::<u64>()) else {
            continue;
        };
        swap.total += size * 1024;
        swap.used += used * 1024;
        devices.push(fields[0]);
    }
    if swap.total == 0 {
        return None;
    }
    swap.free = swap.total.saturating_sub(swap.used);
    swap.device = devices.join(", ");
    Some(swap)
}

fn swap_from_meminfo(info: &HashMap<String, u64>) -> Option<Swap> {
    let total = *info.get("SwapTotal").filter(|t| **t > 0)?;
    let free = info.get("SwapFree").copied().unwrap_or(0);
    Some(Swap {
        total,
        used: total.saturating_sub(free),
        free,
        device: String::new(),
    })
}

fn meminfo() -> Option<HashMap<String, u64>> {
    probe::read_text("/proc/meminfo")
        .ok()
        .map(|text| parse_meminfo(&text))
}

/// Free pages from `vm_stat`: free + inactive + speculative.
pub fn parse_vm_stat(text: &str) -> Option<u64> {
    let page_size = text
        .lines()
        .next()
        .and_then(|l| l.split("page size of").nth(1))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(4096);
    let fields = probe::parse_colon_fields(text);
    let pages = |key: &str| -> u64 {
        fields
            .get(key)
            .and_then(|v| v.trim_end_matches('.').parse().ok())
            .unwrap_or(0)
    };
    let free = pages("Pages free") + pages("Pages inactive") + pages("Pages speculative");
    (free > 0).then_some(free * page_size)
}

fn memory_darwin(host: &HostContext) -> Option<Memory> {
    let total: u64 = host.sysctl("hw.memsize")?.parse().ok()?;
    let free = parse_vm_stat(&host.command("vm_stat", &[])?)?;
    Some(Memory {
        total,
        used: total.saturating_sub(free),
        free,
    })
}

pub fn chain(platform: Platform) -> Chain<Memory> {
    Chain::new("memory")
        .step_if(platform == Platform::Linux, "meminfo", |_| {
            memory_from_meminfo(&meminfo()?)
        })
        .step_if(platform == Platform::MacOs, "vm_stat", memory_darwin)
        .step("sysinfo", system::memory)
}

pub fn swap_chain(platform: Platform) -> Chain<Swap> {
    let linux = platform == Platform::Linux;
    Chain::new("swap")
        .step_if(linux, "proc_swaps", |_| {
            parse_swaps(&probe::read_text("/proc/swaps").ok()?)
        })
        .step_if(linux, "meminfo", |_| swap_from_meminfo(&meminfo()?))
        .step("sysinfo", system::swap)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16000000 kB\nMemFree:         2000000 kB\n\
                           MemAvailable:    8000000 kB\nBuffers:          100000 kB\n\
                           Cached:          3000000 kB\nSwapTotal:       4000000 kB\n\
                           SwapFree:        3000000 kB\nHugePages_Total:       0\n";

    #[test]
    fn meminfo_prefers_available() {
        let memory = memory_from_meminfo(&parse_meminfo(MEMINFO)).unwrap();
        assert_eq!(memory.total, 16_000_000 * 1024);
        assert_eq!(memory.free, 8_000_000 * 1024);
        assert_eq!(memory.used, 8_000_000 * 1024);
    }

    #[test]
    fn meminfo_without_available_sums_reclaimable() {
        let text = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 200 kB\nSReclaimable: 50 kB\n";
        let memory = memory_from_meminfo(&parse_meminfo(text)).unwrap();
        assert_eq!(memory.free, 400 * 1024);
        assert_eq!(memory.used, 600 * 1024);
        assert!(memory_from_meminfo(&parse_meminfo("")).is_none());
    }

    #[test]
    fn swaps_sum_devices() {
        let text = "Filename\tType\tSize\tUsed\tPriority\n\
                    /dev/nvme0n1p3 partition 8388604 1024 -2\n\
                    /dev/zram0 partition 4194300 0 100\n";
        let swap = parse_swaps(text).unwrap();
        assert_eq!(swap.total, (8_388_604 + 4_194_300) * 1024);
        assert_eq!(swap.used, 1024 * 1024);
        assert_eq!(swap.device, "/dev/nvme0n1p3, /dev/zram0");
        assert!(parse_swaps("Filename\tType\tSize\tUsed\tPriority\n").is_none());
    }

    #[test]
    fn swap_falls_back_to_meminfo() {
        let swap = swap_from_meminfo(&parse_meminfo(MEMINFO)).unwrap();
        assert_eq!(swap.used, 1_000_000 * 1024);
    }

    #[test]
    fn vm_stat_counts_reclaimable_pages() {
        let text = "Mach Virtual Memory Statistics: (page size of 16384 bytes)\n\
                    Pages free:                               10.\n\
                    Pages active:                            500.\n\
                    Pages inactive:                           20.\n\
                    Pages speculative:                         5.\n";
        assert_eq!(parse_vm_stat(text), Some(35 * 16384));
    }
}
