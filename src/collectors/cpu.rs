use crate::collectors::chain::{Chain, Platform};
use crate::collectors::probe;
use crate::collectors::{system, HostContext};
use crate::snapshot::Cpu;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

const CPU_SYSFS: &str = "/sys/devices/system/cpu";
const USAGE_SAMPLE_GAP: Duration = Duration::from_millis(100);

const NAME_NOISE: &[&str] = &[
    " CPU",
    " FPU",
    " APU",
    " Processor",
    " processor",
    " Dual-Core",
    " Quad-Core",
    " Six-Core",
    " Eight-Core",
    " Ten-Core",
    " 2-Core",
    " 4-Core",
    " 6-Core",
    " 8-Core",
    " 10-Core",
    " 12-Core",
    " 14-Core",
    " 16-Core",
    " 24-Core",
    " 32-Core",
    " with Radeon Graphics",
    " with Radeon Vega Graphics",
];

/// (implementer, part) -> core name, as reported in /proc/cpuinfo on ARM.
const ARM_CORES: &[(&str, &str, &str)] = &[
    ("0x41", "0xd03", "Cortex-A53"),
    ("0x41", "0xd04", "Cortex-A35"),
    ("0x41", "0xd05", "Cortex-A55"),
    ("0x41", "0xd07", "Cortex-A57"),
    ("0x41", "0xd08", "Cortex-A72"),
    ("0x41", "0xd09", "Cortex-A73"),
    ("0x41", "0xd0a", "Cortex-A75"),
    ("0x41", "0xd0b", "Cortex-A76"),
    ("0x41", "0xd0c", "Neoverse N1"),
    ("0x41", "0xd0d", "Cortex-A77"),
    ("0x41", "0xd0e", "Cortex-A76AE"),
    ("0x41", "0xd40", "Neoverse V1"),
    ("0x41", "0xd41", "Cortex-A78"),
    ("0x41", "0xd44", "Cortex-X1"),
    ("0x41", "0xd46", "Cortex-A510"),
    ("0x41", "0xd47", "Cortex-A710"),
    ("0x41", "0xd48", "Cortex-X2"),
    ("0x41", "0xd49", "Neoverse N2"),
    ("0x41", "0xd4a", "Neoverse E1"),
    ("0x41", "0xd4b", "Cortex-A78AE"),
    ("0x41", "0xd4c", "Cortex-X1C"),
    ("0x41", "0xd4d", "Cortex-A715"),
    ("0x41", "0xd4e", "Cortex-X3"),
    ("0x41", "0xd4f", "Neoverse V2"),
    ("0x51", "0x800", "Kryo"),
    ("0x51", "0x801", "Kryo Silver"),
    ("0x51", "0x802", "Kryo Gold"),
    ("0x51", "0x803", "Kryo Silver"),
    ("0x51", "0x804", "Kryo Gold"),
];

fn cpuinfo() -> Option<HashMap<String, String>> {
    let text = probe::read_text("/proc/cpuinfo").ok()?;
    Some(probe::parse_colon_fields(&text))
}

fn cpuinfo_field(key: &str) -> Option<String> {
    cpuinfo()?.get(key).and_then(probe::non_empty)
}

pub fn arm_core_name(implementer: &str, part: &str) -> Option<&'static str> {
    ARM_CORES
        .iter()
        .find(|(i, p, _)| i.eq_ignore_ascii_case(implementer) && p.eq_ignore_ascii_case(part))
        .map(|(_, _, name)| *name)
}

fn arm_table(_host: &HostContext) -> Option<String> {
    let info = cpuinfo()?;
    let implementer = info.get("CPU implementer")?;
    let part = info.get("CPU part")?;
    Some(
        arm_core_name(implementer, part)
            .map(str::to_string)
            .unwrap_or_else(|| format!("ARM {implementer}:{part}")),
    )
}

fn lscpu(host: &HostContext) -> Option<String> {
    let out = host.command("lscpu", &[])?;
    probe::parse_colon_fields(&out)
        .get("Model name")
        .and_then(probe::non_empty)
}

pub fn name_chain(platform: Platform) -> Chain<String> {
    let linux = platform == Platform::Linux;
    Chain::new("cpu_name")
        .step_if(linux, "cpuinfo_model_name", |_| cpuinfo_field("model name"))
        .step_if(linux, "cpuinfo_hardware", |_| cpuinfo_field("Hardware"))
        .step_if(linux, "arm_table", arm_table)
        .step_if(linux, "lscpu", lscpu)
        .step_if(
            matches!(platform, Platform::MacOs | Platform::Bsd),
            "sysctl",
            |h| {
                h.sysctl("machdep.cpu.brand_string")
                    .or_else(|| h.sysctl("hw.model"))
            },
        )
        .step_if(platform == Platform::Windows, "wmic", |h| h.wmic("cpu", "Name"))
        .step("sysinfo", system::cpu_brand)
}

/// Strips vendor boilerplate and everything from the frequency marker on.
pub fn clean_name(name: &str) -> String {
    let mut out = name.to_string();
    for noise in NAME_NOISE {
        out = out.replace(noise, "");
    }
    if let Some(idx) = out.find('@') {
        out.truncate(idx);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `... @ 3.60GHz` -> 3600 (MHz).
pub fn frequency_from_name(name: &str) -> Option<u32> {
    let (_, tail) = name.split_once('@')?;
    let ghz: f64 = tail.trim().trim_end_matches("GHz").trim().parse().ok()?;
    Some((ghz * 1000.0).round() as u32)
}

/// Physical cores are the distinct (package, core) pairs of the topology.
fn physical_cores_sysfs() -> Option<u16> {
    let mut pairs = HashSet::new();
    for dir in probe::list_prefixed(CPU_SYSFS, &["cpu"]) {
        let topology = dir.join("topology");
        let Some(core) = probe::read_attr(topology.join("core_id")) else {
            continue;
        };
        let package = probe::read_attr(topology.join("physical_package_id")).unwrap_or_default();
        pairs.insert((package, core));
    }
    (!pairs.is_empty()).then(|| pairs.len() as u16)
}

/// Counts cpus in a kernel range list such as `0-3,6,8-9`.
pub fn count_cpu_list(list: &str) -> Option<u16> {
    let mut total = 0u16;
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((a, b)) => {
                let a: u16 = a.trim().parse().ok()?;
                let b: u16 = b.trim().parse().ok()?;
                total += b.checked_sub(a)? + 1;
            }
            None => {
                part.trim().parse::<u16>().ok()?;
                total += 1;
            }
        }
    }
    (total > 0).then_some(total)
}

fn khz_to_mhz(path: &Path) -> Option<u32> {
    probe::read_number::<u64>(path)
        .filter(|v| *v > 0)
        .map(|khz| (khz / 1000) as u32)
}

fn max_frequency_sysfs() -> Option<u32> {
    let cpufreq = Path::new(CPU_SYSFS).join("cpu0/cpufreq");
    ["bios_limit", "cpuinfo_max_freq", "scaling_max_freq"]
        .iter()
        .find_map(|leaf| khz_to_mhz(&cpufreq.join(leaf)))
}

fn base_frequency_sysfs() -> Option<u32> {
    khz_to_mhz(&Path::new(CPU_SYSFS).join("cpu0/cpufreq/base_frequency"))
}

/// First hwmon sensor owned by the CPU driver, else the first thermal zone.
fn temperature_linux() -> Option<f64> {
    for hwmon in probe::list_prefixed("/sys/class/hwmon", &["hwmon"]) {
        let Some(name) = probe::read_attr(hwmon.join("name")) else {
            continue;
        };
        if !["coretemp", "k10temp", "cpu"].iter().any(|n| name.contains(n)) {
            continue;
        }
        let reading = probe::list_prefixed(&hwmon, &["temp"])
            .into_iter()
            .filter(|p| p.to_string_lossy().ends_with("_input"))
            .find_map(|p| probe::read_number::<i64>(p));
        if let Some(milli) = reading {
            return Some(milli as f64 / 1000.0);
        }
    }
    probe::list_prefixed("/sys/class/thermal", &["thermal_zone"])
        .into_iter()
        .find_map(|zone| probe::read_number::<i64>(zone.join("temp")))
        .map(|milli| milli as f64 / 1000.0)
}

fn vendor(host: &HostContext) -> Option<String> {
    match host.platform {
        Platform::Linux => cpuinfo_field("vendor_id").or_else(|| cpuinfo_field("CPU implementer")),
        Platform::MacOs => host.sysctl("machdep.cpu.vendor"),
        Platform::Windows => host.wmic("cpu", "Manufacturer"),
        _ => None,
    }
}

fn core_counts(host: &HostContext) -> (u16, u16) {
    let (sys_physical, sys_logical) = system::cpu_counts(host).unwrap_or((0, 0));
    let logical = std::thread::available_parallelism()
        .map(|n| n.get() as u16)
        .unwrap_or(sys_logical);
    let physical = match host.platform {
        Platform::Linux => physical_cores_sysfs(),
        Platform::MacOs | Platform::Bsd => host
            .sysctl("hw.physicalcpu")
            .and_then(|v| v.parse().ok()),
        Platform::Windows => host
            .wmic("cpu", "NumberOfCores")
            .and_then(|v| v.parse().ok()),
        Platform::Other => None,
    }
    .unwrap_or(sys_physical);
    (physical, logical)
}

/// Builds the CPU record; the name comes from `name_chain`, the rest from
/// independent sources that may each be missing.
pub fn collect(host: &HostContext, name_chain: &Chain<String>) -> Option<Cpu> {
    let raw_name = name_chain.resolve(host)?;
    let (cores_physical, cores_logical) = core_counts(host);
    let linux = host.platform == Platform::Linux;

    let cores_online = linux
        .then(|| probe::read_attr(Path::new(CPU_SYSFS).join("online")))
        .flatten()
        .and_then(|list| count_cpu_list(&list))
        .unwrap_or(cores_logical);

    let name_freq = frequency_from_name(&raw_name);
    let frequency_max = linux
        .then(max_frequency_sysfs)
        .flatten()
        .or(name_freq)
        .unwrap_or(0);
    let frequency_base = linux
        .then(base_frequency_sysfs)
        .flatten()
        .or(name_freq)
        .unwrap_or(0);

    Some(Cpu {
        name: clean_name(&raw_name),
        vendor: vendor(host).unwrap_or_default(),
        cores_physical,
        cores_logical,
        cores_online,
        frequency_base,
        frequency_max,
        temperature: linux.then(temperature_linux).flatten().unwrap_or(0.0),
    })
}

/// Aggregate `cpu` line of /proc/stat as (busy, total) jiffies.
pub fn parse_proc_stat(text: &str) -> Option<(u64, u64)> {
    let line = text.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some((total - idle, total))
}

pub fn usage_between(first: (u64, u64), second: (u64, u64)) -> Option<f64> {
    let busy = second.0.checked_sub(first.0)?;
    let total = second.1.checked_sub(first.1)?;
    if total == 0 {
        return None;
    }
    Some(busy as f64 * 100.0 / total as f64)
}

fn usage_proc_stat(_host: &HostContext) -> Option<f64> {
    let first = parse_proc_stat(&probe::read_text("/proc/stat").ok()?)?;
    std::thread::sleep(USAGE_SAMPLE_GAP);
    let second = parse_proc_stat(&probe::read_text("/proc/stat").ok()?)?;
    usage_between(first, second)
}

pub fn usage_chain(platform: Platform) -> Chain<f64> {
    Chain::new("cpu_usage")
        .step_if(platform == Platform::Linux, "proc_stat", usage_proc_stat)
        .step("sysinfo", system::cpu_usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_vendor_boilerplate() {
        assert_eq!(
            clean_name("Intel(R) Core(TM) i7-8700 CPU @ 3.20GHz"),
            "Intel(R) Core(TM) i7-8700"
        );
        assert_eq!(
            clean_name("AMD Ryzen 7 5800H with Radeon Graphics"),
            "AMD Ryzen 7 5800H"
        );
        assert_eq!(clean_name("AMD Athlon II X2 Dual-Core Processor"), "AMD Athlon II X2");
    }

    #[test]
    fn frequency_marker_is_parsed() {
        assert_eq!(frequency_from_name("Intel Xeon E5-2670 @ 2.60GHz"), Some(2600));
        assert_eq!(frequency_from_name("Apple M2"), None);
    }

    #[test]
    fn arm_table_lookup() {
        assert_eq!(arm_core_name("0x41", "0xd0b"), Some("Cortex-A76"));
        assert_eq!(arm_core_name("0x51", "0x802"), Some("Kryo Gold"));
        assert_eq!(arm_core_name("0x61", "0x022"), None);
    }

    #[test]
    fn cpu_ranges_are_counted() {
        assert_eq!(count_cpu_list("0-7\n"), Some(8));
        assert_eq!(count_cpu_list("0-3,6,8-9"), Some(7));
        assert_eq!(count_cpu_list(""), None);
        assert_eq!(count_cpu_list("3-1"), None);
    }

    #[test]
    fn usage_from_two_stat_samples() {
        let a = parse_proc_stat("cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 1 2 3 4\n").unwrap();
        let b = parse_proc_stat("cpu  150 0 150 750 150 0 0 0 0 0\n").unwrap();
        assert_eq!(a, (200, 1000));
        let usage = usage_between(a, b).unwrap();
        assert!((usage - 50.0).abs() < f64::EPSILON);
        assert_eq!(usage_between(a, a), None);
        assert_eq!(parse_proc_stat("intr 1 2 3"), None);
    }

    #[test]
    fn collect_on_this_host() {
        let host = HostContext::for_tests();
        if let Some(cpu) = collect(&host, &name_chain(host.platform)) {
            assert!(!cpu.name.is_empty());
            assert!(!cpu.name.contains('@'));
            assert!(cpu.cores_logical >= 1);
        }
    }
}
