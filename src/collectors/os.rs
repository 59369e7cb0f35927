use crate::collectors::chain::{Chain, Platform};
use crate::collectors::probe;
use crate::collectors::{system, HostContext};
use crate::snapshot::{Bios, HostInfo, OperatingSystem};
use std::collections::HashMap;

const OS_RELEASE_PATHS: &[&str] = &["/etc/os-release", "/usr/lib/os-release"];
const DMI: &str = "/sys/class/dmi/id";

/// Key/value contents of an os-release file.
#[derive(Debug, Clone, Default)]
pub struct OsRelease {
    fields: HashMap<String, String>,
}

impl OsRelease {
    pub fn parse(text: &str) -> Option<Self> {
        let fields = probe::parse_key_values(text);
        (!fields.is_empty()).then_some(Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn field(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_string()
    }

    /// `PRETTY_NAME`, else `NAME VERSION`.
    pub fn distro(&self) -> Option<String> {
        if let Some(pretty) = self.get("PRETTY_NAME") {
            return Some(pretty.to_string());
        }
        let name = self.get("NAME")?;
        Some(match self.get("VERSION") {
            Some(version) => format!("{name} {version}"),
            None => name.to_string(),
        })
    }
}

pub(crate) fn read_os_release() -> Option<OsRelease> {
    OS_RELEASE_PATHS
        .iter()
        .find_map(|path| OsRelease::parse(&probe::read_text(path).ok()?))
}

fn from_os_release(host: &HostContext) -> Option<OperatingSystem> {
    let release = host.os_release()?;
    Some(OperatingSystem {
        name: host.platform.as_str().to_string(),
        pretty_name: release.field("PRETTY_NAME"),
        distro: release.distro()?,
        id_like: release.field("ID_LIKE"),
        version: release.field("VERSION"),
        version_id: release.field("VERSION_ID"),
        codename: release.field("VERSION_CODENAME"),
        build_id: release.field("BUILD_ID"),
        variant: release.field("VARIANT"),
        variant_id: release.field("VARIANT_ID"),
        arch: std::env::consts::ARCH.to_string(),
    })
}

fn from_sw_vers(host: &HostContext) -> Option<OperatingSystem> {
    let out = host.command("sw_vers", &[])?;
    let fields = probe::parse_colon_fields(&out);
    let name = fields.get("ProductName")?.clone();
    let version = fields.get("ProductVersion").cloned().unwrap_or_default();
    Some(OperatingSystem {
        name: host.platform.as_str().to_string(),
        pretty_name: format!("{name} {version}").trim().to_string(),
        distro: format!("{name} {version}").trim().to_string(),
        version_id: version.clone(),
        version,
        build_id: fields.get("BuildVersion").cloned().unwrap_or_default(),
        arch: std::env::consts::ARCH.to_string(),
        ..OperatingSystem::default()
    })
}

fn from_sysinfo(host: &HostContext) -> Option<OperatingSystem> {
    let (name, version) = system::os_name(host)?;
    let distro = match &version {
        Some(v) => format!("{name} {v}"),
        None => name,
    };
    Some(OperatingSystem {
        name: host.platform.as_str().to_string(),
        distro,
        version: version.unwrap_or_default(),
        arch: std::env::consts::ARCH.to_string(),
        ..OperatingSystem::default()
    })
}

fn platform_only(host: &HostContext) -> Option<OperatingSystem> {
    Some(OperatingSystem {
        name: host.platform.as_str().to_string(),
        distro: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        ..OperatingSystem::default()
    })
}

pub fn chain(platform: Platform) -> Chain<OperatingSystem> {
    Chain::new("os")
        .step_if(platform != Platform::Windows, "os_release", from_os_release)
        .step_if(platform == Platform::MacOs, "sw_vers", from_sw_vers)
        .step("sysinfo", from_sysinfo)
        .step("platform", platform_only)
}

pub fn host_chain(platform: Platform) -> Chain<String> {
    Chain::new("host")
        .step_if(platform == Platform::Linux, "procfs", |_| {
            probe::read_attr("/proc/sys/kernel/hostname")
        })
        .step_if(platform.is_unix_like(), "etc_hostname", |_| {
            probe::read_attr("/etc/hostname")
        })
        .step("hostname", |h| h.command("hostname", &[]))
        .step("sysinfo", system::host_name)
}

pub fn user_chain(platform: Platform) -> Chain<String> {
    Chain::new("user")
        .step("env_user", |h| h.env.get("USER").map(str::to_string))
        .step("env_logname", |h| h.env.get("LOGNAME").map(str::to_string))
        .step_if(platform == Platform::Windows, "env_username", |h| {
            h.env.get("USERNAME").map(str::to_string)
        })
        .step_if(platform.is_unix_like(), "id", |h| h.command("id", &["-un"]))
}

pub fn kernel_chain(platform: Platform) -> Chain<String> {
    Chain::new("kernel")
        .step_if(platform == Platform::Linux, "procfs", |_| {
            probe::read_attr("/proc/sys/kernel/osrelease")
        })
        .step_if(platform.is_unix_like(), "uname", |h| h.command("uname", &["-r"]))
        .step("sysinfo", system::kernel_version)
}

pub fn uptime_chain(platform: Platform) -> Chain<u64> {
    Chain::new("uptime")
        .step_if(platform == Platform::Linux, "procfs", |_| {
            let text = probe::read_attr("/proc/uptime")?;
            parse_proc_uptime(&text)
        })
        .step_if(
            matches!(platform, Platform::MacOs | Platform::Bsd),
            "boottime",
            |h| {
                let boot = parse_boottime(&h.sysctl("kern.boottime")?)?;
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .ok()?
                    .as_secs();
                now.checked_sub(boot)
            },
        )
        .step("sysinfo", system::uptime_secs)
}

pub fn processes_chain(platform: Platform) -> Chain<u64> {
    Chain::new("processes")
        .step_if(platform == Platform::Linux, "procfs", |h| {
            let count = h.inspector.pids().len() as u64;
            (count > 0).then_some(count)
        })
        .step("sysinfo", system::process_count)
}

fn parse_proc_uptime(text: &str) -> Option<u64> {
    let secs: f64 = text.split_whitespace().next()?.parse().ok()?;
    Some(secs as u64)
}

/// `{ sec = 1700000000, usec = 0 } Tue Nov ...` -> 1700000000.
fn parse_boottime(text: &str) -> Option<u64> {
    let rest = text.split("sec =").nth(1)?;
    rest.split(',').next()?.trim().parse().ok()
}

/// `1 day, 2 hours, 5 mins`; minutes are always shown when nothing else is.
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs / 3_600) % 24;
    let minutes = (secs / 60) % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(plural(days, "day", "days"));
    }
    if hours > 0 {
        parts.push(plural(hours, "hour", "hours"));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(plural(minutes, "min", "mins"));
    }
    parts.join(", ")
}

fn plural(n: u64, one: &str, many: &str) -> String {
    if n == 1 {
        format!("1 {one}")
    } else {
        format!("{n} {many}")
    }
}

pub fn chassis_type(code: &str) -> &'static str {
    match code.trim() {
        "1" => "Other",
        "3" => "Desktop",
        "4" => "Low Profile Desktop",
        "5" => "Pizza Box",
        "6" => "Mini Tower",
        "7" => "Tower",
        "8" => "Portable",
        "9" => "Laptop",
        "10" => "Notebook",
        "11" => "Hand Held",
        "12" => "Docking Station",
        "13" => "All in One",
        "14" => "Sub Notebook",
        "15" => "Space-saving",
        "16" => "Lunch Box",
        "17" => "Main Server Chassis",
        "18" => "Expansion Chassis",
        "19" => "SubChassis",
        "20" => "Bus Expansion Chassis",
        "21" => "Peripheral Chassis",
        "22" => "RAID Chassis",
        "23" => "Rack Mount Chassis",
        "24" => "Sealed-case PC",
        "25" => "Multi-system",
        "26" => "Compact PCI",
        "27" => "Advanced TCA",
        "28" => "Blade",
        "29" => "Blade Enclosure",
        "30" => "Tablet",
        "31" => "Convertible",
        "32" => "Detachable",
        _ => "Unknown",
    }
}

fn dmi(attr: &str) -> String {
    probe::read_attr(format!("{DMI}/{attr}")).unwrap_or_default()
}

fn host_info_dmi(_host: &HostContext) -> Option<HostInfo> {
    let info = HostInfo {
        vendor: dmi("sys_vendor"),
        model: dmi("product_name"),
        version: dmi("product_version"),
        kind: probe::read_attr(format!("{DMI}/chassis_type"))
            .map(|c| chassis_type(&c).to_string())
            .unwrap_or_default(),
    };
    (!info.vendor.is_empty() || !info.model.is_empty()).then_some(info)
}

fn bios_dmi(_host: &HostContext) -> Option<Bios> {
    let bios = Bios {
        vendor: dmi("bios_vendor"),
        version: dmi("bios_version"),
        date: dmi("bios_date"),
        kind: if probe::path_exists("/sys/firmware/efi") {
            "UEFI"
        } else {
            "Legacy"
        }
        .to_string(),
    };
    (!bios.vendor.is_empty() || !bios.version.is_empty()).then_some(bios)
}

pub fn host_info_chain(platform: Platform) -> Chain<HostInfo> {
    Chain::new("host_info")
        .step_if(platform == Platform::Linux, "dmi", host_info_dmi)
        .step_if(platform == Platform::MacOs, "sysctl", |h| {
            Some(HostInfo {
                vendor: "Apple Inc.".to_string(),
                model: h.sysctl("hw.model")?,
                version: String::new(),
                kind: "Portable".to_string(),
            })
        })
        .step_if(platform == Platform::Windows, "wmic", |h| {
            let vendor = h.wmic("computersystem", "Manufacturer");
            let model = h.wmic("computersystem", "Model");
            if vendor.is_none() && model.is_none() {
                return None;
            }
            Some(HostInfo {
                vendor: vendor.unwrap_or_default(),
                model: model.unwrap_or_default(),
                ..HostInfo::default()
            })
        })
}

pub fn bios_chain(platform: Platform) -> Chain<Bios> {
    Chain::new("bios")
        .step_if(platform == Platform::Linux, "dmi", bios_dmi)
        .step_if(platform == Platform::MacOs, "apple", |_| {
            Some(Bios {
                vendor: "Apple Inc.".to_string(),
                kind: "UEFI".to_string(),
                ..Bios::default()
            })
        })
        .step_if(platform == Platform::Windows, "wmic", |h| {
            Some(Bios {
                vendor: h.wmic("bios", "Manufacturer")?,
                version: h.wmic("bios", "SMBIOSBIOSVersion").unwrap_or_default(),
                date: h.wmic("bios", "ReleaseDate").unwrap_or_default(),
                kind: "UEFI".to_string(),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_release_prefers_pretty_name() {
        let release = OsRelease::parse(
            "NAME=\"Fedora Linux\"\nVERSION=\"40 (Workstation Edition)\"\nID=fedora\n\
             PRETTY_NAME=\"Fedora Linux 40 (Workstation Edition)\"\nVARIANT_ID=workstation\n",
        )
        .unwrap();
        assert_eq!(
            release.distro().as_deref(),
            Some("Fedora Linux 40 (Workstation Edition)")
        );
        assert_eq!(release.get("VARIANT_ID"), Some("workstation"));
    }

    #[test]
    fn os_release_joins_name_and_version() {
        let release = OsRelease::parse("NAME=Alpine\nVERSION=3.20\n").unwrap();
        assert_eq!(release.distro().as_deref(), Some("Alpine 3.20"));
        let release = OsRelease::parse("NAME=Void\n").unwrap();
        assert_eq!(release.distro().as_deref(), Some("Void"));
        assert!(OsRelease::parse("# nothing\n").is_none());
    }

    #[test]
    fn os_release_is_memoized_per_host() {
        let host = HostContext::for_tests();
        let first = host.os_release().map(|r| r as *const OsRelease);
        let second = host.os_release().map(|r| r as *const OsRelease);
        assert_eq!(first, second);
    }

    #[test]
    fn uptime_formats_with_plurals() {
        assert_eq!(format_uptime(0), "0 mins");
        assert_eq!(format_uptime(60), "1 min");
        assert_eq!(format_uptime(3_600), "1 hour");
        assert_eq!(format_uptime(86_400 + 2 * 3_600 + 5 * 60), "1 day, 2 hours, 5 mins");
        assert_eq!(format_uptime(3 * 86_400 + 60), "3 days, 1 min");
    }

    #[test]
    fn uptime_sources_parse() {
        assert_eq!(parse_proc_uptime("12345.67 54321.00\n"), Some(12345));
        assert_eq!(
            parse_boottime("{ sec = 1700000000, usec = 12 } Tue Nov 14 22:13:20 2023"),
            Some(1_700_000_000)
        );
        assert_eq!(parse_boottime("garbage"), None);
    }

    #[test]
    fn chassis_codes_map_to_names() {
        assert_eq!(chassis_type("10"), "Notebook");
        assert_eq!(chassis_type(" 3\n"), "Desktop");
        assert_eq!(chassis_type("99"), "Unknown");
    }

    #[test]
    fn os_chain_always_resolves() {
        let host = HostContext::for_tests();
        let os = chain(host.platform).resolve(&host).unwrap();
        assert!(!os.distro.is_empty());
        assert_eq!(os.arch, std::env::consts::ARCH);
    }
}
