use crate::collectors::chain::{Chain, Platform};
use crate::collectors::probe;
use crate::collectors::HostContext;
use std::collections::HashSet;
use std::path::Path;

const PCI_DEVICES: &str = "/sys/bus/pci/devices";
const DISPLAY_CLASS_PREFIX: &str = "0x03";

const PCI_IDS_PATHS: &[&str] = &[
    "/usr/share/hwdata/pci.ids",
    "/usr/share/misc/pci.ids",
    "/usr/share/pci.ids",
    "/usr/local/share/pciids/pci.ids",
    "/opt/homebrew/share/pciids/pci.ids",
];

/// Long vendor names as printed by pci.ids and lspci, and their short tags.
const VENDOR_TAGS: &[(&str, &str)] = &[
    ("Advanced Micro Devices, Inc. [AMD/ATI]", "AMD"),
    ("Advanced Micro Devices, Inc. [AMD]", "AMD"),
    ("Advanced Micro Devices, Inc.", "AMD"),
    ("NVIDIA Corporation", "NVIDIA"),
    ("Intel Corporation", "Intel"),
    ("VMware", "VMware"),
    ("Red Hat, Inc.", "Red Hat"),
    ("Matrox Electronics Systems Ltd.", "Matrox"),
    ("ASPEED Technology, Inc.", "ASPEED"),
    ("Apple Inc.", "Apple"),
];

const LEGAL_SUFFIXES: &[&str] = &[
    " Corporation",
    " Co., Ltd.",
    " Technology, Inc.",
    ", Inc.",
    " Inc.",
    " Ltd.",
];

const HWMON_GPU_DRIVERS: &[&str] = &["amdgpu", "nouveau", "radeon"];

/// A display-class PCI function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PciDisplay {
    pub vendor: String,
    pub device: String,
}

fn hex_id(raw: &str) -> String {
    raw.trim().trim_start_matches("0x").to_ascii_lowercase()
}

/// Display controllers under `root`, one per (vendor, device) pair.
pub fn display_devices(root: impl AsRef<Path>) -> Vec<(PciDisplay, std::path::PathBuf)> {
    let mut seen = HashSet::new();
    probe::list_dir(root)
        .into_iter()
        .filter(|dir| {
            probe::read_attr(dir.join("class")).is_some_and(|c| c.starts_with(DISPLAY_CLASS_PREFIX))
        })
        .filter_map(|dir| {
            let id = PciDisplay {
                vendor: hex_id(&probe::read_attr(dir.join("vendor"))?),
                device: hex_id(&probe::read_attr(dir.join("device"))?),
            };
            seen.insert(id.clone()).then_some((id, dir))
        })
        .collect()
}

/// Model name the driver itself reports for the device, when it does.
fn driver_name(dir: &Path) -> Option<String> {
    if let Some(name) = probe::read_attr(dir.join("product_name")) {
        return Some(name);
    }
    let bus_id = dir.file_name()?.to_str()?;
    let info = probe::read_text(format!("/proc/driver/nvidia/gpus/{bus_id}/information")).ok()?;
    probe::parse_colon_fields(&info)
        .get("Model")
        .and_then(probe::non_empty)
}

/// Vendor and device names for an id pair from pci.ids content.
pub fn lookup_pci_ids(db: &str, vendor: &str, device: &str) -> Option<(String, String)> {
    let mut vendor_name: Option<&str> = None;
    for line in db.lines() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        if !line.starts_with('\t') {
            if vendor_name.is_some() {
                // left the vendor's block without finding the device
                return None;
            }
            // the class list at the end of the file starts with "C "
            if line.starts_with("C ") {
                return None;
            }
            let (id, name) = line.split_once(char::is_whitespace)?;
            if id.eq_ignore_ascii_case(vendor) {
                vendor_name = Some(name.trim());
            }
            continue;
        }
        let Some(vendor_name) = vendor_name else {
            continue;
        };
        if line.starts_with("\t\t") {
            continue;
        }
        let (id, name) = line.trim_start().split_once(char::is_whitespace)?;
        if id.eq_ignore_ascii_case(device) {
            return Some((vendor_name.to_string(), name.trim().to_string()));
        }
    }
    None
}

fn vendor_tag(vendor: &str) -> String {
    if let Some((_, tag)) = VENDOR_TAGS.iter().find(|(long, _)| vendor == *long) {
        return (*tag).to_string();
    }
    let mut short = vendor.to_string();
    for suffix in LEGAL_SUFFIXES {
        if let Some(stripped) = short.strip_suffix(suffix) {
            short = stripped.to_string();
        }
    }
    short.trim().to_string()
}

/// Short vendor tag plus the marketing name: brackets win over chip codenames,
/// revision suffixes are dropped, whitespace is collapsed.
pub fn normalize(vendor: &str, device: &str) -> String {
    let tag = vendor_tag(vendor);
    let mut name = device.to_string();
    if let Some(idx) = name.find(" (rev ") {
        name.truncate(idx);
    }
    if let (Some(open), Some(close)) = (name.rfind('['), name.rfind(']')) {
        if open < close {
            name = name[open + 1..close].to_string();
        }
    }
    let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if tag.is_empty() || name.starts_with(&tag) {
        name
    } else {
        format!("{tag} {name}")
    }
}

/// Splits `lspci` descriptions into (vendor, device) using the known vendors.
pub fn split_lspci_description(desc: &str) -> (String, String) {
    for (long, _) in VENDOR_TAGS {
        if let Some(rest) = desc.strip_prefix(long) {
            return ((*long).to_string(), rest.trim().to_string());
        }
    }
    match desc.split_once(' ') {
        Some((vendor, rest)) => (vendor.to_string(), rest.to_string()),
        None => (String::new(), desc.to_string()),
    }
}

pub fn parse_lspci(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.lines() {
        let Some((_, rest)) = line.split_once(' ') else {
            continue;
        };
        let Some((class, desc)) = rest.split_once(": ") else {
            continue;
        };
        if !["VGA compatible controller", "3D controller", "Display controller"].contains(&class) {
            continue;
        }
        let (vendor, device) = split_lspci_description(desc);
        let name = normalize(&vendor, &device);
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

fn join(names: Vec<String>) -> Option<String> {
    (!names.is_empty()).then(|| names.join(", "))
}

fn sysfs_driver(_host: &HostContext) -> Option<String> {
    let names = display_devices(PCI_DEVICES)
        .into_iter()
        .map(|(_, dir)| driver_name(&dir))
        .collect::<Option<Vec<String>>>()?;
    join(names)
}

fn sysfs_pci_ids(_host: &HostContext) -> Option<String> {
    let devices = display_devices(PCI_DEVICES);
    if devices.is_empty() {
        return None;
    }
    let db = PCI_IDS_PATHS
        .iter()
        .find_map(|path| probe::read_text(path).ok())?;
    let names = devices
        .iter()
        .map(|(id, _)| {
            lookup_pci_ids(&db, &id.vendor, &id.device).map(|(v, d)| normalize(&v, &d))
        })
        .collect::<Option<Vec<String>>>()?;
    join(names)
}

fn lspci(host: &HostContext) -> Option<String> {
    join(parse_lspci(&host.command("lspci", &[])?))
}

fn system_profiler(host: &HostContext) -> Option<String> {
    let out = host.command("system_profiler", &["SPDisplaysDataType"])?;
    let names: Vec<String> = out
        .lines()
        .filter_map(|l| l.trim().strip_prefix("Chipset Model:"))
        .map(|v| v.trim().to_string())
        .collect();
    join(names)
}

fn wmic_controllers(host: &HostContext) -> Option<String> {
    let out = host.command("wmic", &["path", "win32_VideoController", "get", "Name", "/format:list"])?;
    let names: Vec<String> = out
        .lines()
        .filter_map(|l| l.trim().strip_prefix("Name="))
        .filter_map(probe::non_empty)
        .collect();
    join(names)
}

pub fn chain(platform: Platform) -> Chain<String> {
    let linux = platform == Platform::Linux;
    Chain::new("gpu")
        .step_if(linux, "driver_attribute", sysfs_driver)
        .step_if(linux, "pci_ids", sysfs_pci_ids)
        .step_if(linux || platform == Platform::Bsd, "lspci", lspci)
        .step_if(platform == Platform::MacOs, "system_profiler", system_profiler)
        .step_if(platform == Platform::Windows, "wmic", wmic_controllers)
}

fn run_nvidia_smi(host: &HostContext, args: &[&str]) -> Option<String> {
    if let Some(out) = host.command("nvidia-smi", args) {
        return Some(out);
    }
    if host.platform == Platform::Windows {
        return host.command(r"C:\Windows\System32\nvidia-smi.exe", args);
    }
    None
}

fn nvidia_temp(host: &HostContext) -> Option<i32> {
    let out = run_nvidia_smi(
        host,
        &["--query-gpu=temperature.gpu", "--format=csv,noheader,nounits"],
    )?;
    out.lines()
        .find_map(probe::parse_f64_loose)
        .filter(|t| *t > 0.0)
        .map(|t| t.round() as i32)
}

fn hwmon_temp(_host: &HostContext) -> Option<i32> {
    probe::list_prefixed("/sys/class/hwmon", &["hwmon"])
        .into_iter()
        .filter(|dir| {
            probe::read_attr(dir.join("name")).is_some_and(|n| HWMON_GPU_DRIVERS.contains(&n.as_str()))
        })
        .find_map(|dir| probe::read_number::<i64>(dir.join("temp1_input")))
        .filter(|milli| *milli > 0)
        .map(|milli| (milli / 1000) as i32)
}

pub fn temp_chain(platform: Platform) -> Chain<i32> {
    Chain::new("gpu_temp")
        .step_if(
            matches!(platform, Platform::Linux | Platform::Windows),
            "nvidia_smi",
            nvidia_temp,
        )
        .step_if(platform == Platform::Linux, "hwmon", hwmon_temp)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PCI_IDS: &str = "\
# comment
1002  Advanced Micro Devices, Inc. [AMD/ATI]
\t73df  Navi 22 [Radeon RX 6700/6700 XT/6750 XT / 6800M/6850M XT]
\t\t1002 0e36  Radeon RX 6700 XT
10de  NVIDIA Corporation
\t2504  GA106 [GeForce RTX 3060 Lite Hash Rate]
\t2520  GA106M [GeForce RTX 3060 Mobile / Max-Q]
8086  Intel Corporation
\t3e92  CoffeeLake-S GT2 [UHD Graphics 630]
C 03  Display controller
";

    #[test]
    fn pci_ids_lookup_finds_device_under_vendor() {
        let (vendor, device) = lookup_pci_ids(PCI_IDS, "10de", "2504").unwrap();
        assert_eq!(vendor, "NVIDIA Corporation");
        assert_eq!(device, "GA106 [GeForce RTX 3060 Lite Hash Rate]");
        assert_eq!(lookup_pci_ids(PCI_IDS, "10de", "ffff"), None);
        assert_eq!(lookup_pci_ids(PCI_IDS, "abcd", "2504"), None);
    }

    #[test]
    fn normalization_prefers_marketing_name() {
        assert_eq!(
            normalize("NVIDIA Corporation", "GA106 [GeForce RTX 3060 Lite Hash Rate]"),
            "NVIDIA GeForce RTX 3060 Lite Hash Rate"
        );
        assert_eq!(
            normalize("Intel Corporation", "CoffeeLake-S GT2 [UHD Graphics 630] (rev 02)"),
            "Intel UHD Graphics 630"
        );
        assert_eq!(normalize("Acme Graphics Co., Ltd.", "Blitter   9000"), "Acme Graphics Blitter 9000");
    }

    #[test]
    fn lspci_lists_display_controllers_once() {
        let text = "\
00:02.0 VGA compatible controller: Intel Corporation CoffeeLake-S GT2 [UHD Graphics 630] (rev 02)
00:1f.3 Audio device: Intel Corporation Cannon Lake PCH cAVS (rev 10)
01:00.0 3D controller: NVIDIA Corporation GA106M [GeForce RTX 3060 Mobile / Max-Q] (rev a1)
03:00.0 VGA compatible controller: Advanced Micro Devices, Inc. [AMD/ATI] Navi 22 [Radeon RX 6700/6700 XT/6750 XT / 6800M/6850M XT] (rev c1)
";
        assert_eq!(
            parse_lspci(text),
            vec![
                "Intel UHD Graphics 630",
                "NVIDIA GeForce RTX 3060 Mobile / Max-Q",
                "AMD Radeon RX 6700/6700 XT/6750 XT / 6800M/6850M XT",
            ]
        );
    }

    #[test]
    fn display_devices_are_deduplicated() {
        let root = std::env::temp_dir().join(format!("netfetch-pci-{}", std::process::id()));
        for (bus, class, device) in [
            ("0000:01:00.0", "0x030000", "0x2504"),
            ("0000:01:00.1", "0x030000", "0x2504"),
            ("0000:01:00.2", "0x040300", "0x228e"),
        ] {
            let dir = root.join(bus);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("class"), class).unwrap();
            std::fs::write(dir.join("vendor"), "0x10de\n").unwrap();
            std::fs::write(dir.join("device"), device).unwrap();
        }
        let devices = display_devices(&root);
        std::fs::remove_dir_all(&root).unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(
            devices[0].0,
            PciDisplay {
                vendor: "10de".to_string(),
                device: "2504".to_string()
            }
        );
    }
}
