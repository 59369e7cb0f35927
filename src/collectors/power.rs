use crate::collectors::chain::{Chain, Platform};
use crate::collectors::probe;
use crate::collectors::HostContext;
use crate::snapshot::{Battery, PowerAdapter};
use std::path::{Path, PathBuf};

const POWER_SUPPLY: &str = "/sys/class/power_supply";
const AC_SUFFIX: &str = "AC Connected";

fn with_ac(status: &str, ac_online: bool) -> String {
    match (status.is_empty(), ac_online) {
        (_, false) => status.to_string(),
        (true, true) => AC_SUFFIX.to_string(),
        (false, true) => format!("{status}, {AC_SUFFIX}"),
    }
}

fn normalize_status(raw: &str) -> String {
    match raw {
        "Not charging" => "Not Charging".to_string(),
        other => other.to_string(),
    }
}

fn adapter_dirs(root: &Path) -> Vec<PathBuf> {
    probe::list_prefixed(root, &["AC", "ADP"])
}

/// First adapter under `root` that reports `online`.
pub fn adapter_in(root: impl AsRef<Path>) -> Option<PowerAdapter> {
    adapter_dirs(root.as_ref())
        .into_iter()
        .find_map(|dir| probe::read_attr(dir.join("online")))
        .map(|online| PowerAdapter {
            is_connected: online == "1",
        })
}

/// Battery from a power_supply tree: `BAT*`, else `battery`. A missing
/// status still yields the percentage.
pub fn battery_in(root: impl AsRef<Path>) -> Option<Battery> {
    let root = root.as_ref();
    let mut dirs = probe::list_prefixed(root, &["BAT"]);
    if dirs.is_empty() {
        dirs.push(root.join("battery"));
    }
    let ac_online = adapter_in(root).is_some_and(|a| a.is_connected);
    dirs.into_iter().find_map(|dir| {
        let percentage = probe::read_attr(dir.join("capacity"))
            .as_deref()
            .and_then(probe::parse_f64_loose)?;
        let status = probe::read_attr(dir.join("status"))
            .map(|s| normalize_status(&s))
            .unwrap_or_default();
        Some(Battery {
            percentage,
            status: with_ac(&status, ac_online),
        })
    })
}

/// ` -InternalBattery-0 (id=1234)	87%; charging; 1:02 remaining present: true`
pub fn parse_pmset_battery(text: &str) -> Option<Battery> {
    let line = text.lines().nth(1)?;
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let idx = tokens.iter().position(|t| t.trim_end_matches(';').ends_with('%'))?;
    let percentage: f64 = tokens[idx]
        .trim_end_matches(';')
        .trim_end_matches('%')
        .parse()
        .ok()?;
    let status = match tokens.get(idx + 1).map(|s| s.trim_end_matches(';')) {
        Some("charging") => "Charging, AC Connected".to_string(),
        Some("discharging") => "Discharging".to_string(),
        Some("charged") => "Full, AC Connected".to_string(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    Some(Battery { percentage, status })
}

fn pmset(host: &HostContext) -> Option<String> {
    host.command("pmset", &["-g", "batt"])
}

fn wmic_battery_status(code: u32) -> &'static str {
    match code {
        1 => "Discharging",
        2 => "Charging, AC Connected",
        3 => "Full, AC Connected",
        _ => "Unknown",
    }
}

pub fn parse_wmic_battery(text: &str) -> Option<Battery> {
    let percentage = probe::wmic_value(text, "EstimatedChargeRemaining")?
        .parse::<f64>()
        .ok()
        .filter(|p| *p > 0.0)?;
    let status = probe::wmic_value(text, "BatteryStatus")
        .and_then(|s| s.parse::<u32>().ok())
        .map(wmic_battery_status)
        .unwrap_or_default()
        .to_string();
    Some(Battery { percentage, status })
}

fn wmic_win32_battery(host: &HostContext) -> Option<String> {
    host.command(
        "wmic",
        &[
            "path",
            "Win32_Battery",
            "get",
            "EstimatedChargeRemaining,BatteryStatus",
            "/format:list",
        ],
    )
}

fn bsd_battery(host: &HostContext) -> Option<Battery> {
    let percentage = probe::parse_f64_loose(&host.sysctl("hw.acpi.battery.life")?)?;
    let status = match host.sysctl("hw.acpi.battery.state").as_deref() {
        Some("0") => "Full",
        Some("1") => "Discharging",
        Some("2") => "Charging",
        _ => "",
    };
    let ac_online = host.sysctl("hw.acpi.acline").as_deref() == Some("1");
    let status = if status == "Full" {
        status.to_string()
    } else {
        with_ac(status, ac_online)
    };
    Some(Battery { percentage, status })
}

pub fn battery_chain(platform: Platform) -> Chain<Battery> {
    Chain::new("battery")
        .step_if(platform == Platform::Linux, "power_supply", |_| {
            battery_in(POWER_SUPPLY)
        })
        .step_if(platform == Platform::MacOs, "pmset", |host| {
            parse_pmset_battery(&pmset(host)?)
        })
        .step_if(platform == Platform::Windows, "wmic", |host| {
            parse_wmic_battery(&wmic_win32_battery(host)?)
        })
        .step_if(platform == Platform::Bsd, "sysctl", bsd_battery)
}

pub fn adapter_chain(platform: Platform) -> Chain<PowerAdapter> {
    Chain::new("power_adapter")
        .step_if(platform == Platform::Linux, "power_supply", |_| {
            adapter_in(POWER_SUPPLY)
        })
        .step_if(platform == Platform::MacOs, "pmset", |host| {
            let out = pmset(host)?;
            Some(PowerAdapter {
                is_connected: out.contains("AC Power"),
            })
        })
        .step_if(platform == Platform::Windows, "wmic", |host| {
            let out = wmic_win32_battery(host)?;
            let code: u32 = probe::wmic_value(&out, "BatteryStatus")?.parse().ok()?;
            Some(PowerAdapter {
                is_connected: code == 2 || code == 3,
            })
        })
        .step_if(platform == Platform::Bsd, "sysctl", |host| {
            let acline = host.sysctl("hw.acpi.acline")?;
            Some(PowerAdapter {
                is_connected: acline == "1",
            })
        })
}
