use serde::{Deserialize, Serialize};

/// Everything known about the host. Each sub-record is published whole by the
/// module that owns it; fields from different modules may be of different ages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub os: Option<OperatingSystem>,
    pub host: String,
    pub user: String,
    pub kernel: String,
    pub uptime: String,
    pub packages: String,
    pub shell: String,
    pub resolution: String,
    pub de: String,
    pub wm: String,
    pub wm_theme: String,
    pub theme: String,
    pub icons: String,
    pub font: String,
    pub cursor: String,
    pub terminal: String,
    pub cpu: Option<Cpu>,
    pub gpu: String,
    pub gpu_temp: i32,
    pub memory: Option<Memory>,
    pub swap: Option<Swap>,
    pub disk: Option<Disk>,
    pub disks: Vec<Disk>,
    pub physical_disks: Vec<PhysicalDisk>,
    pub network: Option<Network>,
    pub local_ip: Vec<String>,
    pub battery: Option<Battery>,
    pub power_adapter: Option<PowerAdapter>,
    pub locale: String,
    pub host_info: Option<HostInfo>,
    pub bios: Option<Bios>,
    pub processes: u64,
    pub cpu_usage: f64,
    pub public_ip: String,
    pub wifi: Option<Wifi>,
    pub datetime: String,
    pub users: Vec<UserSession>,
    pub brightness: Option<Brightness>,
    pub login_manager: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatingSystem {
    pub name: String,
    pub pretty_name: String,
    pub distro: String,
    pub id_like: String,
    pub version: String,
    pub version_id: String,
    pub codename: String,
    pub build_id: String,
    pub variant: String,
    pub variant_id: String,
    pub arch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cpu {
    pub name: String,
    pub vendor: String,
    pub cores_physical: u16,
    pub cores_logical: u16,
    pub cores_online: u16,
    /// MHz
    pub frequency_base: u32,
    /// MHz
    pub frequency_max: u32,
    pub temperature: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Swap {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub device: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fs_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalDisk {
    pub name: String,
    pub model: String,
    /// bytes
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub rotational: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub percentage: f64,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerAdapter {
    pub is_connected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub vendor: String,
    pub model: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bios {
    pub vendor: String,
    pub version: String,
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wifi {
    pub ssid: String,
    pub protocol: String,
    pub frequency: String,
    pub security: String,
    /// 0..=100
    pub strength: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub name: String,
    pub terminal: String,
    pub login_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Brightness {
    pub current: u32,
    pub max: u32,
}

impl Brightness {
    pub fn percent(&self) -> u32 {
        if self.max == 0 {
            return 0;
        }
        ((u64::from(self.current) * 100) / u64::from(self.max)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_serializes_sentinels() {
        let json = serde_json::to_value(Snapshot::default()).unwrap();
        assert!(json["cpu"].is_null());
        assert_eq!(json["host"], "");
        assert_eq!(json["disks"], serde_json::json!([]));
        assert_eq!(json["processes"], 0);
    }

    #[test]
    fn disk_omits_empty_identity_fields() {
        let disk = Disk {
            total: 100,
            used: 40,
            free: 60,
            used_percent: 40.0,
            mountpoint: "/".to_string(),
            ..Disk::default()
        };
        let json = serde_json::to_value(&disk).unwrap();
        assert_eq!(json["mountpoint"], "/");
        assert!(json.get("label").is_none());
        assert!(json.get("fs_type").is_none());
    }

    #[test]
    fn kind_fields_use_type_key() {
        let bios = Bios {
            kind: "UEFI".to_string(),
            ..Bios::default()
        };
        let json = serde_json::to_value(&bios).unwrap();
        assert_eq!(json["type"], "UEFI");

        let back: Bios = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, "UEFI");
    }

    #[test]
    fn brightness_percent_handles_zero_max() {
        assert_eq!(Brightness { current: 5, max: 0 }.percent(), 0);
        assert_eq!(Brightness { current: 120, max: 255 }.percent(), 47);
    }
}
