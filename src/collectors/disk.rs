use crate::collectors::chain::{Chain, Platform};
use crate::collectors::probe;
use crate::collectors::HostContext;
use crate::snapshot::{Disk, PhysicalDisk};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const PSEUDO_FS: &[&str] = &[
    "proc",
    "sysfs",
    "devpts",
    "devtmpfs",
    "tmpfs",
    "cgroup",
    "cgroup2",
    "pstore",
    "securityfs",
    "debugfs",
    "configfs",
    "tracefs",
    "nsfs",
    "mqueue",
    "hugetlbfs",
    "ramfs",
    "fusectl",
    "binfmt_misc",
    "overlay",
    "squashfs",
    "bpf",
    "autofs",
    "efivarfs",
    "devfs",
    "fdescfs",
    "nullfs",
];

const NOISY_MOUNTPOINTS: &[&str] = &[
    "/proc",
    "/sys",
    "/dev",
    "/run",
    "/var/lib/docker",
    "/var/lib/containers",
    "/snap",
    "/var/cache/pacman/pkg",
    "/var/lib/snapd",
    "/var/lib/kubelet",
    "/var/lib/flatpak",
    "/var/log",
    "/.snapshots",
    "/System/Volumes",
    "/private/var/vm",
];

const VIRTUAL_BLOCK_DEVICES: &[&str] = &["loop", "ram", "zram", "dm-", "md", "sr", "fd"];

/// One row of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mountpoint: String,
    pub fs_type: String,
}

/// Block usage of a mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub total: u64,
    pub free: u64,
}

/// Decodes the `\040`-style escapes the kernel writes into mount tables.
pub fn unescape_octal(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

pub fn parse_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some(MountEntry {
                device: unescape_octal(fields.next()?),
                mountpoint: unescape_octal(fields.next()?),
                fs_type: fields.next()?.to_string(),
            })
        })
        .collect()
}

fn under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

pub fn is_noise(entry: &MountEntry) -> bool {
    PSEUDO_FS.contains(&entry.fs_type.as_str())
        || NOISY_MOUNTPOINTS
            .iter()
            .any(|prefix| under(&entry.mountpoint, prefix))
}

/// Root first, then shorter mountpoints, then lexical order.
pub fn sort_volumes(volumes: &mut [Disk]) {
    volumes.sort_by(|a, b| {
        let a_root = a.mountpoint == "/";
        let b_root = b.mountpoint == "/";
        b_root
            .cmp(&a_root)
            .then(a.mountpoint.len().cmp(&b.mountpoint.len()))
            .then_with(|| a.mountpoint.cmp(&b.mountpoint))
    });
}

fn volume(entry: &MountEntry, usage: Usage) -> Disk {
    let used = usage.total.saturating_sub(usage.free);
    Disk {
        total: usage.total,
        used,
        free: usage.free,
        used_percent: percent(used, usage.total),
        mountpoint: entry.mountpoint.clone(),
        fs_type: entry.fs_type.clone(),
        device: entry.device.clone(),
        label: String::new(),
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 * 100.0 / total as f64
    }
}

/// Filters noise, keeps the first entry per mountpoint, stats each survivor
/// with `stat`, and orders the result. Entries `stat` cannot read are dropped.
pub fn resolve_volumes<F>(entries: &[MountEntry], stat: F) -> Vec<Disk>
where
    F: Fn(&str) -> Option<Usage>,
{
    let mut seen = HashSet::new();
    let mut volumes: Vec<Disk> = entries
        .iter()
        .filter(|e| !is_noise(e))
        .filter(|e| seen.insert(e.mountpoint.clone()))
        .filter_map(|e| Some(volume(e, stat(&e.mountpoint)?)))
        .collect();
    sort_volumes(&mut volumes);
    volumes
}

/// The volume shown as "the" disk: the root filesystem, else the first.
pub fn primary(volumes: &[Disk]) -> Option<&Disk> {
    volumes
        .iter()
        .find(|d| d.mountpoint == "/")
        .or_else(|| volumes.first())
}

#[cfg(unix)]
fn statvfs_usage(mountpoint: &str) -> Option<Usage> {
    let stat = nix::sys::statvfs::statvfs(mountpoint).ok()?;
    let mut unit = stat.fragment_size() as u64;
    if unit == 0 {
        unit = stat.block_size() as u64;
    }
    Some(Usage {
        total: stat.blocks() as u64 * unit,
        free: stat.blocks_available() as u64 * unit,
    })
}

#[cfg(not(unix))]
fn statvfs_usage(_mountpoint: &str) -> Option<Usage> {
    None
}

fn volumes_procfs(_host: &HostContext) -> Option<Vec<Disk>> {
    let text = probe::read_text("/proc/self/mounts").ok()?;
    let volumes = resolve_volumes(&parse_mounts(&text), statvfs_usage);
    (!volumes.is_empty()).then_some(volumes)
}

/// `mount` output on macOS/BSD: `/dev/disk3s1 on / (apfs, local, journaled)`.
pub fn parse_bsd_mount_types(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once(" on ")?;
            let (mountpoint, options) = rest.rsplit_once(" (")?;
            let fs_type = options.split([',', ')']).next()?.trim();
            Some((mountpoint.to_string(), fs_type.to_string()))
        })
        .collect()
}

/// `df -kP` rows as mount entries with their usage.
pub fn parse_df(text: &str, fs_types: &HashMap<String, String>) -> Vec<(MountEntry, Usage)> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return None;
            }
            let total_kib: u64 = fields[1].parse().ok()?;
            let free_kib: u64 = fields[3].parse().ok()?;
            let mountpoint = fields[5..].join(" ");
            let entry = MountEntry {
                device: fields[0].to_string(),
                fs_type: fs_types.get(&mountpoint).cloned().unwrap_or_default(),
                mountpoint,
            };
            Some((
                entry,
                Usage {
                    total: total_kib * 1024,
                    free: free_kib * 1024,
                },
            ))
        })
        .collect()
}

fn volumes_df(host: &HostContext) -> Option<Vec<Disk>> {
    let df = host.command("df", &["-kP"])?;
    let fs_types = host
        .command("mount", &[])
        .map(|out| parse_bsd_mount_types(&out))
        .unwrap_or_default();
    let rows = parse_df(&df, &fs_types);
    let usage: HashMap<String, Usage> = rows
        .iter()
        .map(|(e, u)| (e.mountpoint.clone(), *u))
        .collect();
    let entries: Vec<MountEntry> = rows.into_iter().map(|(e, _)| e).collect();
    let volumes = resolve_volumes(&entries, |mp| usage.get(mp).copied());
    (!volumes.is_empty()).then_some(volumes)
}

/// `wmic logicaldisk ... /format:csv` rows, keyed by header name.
pub fn parse_wmic_logical_disks(text: &str) -> Vec<Disk> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<&str> = header.split(',').collect();
    let index = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));
    let (Some(id), Some(fs), Some(free), Some(size)) = (
        index("DeviceID"),
        index("FileSystem"),
        index("FreeSpace"),
        index("Size"),
    ) else {
        return Vec::new();
    };
    let label = index("VolumeName");

    lines
        .filter_map(|line| {
            let row: Vec<&str> = line.split(',').collect();
            let total: u64 = row.get(size)?.parse().ok()?;
            let free: u64 = row.get(free)?.parse().ok()?;
            let used = total.saturating_sub(free);
            Some(Disk {
                total,
                used,
                free,
                used_percent: percent(used, total),
                mountpoint: format!("{}\\", row.get(id)?),
                fs_type: row.get(fs).unwrap_or(&"").to_string(),
                device: row.get(id)?.to_string(),
                label: label
                    .and_then(|i| row.get(i))
                    .unwrap_or(&"")
                    .to_string(),
            })
        })
        .collect()
}

fn volumes_wmic(host: &HostContext) -> Option<Vec<Disk>> {
    let out = host.command(
        "wmic",
        &[
            "logicaldisk",
            "where",
            "DriveType=3",
            "get",
            "DeviceID,FileSystem,FreeSpace,Size,VolumeName",
            "/format:csv",
        ],
    )?;
    let mut volumes = parse_wmic_logical_disks(&out);
    volumes.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));
    (!volumes.is_empty()).then_some(volumes)
}

pub fn volumes_chain(platform: Platform) -> Chain<Vec<Disk>> {
    Chain::new("disk")
        .step_if(platform == Platform::Linux, "proc_mounts", volumes_procfs)
        .step_if(
            matches!(platform, Platform::MacOs | Platform::Bsd),
            "df",
            volumes_df,
        )
        .step_if(platform == Platform::Windows, "wmic", volumes_wmic)
}

fn physical_disk(dir: &Path) -> Option<PhysicalDisk> {
    let name = dir.file_name()?.to_str()?.to_string();
    if VIRTUAL_BLOCK_DEVICES.iter().any(|p| name.starts_with(p)) {
        return None;
    }
    let sectors: u64 = probe::read_number(dir.join("size")).unwrap_or(0);
    let model = probe::read_attr(dir.join("device/model"))
        .or_else(|| probe::read_attr(dir.join("device/name")))
        .unwrap_or_default();
    let rotational = probe::read_attr(dir.join("queue/rotational")).as_deref() == Some("1");
    Some(PhysicalDisk {
        name,
        model,
        size: sectors * 512,
        kind: if rotational { "HDD" } else { "SSD" }.to_string(),
        rotational,
    })
}

pub fn physical_disks_in(root: impl AsRef<Path>) -> Vec<PhysicalDisk> {
    probe::list_dir(root)
        .iter()
        .filter_map(|dir| physical_disk(dir))
        .collect()
}

pub fn physical_chain(platform: Platform) -> Chain<Vec<PhysicalDisk>> {
    Chain::new("physical_disks").step_if(platform == Platform::Linux, "sys_block", |_| {
        let disks = physical_disks_in("/sys/block");
        (!disks.is_empty()).then_some(disks)
    })
}
