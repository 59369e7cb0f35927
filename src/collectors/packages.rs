use crate::collectors::chain::{Platform, UNKNOWN};
use crate::collectors::probe::{self, Environment, ProbeError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, warn};

type NativeListing = Arc<dyn Fn() -> Result<Vec<String>, ProbeError> + Send + Sync>;

/// How a manager enumerates its installed packages: one output line per package.
#[derive(Clone)]
pub enum Listing {
    Command {
        program: &'static str,
        args: Vec<String>,
    },
    Native(NativeListing),
}

impl Listing {
    pub fn command(program: &'static str, args: &[&str]) -> Self {
        Self::Command {
            program,
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    pub fn native<F>(f: F) -> Self
    where
        F: Fn() -> Result<Vec<String>, ProbeError> + Send + Sync + 'static,
    {
        Self::Native(Arc::new(f))
    }

    async fn fetch(&self) -> Result<Vec<String>, ProbeError> {
        match self {
            Self::Command { program, args } => {
                let output = Command::new(program)
                    .args(args)
                    .kill_on_drop(true)
                    .stdin(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .output()
                    .await
                    .map_err(|source| ProbeError::Spawn {
                        program: (*program).to_string(),
                        source,
                    })?;
                if !output.status.success() {
                    return Err(ProbeError::Exit {
                        program: (*program).to_string(),
                        status: output.status.to_string(),
                    });
                }
                Ok(probe::decode_cmd_stdout(&output.stdout)
                    .lines()
                    .map(str::to_string)
                    .collect())
            }
            Self::Native(list) => {
                let list = list.clone();
                tokio::task::spawn_blocking(move || list())
                    .await
                    .map_err(|err| ProbeError::Join(err.to_string()))?
            }
        }
    }
}

#[derive(Clone)]
pub struct Manager {
    pub name: &'static str,
    /// Variants of one manager (formula/cask) share a family and one display entry.
    pub family: &'static str,
    pub listing: Listing,
    pub filter: Option<fn(&str) -> bool>,
    /// Header/footer lines the listing prints around the packages.
    pub offset: usize,
}

impl Manager {
    pub fn new(name: &'static str, listing: Listing) -> Self {
        Self {
            name,
            family: name,
            listing,
            filter: None,
            offset: 0,
        }
    }

    pub fn family(mut self, family: &'static str) -> Self {
        self.family = family;
        self
    }

    pub fn filter(mut self, filter: fn(&str) -> bool) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn count(&self, lines: &[String]) -> usize {
        lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .filter(|l| self.filter.map_or(true, |f| f(l)))
            .count()
            .saturating_sub(self.offset)
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub manager: &'static str,
    pub family: &'static str,
    pub count: usize,
    pub error: Option<String>,
    order: usize,
}

/// Runs every manager concurrently and waits for all of them. A manager that
/// fails or exceeds `timeout` reports an error without affecting the others.
/// Reports come back in registration order.
pub async fn census(managers: Vec<Manager>, timeout: Duration) -> Vec<Report> {
    let mut workers = JoinSet::new();
    for (order, manager) in managers.into_iter().enumerate() {
        workers.spawn(async move {
            let outcome = time::timeout(timeout, manager.listing.fetch()).await;
            let (count, error) = match outcome {
                Ok(Ok(lines)) => (manager.count(&lines), None),
                Ok(Err(err)) => {
                    if is_not_installed(&err) {
                        debug!(manager = manager.name, error = %err, "package manager not installed");
                    } else {
                        warn!(manager = manager.name, error = %err, "package census failed");
                    }
                    (0, Some(err.to_string()))
                }
                Err(_) => {
                    warn!(manager = manager.name, timeout = ?timeout, "package census timed out");
                    (0, Some(format!("timed out after {timeout:?}")))
                }
            };
            Report {
                manager: manager.name,
                family: manager.family,
                count,
                error,
                order,
            }
        });
    }

    let mut reports = Vec::with_capacity(workers.len());
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(err) => warn!(error = %err, "package census worker panicked"),
        }
    }
    reports.sort_by_key(|r| r.order);
    reports
}

/// A listing command missing from the host is expected, not a failure worth a warning.
fn is_not_installed(err: &ProbeError) -> bool {
    matches!(err, ProbeError::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
}

/// `"<total> (<count> (<family>), ...)"`, or `Unknown` when nothing was counted.
pub fn summarize(reports: &[Report]) -> String {
    let mut families: Vec<(&str, usize)> = Vec::new();
    for report in reports.iter().filter(|r| r.error.is_none() && r.count > 0) {
        match families.iter_mut().find(|(f, _)| *f == report.family) {
            Some((_, count)) => *count += report.count,
            None => families.push((report.family, report.count)),
        }
    }

    let total: usize = families.iter().map(|(_, c)| c).sum();
    if total == 0 {
        return UNKNOWN.to_string();
    }
    let details: Vec<String> = families
        .iter()
        .map(|(family, count)| format!("{count} ({family})"))
        .collect();
    format!("{total} ({})", details.join(", "))
}

/// Managers whose presence markers exist on this host, in display order.
pub fn detect_managers(platform: Platform, env: &Environment) -> Vec<Manager> {
    let home = env.home();
    let mut out = Vec::new();

    match platform {
        Platform::Linux => {
            if probe::path_exists("/var/lib/dpkg/status") {
                out.push(Manager::new("dpkg", Listing::native(list_dpkg)));
            }
            if probe::path_exists("/var/lib/pacman/local") {
                out.push(Manager::new(
                    "pacman",
                    Listing::native(|| list_subdirs(Path::new("/var/lib/pacman/local"))),
                ));
            }
            if probe::path_exists("/var/lib/rpm") && env.which("rpm").is_some() {
                out.push(Manager::new("rpm", Listing::command("rpm", &["-qa"])));
            }
            if probe::path_exists("/var/db/pkg") {
                out.push(Manager::new("emerge", Listing::native(list_emerge)));
            }
            if env.which("xbps-query").is_some() {
                out.push(Manager::new("xbps", Listing::command("xbps-query", &["-l"])));
            }
            if probe::path_exists("/lib/apk/db/installed") && env.which("apk").is_some() {
                out.push(Manager::new("apk", Listing::command("apk", &["info"])));
            }
            let flatpak_dirs = flatpak_dirs(home.as_deref());
            if flatpak_dirs.iter().any(|d| d.exists()) {
                out.push(Manager::new(
                    "flatpak",
                    Listing::native(move || {
                        Ok(flatpak_dirs
                            .iter()
                            .flat_map(|d| list_subdirs(d).unwrap_or_default())
                            .collect())
                    }),
                ));
            }
            if probe::path_exists("/snap") && env.which("snap").is_some() {
                out.push(Manager::new("snap", Listing::command("snap", &["list"])).offset(1));
            }
        }
        Platform::Bsd => {
            if probe::path_exists("/var/db/pkg") && env.which("pkg").is_some() {
                out.push(Manager::new("pkg", Listing::command("pkg", &["info"])));
            }
        }
        _ => {}
    }

    if platform.is_unix_like() && probe::path_exists("/nix/var/nix/profiles") {
        out.push(nix_manager(home.as_deref()));
    }

    if platform == Platform::MacOs || platform == Platform::Linux {
        let prefixes = ["/opt/homebrew", "/usr/local", "/home/linuxbrew/.linuxbrew"];
        for (name, leaf) in [("brew", "Cellar"), ("brew-cask", "Caskroom")] {
            if let Some(dir) = prefixes
                .iter()
                .map(|p| Path::new(p).join(leaf))
                .find(|d| d.is_dir())
            {
                out.push(
                    Manager::new(name, Listing::native(move || list_subdirs(&dir))).family("brew"),
                );
            }
        }
    }

    out
}

pub async fn count_packages(
    platform: Platform,
    env: &Environment,
    timeout: Duration,
) -> (String, Vec<Report>) {
    let managers = detect_managers(platform, env);
    debug!(
        managers = ?managers.iter().map(|m| m.name).collect::<Vec<_>>(),
        "package managers detected"
    );
    let reports = census(managers, timeout).await;
    (summarize(&reports), reports)
}

fn nix_manager(home: Option<&Path>) -> Manager {
    let mut args = vec!["-qR".to_string(), "/nix/var/nix/profiles/default".to_string()];
    if let Some(home) = home {
        args.push(home.join(".nix-profile").display().to_string());
    }
    Manager::new(
        "nix",
        Listing::Command {
            program: "nix-store",
            args,
        },
    )
    .filter(|line| line.contains('-') && !line.ends_with(".drv"))
}

fn flatpak_dirs(home: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("/var/lib/flatpak/app")];
    if let Some(home) = home {
        dirs.push(home.join(".local/share/flatpak/app"));
    }
    dirs
}

fn list_subdirs(dir: &Path) -> Result<Vec<String>, ProbeError> {
    let entries = fs::read_dir(dir).map_err(|source| ProbeError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    Ok(entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| !n.starts_with('.'))
        .collect())
}

fn list_dpkg() -> Result<Vec<String>, ProbeError> {
    let text = probe::read_text("/var/lib/dpkg/status")?;
    parse_dpkg_status(&text)
}

/// Package names from a dpkg status database whose status is installed.
pub fn parse_dpkg_status(text: &str) -> Result<Vec<String>, ProbeError> {
    if !text.lines().any(|l| l.starts_with("Package:")) {
        return Err(ProbeError::Parse("dpkg status has no package stanzas".to_string()));
    }
    Ok(text
        .split("\n\n")
        .filter(|stanza| {
            stanza
                .lines()
                .any(|l| l.starts_with("Status:") && l.contains("install ok installed"))
        })
        .filter_map(|stanza| {
            stanza
                .lines()
                .find_map(|l| l.strip_prefix("Package:"))
                .map(|n| n.trim().to_string())
        })
        .collect())
}

fn list_emerge() -> Result<Vec<String>, ProbeError> {
    let root = Path::new("/var/db/pkg");
    let mut out = Vec::new();
    for category in list_subdirs(root)? {
        let packages = list_subdirs(&root.join(&category)).unwrap_or_default();
        out.extend(packages.into_iter().map(|p| format!("{category}/{p}")));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn lines(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("pkg-{i}")).collect()
    }

    fn synthetic(name: &'static str, result: Result<usize, &'static str>, delay: Duration) -> Manager {
        Manager::new(
            name,
            Listing::native(move || {
                std::thread::sleep(delay);
                match result {
                    Ok(n) => Ok(lines(n)),
                    Err(msg) => Err(ProbeError::Parse(msg.to_string())),
                }
            }),
        )
    }

    #[tokio::test]
    async fn aggregates_counts_and_skips_failures() {
        let a = synthetic("alpha", Ok(10), Duration::ZERO).filter(|l| l.starts_with("pkg-"));
        let b = synthetic("beta", Err("database locked"), Duration::ZERO);
        let c = synthetic("gamma", Ok(5), Duration::ZERO).offset(1);

        let reports = census(vec![a, b, c], Duration::from_secs(5)).await;
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].count, 10);
        assert!(reports[1].error.is_some());
        assert_eq!(reports[2].count, 4);
        assert_eq!(summarize(&reports), "14 (10 (alpha), 4 (gamma))");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn managers_run_in_parallel() {
        let delay = Duration::from_millis(300);
        let managers: Vec<Manager> = ["m1", "m2", "m3", "m4", "m5", "m6"]
            .into_iter()
            .map(|n| synthetic(n, Ok(1), delay))
            .collect();

        let started = Instant::now();
        let reports = census(managers, Duration::from_secs(10)).await;
        let elapsed = started.elapsed();

        assert_eq!(reports.len(), 6);
        assert!(reports.iter().all(|r| r.count == 1));
        assert!(
            elapsed < delay * 3,
            "census took {elapsed:?}, expected close to {delay:?}"
        );
    }

    #[tokio::test]
    async fn slow_manager_times_out_alone() {
        let fast = synthetic("fast", Ok(3), Duration::ZERO);
        let slow = synthetic("slow", Ok(50), Duration::from_millis(500));

        let reports = census(vec![fast, slow], Duration::from_millis(100)).await;
        assert_eq!(reports[0].count, 3);
        assert!(reports[1].error.as_deref().is_some_and(|e| e.contains("timed out")));
        assert_eq!(summarize(&reports), "3 (3 (fast))");
    }

    #[tokio::test]
    async fn families_share_one_entry() {
        let formula = synthetic("brew", Ok(7), Duration::ZERO).family("brew");
        let cask = synthetic("brew-cask", Ok(2), Duration::ZERO).family("brew");
        let nix = synthetic("nix", Ok(1), Duration::ZERO);
        let reports = census(vec![formula, cask, nix], Duration::from_secs(5)).await;
        assert_eq!(summarize(&reports), "10 (9 (brew), 1 (nix))");
    }

    #[test]
    fn nothing_counted_is_unknown() {
        assert_eq!(summarize(&[]), UNKNOWN);
        let zero = Report {
            manager: "x",
            family: "x",
            count: 0,
            error: None,
            order: 0,
        };
        assert_eq!(summarize(&[zero]), UNKNOWN);
    }

    #[test]
    fn offset_never_underflows() {
        let m = Manager::new("hdr", Listing::native(|| Ok(Vec::new()))).offset(3);
        assert_eq!(m.count(&lines(1)), 0);
        assert_eq!(m.count(&["".to_string(), "a".to_string()]), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_listing_counts_output_lines() {
        let m = Manager::new("printf", Listing::command("printf", &["Name\\na\\nb\\nc\\n"])).offset(1);
        let reports = census(vec![m], Duration::from_secs(5)).await;
        assert_eq!(reports[0].count, 3);
        assert!(reports[0].error.is_none());
    }

    #[test]
    fn dpkg_counts_only_installed() {
        let status = "Package: a\nStatus: install ok installed\n\n\
                      Package: b\nStatus: deinstall ok config-files\n\n\
                      Package: c\nStatus: install ok installed\n";
        assert_eq!(parse_dpkg_status(status).unwrap(), vec!["a", "c"]);
        assert!(matches!(
            parse_dpkg_status("garbage\n"),
            Err(ProbeError::Parse(_))
        ));
    }

    #[test]
    fn nix_store_paths_skip_derivations() {
        let nix = nix_manager(None);
        let listed: Vec<String> = [
            "/nix/store/abc-bash-5.2",
            "/nix/store/def-hello-2.12.drv",
            "/nix/store/ghi-coreutils-9.4",
            "nolabel",
        ]
        .iter()
        .map(|l| l.to_string())
        .collect();
        assert_eq!(nix.count(&listed), 2);
    }

    #[test]
    fn only_missing_commands_count_as_not_installed() {
        let missing = ProbeError::Spawn {
            program: "rpm".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let denied = ProbeError::Spawn {
            program: "rpm".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        let exited = ProbeError::Exit {
            program: "rpm".to_string(),
            status: "exit status: 1".to_string(),
        };
        assert!(is_not_installed(&missing));
        assert!(!is_not_installed(&denied));
        assert!(!is_not_installed(&exited));
    }
}
