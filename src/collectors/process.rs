use crate::collectors::probe;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Read-only view of the process table.
pub trait ProcessInspector: Send + Sync {
    fn parent_of(&self, pid: u32) -> Option<u32>;
    fn command_of(&self, pid: u32) -> Option<String>;
    fn pids(&self) -> Vec<u32>;
}

/// Linux/procfs implementation.
pub struct ProcfsInspector {
    root: PathBuf,
}

impl ProcfsInspector {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pid_path(&self, pid: u32, leaf: &str) -> PathBuf {
        self.root.join(pid.to_string()).join(leaf)
    }
}

impl Default for ProcfsInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInspector for ProcfsInspector {
    fn parent_of(&self, pid: u32) -> Option<u32> {
        let status = probe::read_text(self.pid_path(pid, "status")).ok()?;
        parse_status_ppid(&status)
    }

    fn command_of(&self, pid: u32) -> Option<String> {
        let raw = std::fs::read(self.pid_path(pid, "cmdline")).ok()?;
        let first = raw.split(|b| *b == 0).next().unwrap_or_default();
        if let Some(cmd) = probe::non_empty(String::from_utf8_lossy(first)) {
            return Some(cmd);
        }
        // kernel threads and some sandboxed processes have an empty cmdline
        probe::read_attr(self.pid_path(pid, "comm"))
    }

    fn pids(&self) -> Vec<u32> {
        probe::list_dir(&self.root)
            .iter()
            .filter_map(|p| p.file_name()?.to_str()?.parse().ok())
            .collect()
    }
}

/// `ps`-based implementation for macOS and the BSDs.
pub struct PsInspector {
    timeout: Duration,
}

impl PsInspector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn field(&self, pid: u32, column: &str) -> Option<String> {
        let pid = pid.to_string();
        let out = probe::run("ps", &["-o", column, "-p", &pid], self.timeout).ok()?;
        probe::non_empty(out)
    }
}

impl ProcessInspector for PsInspector {
    fn parent_of(&self, pid: u32) -> Option<u32> {
        self.field(pid, "ppid=")?.parse().ok()
    }

    fn command_of(&self, pid: u32) -> Option<String> {
        self.field(pid, "comm=")
    }

    fn pids(&self) -> Vec<u32> {
        probe::run("ps", &["-axo", "pid="], self.timeout)
            .map(|out| out.lines().filter_map(|l| l.trim().parse().ok()).collect())
            .unwrap_or_default()
    }
}

/// Inspector for platforms without a usable process table.
pub struct NullInspector;

impl ProcessInspector for NullInspector {
    fn parent_of(&self, _pid: u32) -> Option<u32> {
        None
    }

    fn command_of(&self, _pid: u32) -> Option<String> {
        None
    }

    fn pids(&self) -> Vec<u32> {
        Vec::new()
    }
}

fn parse_status_ppid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("PPid:"))
        .and_then(|v| v.trim().parse().ok())
}

/// Executable base name of a command line: `/usr/bin/kitty --single` -> `kitty`,
/// `-zsh` -> `zsh`, `C:\x\WindowsTerminal.exe` -> `WindowsTerminal`.
pub fn executable_name(command: &str) -> String {
    // retitled processes pack their arguments into argv[0]
    let first = command.split(" -").next().unwrap_or(command).trim();
    let base = first.rsplit(['/', '\\']).next().unwrap_or(first);
    let base = base.trim_start_matches('-');
    let base = Path::new(base)
        .file_stem()
        .filter(|_| base.to_ascii_lowercase().ends_with(".exe"))
        .and_then(|s| s.to_str())
        .unwrap_or(base);
    base.to_string()
}

/// Base names of every running process.
pub fn running_names(inspector: &dyn ProcessInspector) -> Vec<String> {
    inspector
        .pids()
        .into_iter()
        .filter_map(|pid| inspector.command_of(pid))
        .map(|cmd| executable_name(&cmd))
        .collect()
}

/// First table entry (in table order) whose executable is running.
/// Entries map a display label to the executables that identify it.
pub fn find_running(
    inspector: &dyn ProcessInspector,
    table: &[(&str, &[&str])],
) -> Option<String> {
    let names = running_names(inspector);
    match_running(&names, table)
}

pub fn match_running(names: &[String], table: &[(&str, &[&str])]) -> Option<String> {
    table
        .iter()
        .find(|(_, executables)| {
            executables
                .iter()
                .any(|exe| names.iter().any(|name| name == exe))
        })
        .map(|(label, _)| (*label).to_string())
}

#[cfg(test)]
pub mod testing {
    use super::ProcessInspector;
    use std::collections::HashMap;

    /// Synthetic process table keyed by pid: (parent pid, command line).
    #[derive(Default)]
    pub struct FakeInspector {
        procs: HashMap<u32, (u32, String)>,
    }

    impl FakeInspector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, pid: u32, ppid: u32, command: &str) -> Self {
            self.procs.insert(pid, (ppid, command.to_string()));
            self
        }

        /// Builds a straight ancestor chain; `commands[0]` is the given `start` pid
        /// and each following command is its parent.
        pub fn chain(start: u32, commands: &[&str]) -> Self {
            let mut fake = Self::new();
            for (i, cmd) in commands.iter().enumerate() {
                let pid = start + i as u32;
                fake = fake.with(pid, pid + 1, cmd);
            }
            fake
        }
    }

    impl ProcessInspector for FakeInspector {
        fn parent_of(&self, pid: u32) -> Option<u32> {
            self.procs.get(&pid).map(|(ppid, _)| *ppid)
        }

        fn command_of(&self, pid: u32) -> Option<String> {
            self.procs.get(&pid).map(|(_, cmd)| cmd.clone())
        }

        fn pids(&self) -> Vec<u32> {
            let mut pids: Vec<u32> = self.procs.keys().copied().collect();
            pids.sort_unstable();
            pids
        }
    }
}
