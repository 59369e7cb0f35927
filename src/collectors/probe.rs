use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Exit { program: String, status: String },
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("parse: {0}")]
    Parse(String),
    #[error("worker join: {0}")]
    Join(String),
}

/// Immutable copy of the process environment, taken once per collector.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    #[cfg(test)]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Returns the variable only when it is set to something non-blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn home(&self) -> Option<PathBuf> {
        self.get("HOME")
            .or_else(|| self.get("USERPROFILE"))
            .map(PathBuf::from)
    }

    pub fn config_home(&self) -> Option<PathBuf> {
        self.get("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| self.home().map(|h| h.join(".config")))
    }

    /// Looks an executable up on the captured `PATH`.
    pub fn which(&self, program: &str) -> Option<PathBuf> {
        let path = self.get("PATH")?;
        let cwd = std::env::current_dir().ok()?;
        which::which_in(program, Some(path), cwd).ok()
    }
}

pub fn read_text(path: impl AsRef<Path>) -> Result<String, ProbeError> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|source| ProbeError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub fn read_trimmed(path: impl AsRef<Path>) -> Result<String, ProbeError> {
    read_text(path).map(|s| s.trim().to_string())
}

/// Reads a sysfs-style attribute, treating blank content as absent.
pub fn read_attr(path: impl AsRef<Path>) -> Option<String> {
    read_trimmed(path).ok().and_then(non_empty)
}

pub fn read_number<T: std::str::FromStr>(path: impl AsRef<Path>) -> Option<T> {
    read_attr(path)?.parse().ok()
}

pub fn non_empty(value: impl AsRef<str>) -> Option<String> {
    let trimmed = value.as_ref().trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn path_exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}

/// Sorted entries of a directory; missing directories yield nothing.
pub fn list_dir(path: impl AsRef<Path>) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };
    let mut out: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    out.sort();
    out
}

/// Entries of `dir` whose file name starts with one of `prefixes`.
pub fn list_prefixed(dir: impl AsRef<Path>, prefixes: &[&str]) -> Vec<PathBuf> {
    list_dir(dir)
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| prefixes.iter().any(|pre| n.starts_with(pre)))
        })
        .collect()
}

/// Runs a command and captures stdout, killing it once `timeout` elapses.
pub fn run(program: &str, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| ProbeError::Spawn {
            program: program.to_string(),
            source,
        })?;

    // a background grandchild may hold the pipe open after the child exits;
    // the reader is awaited only until the deadline
    let (tx, rx) = mpsc::channel();
    let stdout = child.stdout.take();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stdout) = stdout {
            let _ = stdout.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                return Err(ProbeError::Spawn {
                    program: program.to_string(),
                    source,
                })
            }
        }
    };

    let stdout = match rx.recv_timeout(timeout.saturating_sub(started.elapsed())) {
        Ok(buf) => buf,
        Err(RecvTimeoutError::Disconnected) => Vec::new(),
        Err(RecvTimeoutError::Timeout) => {
            return Err(ProbeError::Timeout {
                program: program.to_string(),
                timeout,
            })
        }
    };
    if !status.success() {
        return Err(ProbeError::Exit {
            program: program.to_string(),
            status: status.to_string(),
        });
    }
    Ok(decode_cmd_stdout(&stdout))
}

/// Windows tools may emit UTF-16LE; everything else is treated as UTF-8.
pub fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&units) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}

pub fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }
    if let Ok(v) = trimmed.replace(',', ".").parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .collect();
    if filtered.is_empty() {
        return None;
    }
    filtered.replace(',', ".").parse::<f64>().ok()
}

pub fn unquote(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '"' || c == '\'')
}

/// Parses `KEY=value` files (os-release, ini-like settings). Later keys win.
pub fn parse_key_values(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), unquote(v).to_string()))
        .collect()
}

/// Parses `key : value` listings such as /proc/cpuinfo; the first key wins.
pub fn parse_colon_fields(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        if let Some((k, v)) = line.split_once(':') {
            out.entry(k.trim().to_string())
                .or_insert_with(|| v.trim().to_string());
        }
    }
    out
}

/// Value of `key` inside `[section]` of an ini file.
pub fn ini_value(text: &str, section: &str, key: &str) -> Option<String> {
    let header = format!("[{section}]");
    let mut inside = false;
    for line in text.lines().map(str::trim) {
        if line.starts_with('[') {
            inside = line == header;
            continue;
        }
        if !inside {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            if k.trim() == key {
                return non_empty(unquote(v));
            }
        }
    }
    None
}

/// Reads `key=value` from any line of the file without regard to sections.
pub fn find_assignment(text: &str, key: &str) -> Option<String> {
    text.lines().map(str::trim).find_map(|line| {
        let (k, v) = line.split_once('=')?;
        if k.trim() == key {
            non_empty(unquote(v))
        } else {
            None
        }
    })
}

/// Value of `Key=value` in `wmic ... /format:list` output.
pub fn wmic_value(text: &str, key: &str) -> Option<String> {
    let prefix = format!("{key}=");
    text.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .and_then(non_empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_ignores_blank_values() {
        let env = Environment::from_pairs([("A", "x"), ("B", "  ")]);
        assert_eq!(env.get("A"), Some("x"));
        assert!(!env.has("B"));
        assert!(!env.has("C"));
    }

    #[test]
    fn config_home_prefers_xdg() {
        let env = Environment::from_pairs([("HOME", "/home/u"), ("XDG_CONFIG_HOME", "/cfg")]);
        assert_eq!(env.config_home(), Some(PathBuf::from("/cfg")));
        let env = Environment::from_pairs([("HOME", "/home/u")]);
        assert_eq!(env.config_home(), Some(PathBuf::from("/home/u/.config")));
    }

    #[test]
    fn key_values_strip_quotes_and_comments() {
        let parsed = parse_key_values("# c\nNAME=\"Arch Linux\"\nID=arch\n\nBROKEN\n");
        assert_eq!(parsed.get("NAME").map(String::as_str), Some("Arch Linux"));
        assert_eq!(parsed.get("ID").map(String::as_str), Some("arch"));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn colon_fields_keep_first_occurrence() {
        let parsed = parse_colon_fields("model name\t: A\nmodel name\t: B\n");
        assert_eq!(parsed.get("model name").map(String::as_str), Some("A"));
    }

    #[test]
    fn ini_value_respects_sections() {
        let text = "[General]\ntheme=x\n[WindowDecoration]\nlibrary=k\ntheme=Breeze\n";
        assert_eq!(
            ini_value(text, "WindowDecoration", "theme").as_deref(),
            Some("Breeze")
        );
        assert_eq!(ini_value(text, "Missing", "theme"), None);
    }

    #[test]
    fn parse_f64_loose_accepts_decimal_comma() {
        assert_eq!(parse_f64_loose("42,5"), Some(42.5));
        assert_eq!(parse_f64_loose(" 61 C"), Some(61.0));
        assert_eq!(parse_f64_loose("n/a"), None);
    }

    #[test]
    fn wmic_value_reads_list_format() {
        let text = "\r\n\r\nName=Intel(R) Core(TM) i7\r\nNumberOfCores=4\r\n";
        assert_eq!(wmic_value(text, "Name").as_deref(), Some("Intel(R) Core(TM) i7"));
        assert_eq!(wmic_value(text, "Missing"), None);
    }

    #[test]
    fn decode_falls_back_to_utf16() {
        let bytes: Vec<u8> = "ok".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let mut invalid = vec![0xff, 0xfe];
        invalid.extend(bytes);
        assert!(decode_cmd_stdout(&invalid).ends_with("ok"));
    }

    #[cfg(unix)]
    #[test]
    fn run_reports_timeout_and_exit() {
        let err = run("sleep", &["5"], Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
        let err = run("false", &[], Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ProbeError::Exit { .. }));
        let out = run("echo", &["hello"], Duration::from_secs(5)).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn run_is_bounded_when_background_child_holds_stdout() {
        let started = Instant::now();
        let err = run("sh", &["-c", "sleep 3 & echo hi"], Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn which_requires_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("netfetch-which-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("rpm"), "#!/bin/sh\n").unwrap();
        fs::write(dir.join("apk"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(dir.join("apk"), fs::Permissions::from_mode(0o755)).unwrap();

        let env = Environment::from_pairs([("PATH", dir.display().to_string())]);
        assert_eq!(env.which("rpm"), None);
        assert_eq!(env.which("apk"), Some(dir.join("apk")));
        assert_eq!(Environment::default().which("apk"), None);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn run_reports_missing_program() {
        let err = run("definitely-not-a-real-binary-xyz", &[], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ProbeError::Spawn { .. }));
    }
}
