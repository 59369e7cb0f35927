use crate::collectors::chain::{Chain, Platform};
use crate::collectors::probe;
use crate::collectors::process::executable_name;
use crate::collectors::HostContext;
use crate::snapshot::UserSession;
use std::time::SystemTime;

const LOCALE_VARS: &[&str] = &["LC_ALL", "LC_MESSAGES", "LANG", "LANGUAGE"];

/// Login shell of `user` from passwd-format text.
pub fn passwd_shell(text: &str, user: &str) -> Option<String> {
    text.lines()
        .map(|line| line.split(':').collect::<Vec<_>>())
        .find(|fields| fields.len() >= 7 && fields[0] == user)
        .and_then(|fields| probe::non_empty(fields[6]))
}

/// First token containing a digit on the first line of `--version` output.
pub fn version_token(output: &str) -> Option<String> {
    output
        .lines()
        .next()?
        .split_whitespace()
        .find(|token| token.chars().any(|c| c.is_ascii_digit()))
        .map(|token| token.trim_end_matches(',').to_string())
}

fn describe_shell(host: &HostContext, path: &str) -> Option<String> {
    let name = probe::non_empty(executable_name(path))?;
    match host.command(path, &["--version"]).as_deref().and_then(version_token) {
        Some(version) => Some(format!("{name} {version}")),
        None => Some(name),
    }
}

fn passwd_entry(host: &HostContext) -> Option<String> {
    let user = host.env.get("USER").or_else(|| host.env.get("LOGNAME"))?;
    let text = probe::read_text("/etc/passwd").ok()?;
    passwd_shell(&text, user)
}

pub fn shell_chain(platform: Platform) -> Chain<String> {
    let unix = platform.is_unix_like();
    Chain::new("shell")
        .step_if(unix, "env", |host| {
            let path = host.env.get("SHELL")?.to_string();
            describe_shell(host, &path)
        })
        .step_if(unix, "passwd", |host| describe_shell(host, &passwd_entry(host)?))
        .step_if(platform == Platform::Windows, "comspec", |host| {
            probe::non_empty(executable_name(host.env.get("ComSpec")?))
        })
}

fn env_locale(host: &HostContext) -> Option<String> {
    LOCALE_VARS
        .iter()
        .find_map(|var| host.env.get(var))
        .map(str::to_string)
}

/// `LANG=` from `locale` output.
pub fn parse_locale_output(text: &str) -> Option<String> {
    text.lines()
        .find_map(|l| l.strip_prefix("LANG="))
        .and_then(|v| probe::non_empty(probe::unquote(v)))
}

pub fn locale_chain(platform: Platform) -> Chain<String> {
    let unix = platform.is_unix_like();
    Chain::new("locale")
        .step_if(unix, "env", env_locale)
        .step_if(unix, "locale", |host| parse_locale_output(&host.command("locale", &[])?))
        .step_if(platform == Platform::Windows, "powershell", |host| {
            host.command(
                "powershell",
                &["-NoProfile", "-Command", "(Get-WinSystemLocale).Name"],
            )
        })
}

/// Sessions from `who`: name, line, then the login date and time.
pub fn parse_who(text: &str) -> Vec<UserSession> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            Some(UserSession {
                name: fields[0].to_string(),
                terminal: fields[1].to_string(),
                login_time: fields[2..4].join(" "),
            })
        })
        .collect()
}

/// Sessions from Windows `query user`; the header row is skipped and the
/// current-session marker `>` dropped.
pub fn parse_query_user(text: &str) -> Vec<UserSession> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                return None;
            }
            let login_time = if fields.len() >= 6 {
                fields[5..].join(" ")
            } else {
                String::new()
            };
            Some(UserSession {
                name: fields[0].trim_start_matches('>').to_string(),
                terminal: fields[1].to_string(),
                login_time,
            })
        })
        .collect()
}

fn non_empty_list(sessions: Vec<UserSession>) -> Option<Vec<UserSession>> {
    (!sessions.is_empty()).then_some(sessions)
}

pub fn users_chain(platform: Platform) -> Chain<Vec<UserSession>> {
    Chain::new("users")
        .step_if(platform.is_unix_like(), "who", |host| {
            non_empty_list(parse_who(&host.command("who", &[])?))
        })
        .step_if(platform == Platform::Windows, "query_user", |host| {
            non_empty_list(parse_query_user(&host.command("query", &["user"])?))
        })
}

/// Current time as RFC 3339 with second precision, UTC.
pub fn datetime_now() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}
