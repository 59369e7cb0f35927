use crate::collectors::chain::{Chain, Platform};
use crate::collectors::process::{executable_name, ProcessInspector};
use crate::collectors::HostContext;

pub const MAX_ANCESTRY_DEPTH: usize = 20;

/// Processes that sit between a shell and its terminal without identifying it.
const TRANSPARENT: &[&str] = &[
    "login", "init", "systemd", "sshd", "ssh", "tmux", "tmux: server", "screen", "zellij", "sh",
    "bash", "zsh", "fish", "dash", "ksh", "tcsh", "csh", "nu", "su", "sudo", "doas",
];

const TERMINALS: &[(&str, &str)] = &[
    ("alacritty", "Alacritty"),
    ("kitty", "kitty"),
    ("wezterm", "WezTerm"),
    ("wezterm-gui", "WezTerm"),
    ("gnome-terminal", "GNOME Terminal"),
    ("gnome-terminal-server", "GNOME Terminal"),
    ("konsole", "Konsole"),
    ("xfce4-terminal", "XFCE Terminal"),
    ("xterm", "xterm"),
    ("urxvt", "urxvt"),
    ("rxvt", "rxvt"),
    ("terminator", "Terminator"),
    ("tilix", "Tilix"),
    ("st", "st"),
    ("cool-retro-term", "cool-retro-term"),
    ("lxterminal", "LXTerminal"),
    ("mate-terminal", "MATE Terminal"),
    ("terminology", "Terminology"),
    ("hyper", "Hyper"),
    ("Hyper", "Hyper"),
    ("foot", "foot"),
    ("footclient", "foot"),
    ("ghostty", "Ghostty"),
    ("kgx", "GNOME Console"),
    ("ptyxis", "Ptyxis"),
    ("goland", "GoLand"),
    ("idea", "IntelliJ IDEA"),
    ("pycharm", "PyCharm"),
    ("webstorm", "WebStorm"),
    ("code", "VS Code"),
    ("code-oss", "VS Code"),
    ("cursor", "Cursor"),
];

const IDES: &[(&str, &str)] = &[
    ("goland", "GoLand"),
    ("idea", "IntelliJ IDEA"),
    ("pycharm", "PyCharm"),
    ("webstorm", "WebStorm"),
    ("clion", "CLion"),
    ("rustrover", "RustRover"),
    ("code", "VS Code"),
    ("code-oss", "VS Code"),
    ("codium", "VSCodium"),
    ("cursor", "Cursor"),
    ("zed", "Zed"),
];

/// Environment markers in priority order: (variable, fixed label or None to use its value).
const ENV_MARKERS: &[(&str, Option<&str>)] = &[
    ("TERM_PROGRAM", None),
    ("TERMINAL_EMULATOR", None),
    ("KITTY_PID", Some("kitty")),
    ("ALACRITTY_SOCKET", Some("Alacritty")),
    ("WEZTERM_EXECUTABLE", Some("WezTerm")),
    ("WT_SESSION", Some("Windows Terminal")),
    ("KONSOLE_VERSION", Some("Konsole")),
    ("GNOME_TERMINAL_SERVICE", Some("GNOME Terminal")),
    ("TERMINATOR_UUID", Some("Terminator")),
];

const MACOS_TERM_PROGRAMS: &[(&str, &str)] = &[
    ("Apple_Terminal", "Terminal.app"),
    ("iTerm.app", "iTerm2"),
    ("WezTerm", "WezTerm"),
    ("Alacritty", "Alacritty"),
    ("kitty", "kitty"),
    ("vscode", "VS Code"),
];

fn lookup(table: &'static [(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Walks the ancestors of `start_pid` and classifies the hosting terminal or IDE.
///
/// An IDE seen at or below the first terminal match wins over it, since an
/// IDE's embedded terminal helper also matches the terminal table. A terminal
/// found first is returned as is, whatever runs above it. The walk stops at
/// `MAX_ANCESTRY_DEPTH` steps, at pid <= 1, or on the first unreadable process,
/// falling back to the last IDE seen.
pub fn classify_ancestry(inspector: &dyn ProcessInspector, start_pid: u32) -> Option<String> {
    let mut pid = start_pid;
    let mut ide: Option<&'static str> = None;

    for _ in 0..MAX_ANCESTRY_DEPTH {
        if pid <= 1 {
            break;
        }
        let Some(command) = inspector.command_of(pid) else {
            break;
        };
        let name = executable_name(&command);

        if let Some(found) = lookup(IDES, &name) {
            ide = Some(found);
        }
        if !TRANSPARENT.contains(&name.as_str()) {
            if let Some(terminal) = lookup(TERMINALS, &name) {
                return Some(ide.unwrap_or(terminal).to_string());
            }
        }

        let Some(parent) = inspector.parent_of(pid) else {
            break;
        };
        pid = parent;
    }

    ide.map(str::to_string)
}

fn env_marker(host: &HostContext) -> Option<String> {
    ENV_MARKERS.iter().find_map(|(var, label)| {
        let value = host.env.get(var)?;
        Some(label.map_or_else(|| value.to_string(), str::to_string))
    })
}

fn ancestry(host: &HostContext) -> Option<String> {
    let parent = host.inspector.parent_of(std::process::id())?;
    classify_ancestry(host.inspector.as_ref(), parent)
}

fn controlling_tty(_host: &HostContext) -> Option<String> {
    let target = std::fs::read_link("/proc/self/fd/0").ok()?;
    let target = target.to_str()?;
    target.starts_with("/dev/").then(|| target.to_string())
}

fn macos_term_program(host: &HostContext) -> Option<String> {
    let term = host.env.get("TERM_PROGRAM")?;
    Some(lookup(MACOS_TERM_PROGRAMS, term).map_or_else(|| term.to_string(), str::to_string))
}

fn windows_markers(host: &HostContext) -> Option<String> {
    [
        ("WT_SESSION", "Windows Terminal"),
        ("ConEmuPID", "ConEmu"),
        ("ALACRITTY_SOCKET", "Alacritty"),
    ]
    .iter()
    .find(|(var, _)| host.env.has(var))
    .map(|(_, label)| (*label).to_string())
}

pub fn chain(platform: Platform) -> Chain<String> {
    match platform {
        Platform::MacOs => Chain::new("terminal")
            .step("term_program", macos_term_program)
            .step("ancestry", ancestry)
            .step("default", |_| Some("Terminal.app".to_string())),
        Platform::Windows => Chain::new("terminal")
            .step("env_markers", windows_markers)
            .step("default", |_| Some("cmd".to_string())),
        _ => Chain::new("terminal")
            .step("env_markers", env_marker)
            .step("ancestry", ancestry)
            .step_if(platform == Platform::Linux, "controlling_tty", controlling_tty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::probe::Environment;
    use crate::collectors::process::testing::FakeInspector;
    use std::sync::Arc;

    #[test]
    fn ide_outranks_its_terminal_helper() {
        // shell -> embedded terminal helper -> IDE
        let fake = FakeInspector::chain(
            100,
            &["/bin/zsh", "/opt/idea/bin/idea --terminal", "/opt/idea/bin/idea"],
        );
        assert_eq!(classify_ancestry(&fake, 100).as_deref(), Some("IntelliJ IDEA"));
    }

    #[test]
    fn ide_below_a_terminal_wins() {
        let fake = FakeInspector::chain(110, &["bash", "clion", "gnome-terminal-server"]);
        assert_eq!(classify_ancestry(&fake, 110).as_deref(), Some("CLion"));
    }

    #[test]
    fn terminal_launched_from_an_ide_is_kept() {
        let fake = FakeInspector::chain(120, &["zsh", "alacritty", "/usr/share/code/code"]);
        assert_eq!(classify_ancestry(&fake, 120).as_deref(), Some("Alacritty"));
    }

    #[test]
    fn ide_without_terminal_is_the_fallback() {
        let fake = FakeInspector::chain(130, &["bash", "zed", "systemd"]);
        assert_eq!(classify_ancestry(&fake, 130).as_deref(), Some("Zed"));
    }

    #[test]
    fn vscode_helper_resolves_to_vscode() {
        let fake = FakeInspector::chain(
            200,
            &["bash", "/usr/share/code/code --type=utility", "/usr/share/code/code"],
        );
        assert_eq!(classify_ancestry(&fake, 200).as_deref(), Some("VS Code"));
    }

    #[test]
    fn plain_terminal_is_returned() {
        let fake = FakeInspector::chain(300, &["-zsh", "tmux", "/usr/bin/alacritty", "systemd"]);
        assert_eq!(classify_ancestry(&fake, 300).as_deref(), Some("Alacritty"));
    }

    #[test]
    fn wrappers_and_shells_are_skipped() {
        let fake = FakeInspector::chain(400, &["sudo", "bash", "foot"]);
        assert_eq!(classify_ancestry(&fake, 400).as_deref(), Some("foot"));
    }

    #[test]
    fn walk_is_depth_bounded() {
        let names: Vec<String> = (0..100).map(|i| format!("proc{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut fake = FakeInspector::chain(1000, &refs);
        // anything past the bound must never be consulted
        fake = fake.with(1000 + MAX_ANCESTRY_DEPTH as u32 + 1, 1, "kitty");
        assert_eq!(classify_ancestry(&fake, 1000), None);
    }

    #[test]
    fn cycle_terminates() {
        let fake = FakeInspector::new().with(50, 51, "a").with(51, 50, "b");
        assert_eq!(classify_ancestry(&fake, 50), None);
    }

    #[test]
    fn stops_at_init_and_on_read_failure() {
        let fake = FakeInspector::new().with(5, 1, "bash");
        assert_eq!(classify_ancestry(&fake, 5), None);
        // pid 9 has no record, so the terminal above it is never reached
        let fake = FakeInspector::new().with(8, 9, "bash").with(10, 11, "kitty");
        assert_eq!(classify_ancestry(&fake, 8), None);
        assert_eq!(classify_ancestry(&fake, 1), None);
    }

    #[test]
    fn env_markers_follow_priority() {
        let host = HostContext::for_tests().with_env(Environment::from_pairs([
            ("KITTY_PID", "1"),
            ("WT_SESSION", "x"),
        ]));
        assert_eq!(env_marker(&host).as_deref(), Some("kitty"));

        let host = HostContext::for_tests()
            .with_env(Environment::from_pairs([("TERM_PROGRAM", "WezTerm"), ("KITTY_PID", "1")]));
        assert_eq!(env_marker(&host).as_deref(), Some("WezTerm"));
    }

    #[test]
    fn linux_chain_falls_back_to_ancestry() {
        let me = std::process::id();
        let fake = FakeInspector::new()
            .with(me, 77, "netfetch")
            .with(77, 78, "fish")
            .with(78, 1, "/usr/bin/wezterm-gui");
        let host = HostContext::for_tests()
            .with_env(Environment::default())
            .with_inspector(Arc::new(fake));
        let chain = chain(Platform::Linux);
        assert_eq!(chain.resolve(&host).as_deref(), Some("WezTerm"));
    }

    #[test]
    fn macos_maps_term_program() {
        let host = HostContext::for_tests()
            .with_env(Environment::from_pairs([("TERM_PROGRAM", "iTerm.app")]));
        assert_eq!(chain(Platform::MacOs).resolve_or_unknown(&host), "iTerm2");
        let host = HostContext::for_tests();
        assert_eq!(chain(Platform::MacOs).resolve_or_unknown(&host), "Terminal.app");
    }
}
