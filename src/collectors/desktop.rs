use crate::collectors::chain::{Chain, Platform};
use crate::collectors::probe;
use crate::collectors::process::find_running;
use crate::collectors::HostContext;
use crate::snapshot::Brightness;
use std::path::Path;
use tracing::debug;

const DE_PROCESSES: &[(&str, &[&str])] = &[
    ("GNOME", &["gnome-session", "gnome-shell"]),
    ("KDE", &["plasmashell", "ksmserver"]),
    ("XFCE", &["xfce4-session"]),
    ("Cinnamon", &["cinnamon-session", "cinnamon"]),
    ("MATE", &["mate-session"]),
    ("Unity", &["unity-panel-service"]),
    ("LXDE", &["lxsession"]),
    ("LXQt", &["lxqt-session"]),
    ("Deepin", &["dde-desktop", "dde-session"]),
    ("Pantheon", &["pantheon-session", "gala"]),
    ("Budgie", &["budgie-desktop", "budgie-wm"]),
    ("Trinity", &["trinity-session"]),
];

const WAYLAND_COMPOSITORS: &[(&str, &[&str])] = &[
    ("Hyprland", &["Hyprland"]),
    ("Sway", &["sway"]),
    ("Wayfire", &["wayfire"]),
    ("River", &["river"]),
    ("Labwc", &["labwc"]),
    ("KWin", &["kwin_wayland"]),
    ("Mutter", &["mutter", "gnome-shell"]),
    ("niri", &["niri"]),
];

const WM_PROCESSES: &[(&str, &[&str])] = &[
    ("i3", &["i3", "i3-gaps"]),
    ("Sway", &["sway"]),
    ("Hyprland", &["Hyprland"]),
    ("bspwm", &["bspwm"]),
    ("awesome", &["awesome"]),
    ("dwm", &["dwm"]),
    ("Openbox", &["openbox"]),
    ("Fluxbox", &["fluxbox"]),
    ("IceWM", &["icewm"]),
    ("JWM", &["jwm"]),
    ("herbstluftwm", &["herbstluftwm"]),
    ("qtile", &["qtile"]),
    ("xmonad", &["xmonad"]),
    ("Mutter", &["mutter"]),
    ("KWin", &["kwin_x11", "kwin_wayland", "kwin"]),
    ("Xfwm4", &["xfwm4"]),
    ("Marco", &["marco"]),
    ("Metacity", &["metacity"]),
    ("Compiz", &["compiz"]),
    ("Enlightenment", &["enlightenment"]),
    ("fvwm", &["fvwm", "fvwm3"]),
    ("ctwm", &["ctwm"]),
    ("ratpoison", &["ratpoison"]),
    ("Wayfire", &["wayfire"]),
    ("River", &["river"]),
    ("Labwc", &["labwc"]),
];

const MACOS_WMS: &[(&str, &[&str])] = &[
    ("yabai", &["yabai"]),
    ("AeroSpace", &["AeroSpace", "aerospace"]),
    ("Rectangle", &["Rectangle"]),
    ("Amethyst", &["Amethyst"]),
    ("Magnet", &["Magnet"]),
];

const DISPLAY_MANAGERS: &[(&str, &[&str])] = &[
    ("SDDM", &["sddm"]),
    ("GDM", &["gdm", "gdm3", "gdm-session-worker"]),
    ("LightDM", &["lightdm"]),
    ("LXDM", &["lxdm", "lxdm-binary"]),
    ("XDM", &["xdm"]),
    ("SLiM", &["slim"]),
    ("Ly", &["ly", "ly-dm"]),
    ("greetd", &["greetd"]),
    ("Entrance", &["entrance"]),
    ("nodm", &["nodm"]),
    ("lemurs", &["lemurs"]),
];

/// GTK-style appearance settings that share one lookup chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GtkSetting {
    Theme,
    Icons,
    Font,
    Cursor,
}

impl GtkSetting {
    fn fact(self) -> &'static str {
        match self {
            Self::Theme => "theme",
            Self::Icons => "icons",
            Self::Font => "font",
            Self::Cursor => "cursor",
        }
    }

    fn gtk_key(self) -> &'static str {
        match self {
            Self::Theme => "gtk-theme-name",
            Self::Icons => "gtk-icon-theme-name",
            Self::Font => "gtk-font-name",
            Self::Cursor => "gtk-cursor-theme-name",
        }
    }

    fn gsettings_key(self) -> &'static str {
        match self {
            Self::Theme => "gtk-theme",
            Self::Icons => "icon-theme",
            Self::Font => "font-name",
            Self::Cursor => "cursor-theme",
        }
    }

    /// (file under the config dir, section, key) holding the KDE value.
    fn kde_location(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Theme => ("kdeglobals", "KDE", "widgetStyle"),
            Self::Icons => ("kdeglobals", "Icons", "Theme"),
            Self::Font => ("kdeglobals", "General", "font"),
            Self::Cursor => ("kcminputrc", "Mouse", "cursorTheme"),
        }
    }
}

fn is_desktop_unix(platform: Platform) -> bool {
    matches!(platform, Platform::Linux | Platform::Bsd)
}

fn env_desktop(host: &HostContext) -> Option<String> {
    if let Some(current) = host.env.get("XDG_CURRENT_DESKTOP") {
        return current.split(':').next().and_then(probe::non_empty);
    }
    ["DESKTOP_SESSION", "GDMSESSION", "XDG_SESSION_DESKTOP"]
        .iter()
        .find_map(|var| host.env.get(var))
        .map(str::to_string)
}

pub fn de_chain(platform: Platform) -> Chain<String> {
    Chain::new("de")
        .step_if(platform == Platform::MacOs, "fixed", |_| Some("Aqua".to_string()))
        .step_if(platform == Platform::Windows, "fixed", |_| {
            Some("Windows Explorer".to_string())
        })
        .step_if(is_desktop_unix(platform), "env", env_desktop)
        .step_if(is_desktop_unix(platform), "process_scan", |host| {
            find_running(host.inspector.as_ref(), DE_PROCESSES)
        })
}

fn wayland_compositor(host: &HostContext) -> Option<String> {
    if !host.env.has("WAYLAND_DISPLAY") {
        return None;
    }
    find_running(host.inspector.as_ref(), WAYLAND_COMPOSITORS)
}

fn wmctrl(host: &HostContext) -> Option<String> {
    let out = host.command("wmctrl", &["-m"])?;
    out.lines()
        .find_map(|line| line.strip_prefix("Name:"))
        .and_then(probe::non_empty)
}

/// Window id from `xprop -root _NET_SUPPORTING_WM_CHECK`.
pub fn parse_xprop_wm_check(text: &str) -> Option<String> {
    let line = text.lines().find(|l| l.starts_with("_NET_SUPPORTING_WM_CHECK"))?;
    let id = line.split_whitespace().last()?;
    id.starts_with("0x").then(|| id.to_string())
}

/// `_NET_WM_NAME = "KWin"` from `xprop -id`.
pub fn parse_xprop_wm_name(text: &str) -> Option<String> {
    text.lines()
        .filter(|l| l.starts_with("_NET_WM_NAME"))
        .find_map(|l| l.split_once('='))
        .and_then(|(_, v)| probe::non_empty(probe::unquote(v)))
}

fn xprop(host: &HostContext) -> Option<String> {
    let root = host.command("xprop", &["-root", "_NET_SUPPORTING_WM_CHECK"])?;
    let id = parse_xprop_wm_check(&root)?;
    let window = host.command(
        "xprop",
        &["-id", &id, "-notype", "-len", "100", "-f", "_NET_WM_NAME", "8t"],
    )?;
    parse_xprop_wm_name(&window)
}

pub fn wm_chain(platform: Platform) -> Chain<String> {
    let unix = is_desktop_unix(platform);
    Chain::new("wm")
        .step_if(unix, "wayland_compositor", wayland_compositor)
        .step_if(unix, "wmctrl", wmctrl)
        .step_if(unix, "xprop", xprop)
        .step_if(unix, "process_scan", |host| {
            find_running(host.inspector.as_ref(), WM_PROCESSES)
        })
        .step_if(platform == Platform::MacOs, "process_scan", |host| {
            find_running(host.inspector.as_ref(), MACOS_WMS)
        })
        .step_if(platform == Platform::MacOs, "fixed", |_| {
            Some("Quartz Compositor".to_string())
        })
        .step_if(platform == Platform::Windows, "fixed", |_| Some("DWM".to_string()))
}

/// Window decoration theme of the detected window manager.
pub fn wm_theme(host: &HostContext, wm: &str) -> Option<String> {
    let lower = wm.to_ascii_lowercase();
    if lower.contains("kwin") {
        let text = probe::read_text(host.desktop_config_dir()?.join("kwinrc")).ok()?;
        return probe::ini_value(&text, "org.kde.kdecoration2", "theme")
            .or_else(|| probe::ini_value(&text, "WindowDecoration", "theme"));
    }
    if lower.contains("xfwm") {
        return host.command("xfconf-query", &["-c", "xfwm4", "-p", "/general/theme"]);
    }
    if ["mutter", "metacity", "marco", "gnome shell"]
        .iter()
        .any(|name| lower.contains(name))
    {
        let out = host.command(
            "gsettings",
            &["get", "org.gnome.desktop.wm.preferences", "theme"],
        )?;
        return probe::non_empty(probe::unquote(&out));
    }
    None
}

fn gtk3_settings(host: &HostContext, setting: GtkSetting) -> Option<String> {
    let path = host.desktop_config_dir()?.join("gtk-3.0").join("settings.ini");
    let text = probe::read_text(path).ok()?;
    probe::ini_value(&text, "Settings", setting.gtk_key())
}

fn gtkrc2(host: &HostContext, setting: GtkSetting) -> Option<String> {
    let text = probe::read_text(host.env.home()?.join(".gtkrc-2.0")).ok()?;
    probe::find_assignment(&text, setting.gtk_key())
}

fn gsettings(host: &HostContext, setting: GtkSetting) -> Option<String> {
    let out = host.command(
        "gsettings",
        &["get", "org.gnome.desktop.interface", setting.gsettings_key()],
    )?;
    probe::non_empty(probe::unquote(&out))
}

/// `Noto Sans,10,-1,5,50,0,0,0,0,0` -> `Noto Sans 10`.
pub fn kde_font(raw: &str) -> Option<String> {
    let mut parts = raw.split(',');
    let family = probe::non_empty(parts.next()?)?;
    match parts.next().map(str::trim).filter(|s| !s.is_empty()) {
        Some(size) => Some(format!("{family} {size}")),
        None => Some(family),
    }
}

fn kde(host: &HostContext, setting: GtkSetting) -> Option<String> {
    let (file, section, key) = setting.kde_location();
    let text = probe::read_text(host.desktop_config_dir()?.join(file)).ok()?;
    let value = probe::ini_value(&text, section, key)?;
    match setting {
        GtkSetting::Font => kde_font(&value),
        _ => Some(value),
    }
}

fn default_cursor_theme(host: &HostContext) -> Option<String> {
    let path = host.env.home()?.join(".icons").join("default").join("index.theme");
    let text = probe::read_text(path).ok()?;
    probe::ini_value(&text, "Icon Theme", "Inherits")
}

pub fn gtk_chain(platform: Platform, setting: GtkSetting) -> Chain<String> {
    let unix = is_desktop_unix(platform);
    Chain::new(setting.fact())
        .step_if(unix, "gtk3_settings", move |host| gtk3_settings(host, setting))
        .step_if(unix, "gtkrc2", move |host| gtkrc2(host, setting))
        .step_if(unix, "gsettings", move |host| gsettings(host, setting))
        .step_if(unix, "kde", move |host| kde(host, setting))
        .step_if(
            unix && setting == GtkSetting::Cursor,
            "icons_default",
            default_cursor_theme,
        )
}

fn join_modes(modes: Vec<String>) -> Option<String> {
    (!modes.is_empty()).then(|| modes.join(", "))
}

/// Current modes from `xrandr --current`: rows whose rate carries `*`.
pub fn parse_xrandr(text: &str) -> Vec<String> {
    text.lines()
        .filter(|l| l.starts_with(' ') && l.contains('*'))
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Current modes from `wlr-randr`: `1920x1080 px, 60.000 Hz (preferred, current)`.
pub fn parse_wlr_randr(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| l.contains("current"))
        .filter_map(|l| l.split_whitespace().next())
        .filter(|mode| mode.contains('x'))
        .map(str::to_string)
        .collect()
}

/// Preferred modes of connected DRM connectors under `root`.
pub fn drm_modes_in(root: impl AsRef<Path>) -> Vec<String> {
    probe::list_prefixed(root, &["card"])
        .into_iter()
        .filter(|dir| {
            probe::read_attr(dir.join("status")).is_some_and(|s| s == "connected")
        })
        .filter_map(|dir| {
            let modes = probe::read_text(dir.join("modes")).ok()?;
            modes.lines().next().and_then(probe::non_empty)
        })
        .collect()
}

fn system_profiler_resolution(host: &HostContext) -> Option<String> {
    let out = host.command("system_profiler", &["SPDisplaysDataType"])?;
    let modes = out
        .lines()
        .filter_map(|l| l.trim().strip_prefix("Resolution:"))
        .filter_map(|v| {
            let mut nums = v.split_whitespace().filter(|t| t.parse::<u32>().is_ok());
            Some(format!("{}x{}", nums.next()?, nums.next()?))
        })
        .collect();
    join_modes(modes)
}

fn wmic_resolution(host: &HostContext) -> Option<String> {
    let out = host.command(
        "wmic",
        &[
            "path",
            "Win32_VideoController",
            "get",
            "CurrentHorizontalResolution,CurrentVerticalResolution",
            "/format:list",
        ],
    )?;
    let width = probe::wmic_value(&out, "CurrentHorizontalResolution")?;
    let height = probe::wmic_value(&out, "CurrentVerticalResolution")?;
    Some(format!("{width}x{height}"))
}

pub fn resolution_chain(platform: Platform) -> Chain<String> {
    let unix = is_desktop_unix(platform);
    Chain::new("resolution")
        .step_if(unix, "wlr_randr", |host| {
            if !host.env.has("WAYLAND_DISPLAY") {
                return None;
            }
            join_modes(parse_wlr_randr(&host.command("wlr-randr", &[])?))
        })
        .step_if(unix, "xrandr", |host| {
            join_modes(parse_xrandr(&host.command("xrandr", &["--current"])?))
        })
        .step_if(platform == Platform::Linux, "drm", |_| {
            join_modes(drm_modes_in("/sys/class/drm"))
        })
        .step_if(platform == Platform::MacOs, "system_profiler", system_profiler_resolution)
        .step_if(platform == Platform::Windows, "wmic", wmic_resolution)
}

fn session_hint(host: &HostContext) -> Option<String> {
    let session_type = host.env.get("XDG_SESSION_TYPE").unwrap_or_default();
    if session_type == "wayland" || host.env.has("WAYLAND_DISPLAY") {
        return Some("Wayland (Unknown DM)".to_string());
    }
    if session_type == "x11" || host.env.has("DISPLAY") {
        return Some("X11 (Unknown DM)".to_string());
    }
    None
}

pub fn login_manager_chain(platform: Platform) -> Chain<String> {
    let unix = is_desktop_unix(platform);
    Chain::new("login_manager")
        .step_if(unix, "process_scan", |host| {
            find_running(host.inspector.as_ref(), DISPLAY_MANAGERS)
        })
        .step_if(unix, "session_env", session_hint)
        .step_if(platform == Platform::MacOs, "fixed", |_| {
            Some("macOS Login Window".to_string())
        })
        .step_if(platform == Platform::Windows, "fixed", |_| {
            Some("Windows Login".to_string())
        })
}

/// First backlight device under `root` that reports both values.
pub fn backlight_in(root: impl AsRef<Path>) -> Option<Brightness> {
    probe::list_dir(root).into_iter().find_map(|dir| {
        let current = probe::read_number::<u32>(dir.join("brightness"))?;
        let max = probe::read_number::<u32>(dir.join("max_brightness")).filter(|m| *m > 0)?;
        let brightness = Brightness { current, max };
        debug!(device = %dir.display(), percent = brightness.percent(), "backlight read");
        Some(brightness)
    })
}

fn wmi_brightness(host: &HostContext) -> Option<Brightness> {
    let out = host.command(
        "wmic",
        &[
            r"/namespace:\\root\wmi",
            "path",
            "WmiMonitorBrightness",
            "get",
            "CurrentBrightness",
            "/format:list",
        ],
    )?;
    let current = probe::wmic_value(&out, "CurrentBrightness")?.parse().ok()?;
    Some(Brightness { current, max: 100 })
}

pub fn brightness_chain(platform: Platform) -> Chain<Brightness> {
    Chain::new("brightness")
        .step_if(platform == Platform::Linux, "backlight", |_| {
            backlight_in("/sys/class/backlight")
        })
        .step_if(platform == Platform::Windows, "wmi", wmi_brightness)
}
