pub mod chain;
pub mod cpu;
pub mod desktop;
pub mod disk;
pub mod gpu;
pub mod memory;
pub mod network;
pub mod os;
pub mod packages;
pub mod power;
pub mod probe;
pub mod process;
pub mod session;
pub mod system;
pub mod terminal;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::snapshot::{
    Battery, Bios, Brightness, Disk, HostInfo, Memory, Network, OperatingSystem, PhysicalDisk,
    PowerAdapter, Snapshot, Swap, UserSession, Wifi,
};
use chain::{Chain, Platform, UNKNOWN};
use probe::Environment;
use process::{NullInspector, ProcessInspector, ProcfsInspector, PsInspector};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use sysinfo::SystemExt;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Everything a detection strategy may read: platform, environment, process
/// table, and values memoized for the lifetime of one collector.
pub struct HostContext {
    pub platform: Platform,
    pub env: Environment,
    pub inspector: Arc<dyn ProcessInspector>,
    pub command_timeout: Duration,
    desktop_config_dir: Option<PathBuf>,
    os_release: OnceLock<Option<os::OsRelease>>,
    sysinfo: Mutex<sysinfo::System>,
}

impl HostContext {
    pub fn new(settings: &CollectorSettings) -> Self {
        let platform = Platform::current();
        let inspector: Arc<dyn ProcessInspector> = match platform {
            Platform::Linux => Arc::new(ProcfsInspector::new()),
            Platform::MacOs | Platform::Bsd => Arc::new(PsInspector::new(settings.command_timeout)),
            _ => Arc::new(NullInspector),
        };
        Self {
            platform,
            env: Environment::capture(),
            inspector,
            command_timeout: settings.command_timeout,
            desktop_config_dir: settings.desktop_config_dir.clone(),
            os_release: OnceLock::new(),
            sysinfo: Mutex::new(sysinfo::System::new()),
        }
    }

    #[cfg(test)]
    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    #[cfg(test)]
    pub fn with_inspector(mut self, inspector: Arc<dyn ProcessInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            platform: Platform::current(),
            env: Environment::default(),
            inspector: Arc::new(NullInspector),
            command_timeout: Duration::from_secs(2),
            desktop_config_dir: None,
            os_release: OnceLock::new(),
            sysinfo: Mutex::new(sysinfo::System::new()),
        }
    }

    #[cfg(test)]
    pub fn with_desktop_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.desktop_config_dir = Some(dir.into());
        self
    }

    /// Output of an external command, or `None` when it is missing, fails,
    /// times out, or prints nothing.
    pub fn command(&self, program: &str, args: &[&str]) -> Option<String> {
        match probe::run(program, args, self.command_timeout) {
            Ok(out) => probe::non_empty(out),
            Err(err) => {
                debug!(program, error = %err, "command probe failed");
                None
            }
        }
    }

    /// `wmic <class> get <property>` on Windows.
    pub fn wmic(&self, class: &str, property: &str) -> Option<String> {
        let out = self.command("wmic", &[class, "get", property, "/format:list"])?;
        probe::wmic_value(&out, property)
    }

    pub fn sysctl(&self, name: &str) -> Option<String> {
        self.command("sysctl", &["-n", name])
    }

    /// Parsed os-release, read at most once per collector.
    pub fn os_release(&self) -> Option<&os::OsRelease> {
        self.os_release.get_or_init(os::read_os_release).as_ref()
    }

    /// Directory holding per-user desktop configuration (GTK, KDE).
    pub fn desktop_config_dir(&self) -> Option<PathBuf> {
        self.desktop_config_dir
            .clone()
            .or_else(|| self.env.config_home())
    }

    pub fn with_sysinfo<T>(&self, f: impl FnOnce(&mut sysinfo::System) -> T) -> Option<T> {
        let mut system = self.sysinfo.lock().ok()?;
        Some(f(&mut system))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Module {
    Os,
    Host,
    User,
    Kernel,
    HostInfo,
    Bios,
    Cpu,
    Gpu,
    Shell,
    Terminal,
    De,
    Wm,
    Theme,
    Icons,
    Font,
    Cursor,
    Locale,
    LoginManager,
    Packages,
    Resolution,
    Uptime,
    Memory,
    Disk,
    Network,
    Battery,
    PowerAdapter,
    Wifi,
    Users,
    Brightness,
    Processes,
    CpuUsage,
    PublicIp,
    Datetime,
}

#[derive(Debug, Error)]
#[error("unknown module {0:?}")]
pub struct UnknownModule(pub String);

impl Module {
    pub const ALL: [Module; 33] = [
        Module::Os,
        Module::Host,
        Module::User,
        Module::Kernel,
        Module::HostInfo,
        Module::Bios,
        Module::Cpu,
        Module::Gpu,
        Module::Shell,
        Module::Terminal,
        Module::De,
        Module::Wm,
        Module::Theme,
        Module::Icons,
        Module::Font,
        Module::Cursor,
        Module::Locale,
        Module::LoginManager,
        Module::Packages,
        Module::Resolution,
        Module::Uptime,
        Module::Memory,
        Module::Disk,
        Module::Network,
        Module::Battery,
        Module::PowerAdapter,
        Module::Wifi,
        Module::Users,
        Module::Brightness,
        Module::Processes,
        Module::CpuUsage,
        Module::PublicIp,
        Module::Datetime,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Module::Os => "os",
            Module::Host => "host",
            Module::User => "user",
            Module::Kernel => "kernel",
            Module::HostInfo => "host_info",
            Module::Bios => "bios",
            Module::Cpu => "cpu",
            Module::Gpu => "gpu",
            Module::Shell => "shell",
            Module::Terminal => "terminal",
            Module::De => "de",
            Module::Wm => "wm",
            Module::Theme => "theme",
            Module::Icons => "icons",
            Module::Font => "font",
            Module::Cursor => "cursor",
            Module::Locale => "locale",
            Module::LoginManager => "login_manager",
            Module::Packages => "packages",
            Module::Resolution => "resolution",
            Module::Uptime => "uptime",
            Module::Memory => "memory",
            Module::Disk => "disk",
            Module::Network => "network",
            Module::Battery => "battery",
            Module::PowerAdapter => "power_adapter",
            Module::Wifi => "wifi",
            Module::Users => "users",
            Module::Brightness => "brightness",
            Module::Processes => "processes",
            Module::CpuUsage => "cpu_usage",
            Module::PublicIp => "public_ip",
            Module::Datetime => "datetime",
        }
    }

    /// Static modules describe facts that do not change while the process runs.
    pub const fn is_static(self) -> bool {
        !matches!(
            self,
            Module::Uptime
                | Module::Memory
                | Module::Disk
                | Module::Network
                | Module::Battery
                | Module::PowerAdapter
                | Module::Wifi
                | Module::Users
                | Module::Brightness
                | Module::Processes
                | Module::CpuUsage
                | Module::PublicIp
                | Module::Datetime
        )
    }

    /// Builds the activation set; names that match no module are skipped.
    pub fn activation_set<I, S>(names: I) -> BTreeSet<Module>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|name| match name.as_ref().parse::<Module>() {
                Ok(module) => Some(module),
                Err(err) => {
                    debug!(error = %err, "ignoring module");
                    None
                }
            })
            .collect()
    }
}

impl FromStr for Module {
    type Err = UnknownModule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Module::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownModule(name.to_string()))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub active_modules: BTreeSet<Module>,
    pub command_timeout: Duration,
    pub census_timeout: Duration,
    pub public_ip_services: Vec<String>,
    pub public_ip_timeout: Duration,
    pub desktop_config_dir: Option<PathBuf>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            active_modules: Module::ALL.into_iter().collect(),
            command_timeout: Duration::from_millis(2000),
            census_timeout: Duration::from_millis(10_000),
            public_ip_services: Vec::new(),
            public_ip_timeout: Duration::from_millis(3000),
            desktop_config_dir: None,
        }
    }
}

impl From<&Config> for CollectorSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            active_modules: Module::activation_set(cfg.modules()),
            command_timeout: Duration::from_millis(cfg.probes.command_timeout_ms),
            census_timeout: Duration::from_millis(cfg.probes.census_timeout_ms),
            public_ip_services: cfg.public_ip.services.clone(),
            public_ip_timeout: Duration::from_millis(cfg.public_ip.timeout_ms),
            desktop_config_dir: cfg.desktop_config_dir.clone(),
        }
    }
}

/// Fallback chains for every fact, built once for the current platform.
struct Facts {
    os: Chain<OperatingSystem>,
    host: Chain<String>,
    user: Chain<String>,
    kernel: Chain<String>,
    uptime: Chain<u64>,
    host_info: Chain<HostInfo>,
    bios: Chain<Bios>,
    processes: Chain<u64>,
    cpu_name: Chain<String>,
    cpu_usage: Chain<f64>,
    gpu: Chain<String>,
    gpu_temp: Chain<i32>,
    shell: Chain<String>,
    terminal: Chain<String>,
    locale: Chain<String>,
    users: Chain<Vec<UserSession>>,
    de: Chain<String>,
    wm: Chain<String>,
    theme: Chain<String>,
    icons: Chain<String>,
    font: Chain<String>,
    cursor: Chain<String>,
    resolution: Chain<String>,
    login_manager: Chain<String>,
    brightness: Chain<Brightness>,
    memory: Chain<Memory>,
    swap: Chain<Swap>,
    volumes: Chain<Vec<Disk>>,
    physical_disks: Chain<Vec<PhysicalDisk>>,
    network: Chain<Network>,
    wifi: Chain<Wifi>,
    battery: Chain<Battery>,
    power_adapter: Chain<PowerAdapter>,
}

impl Facts {
    fn new(platform: Platform) -> Self {
        use desktop::GtkSetting;
        Self {
            os: os::chain(platform),
            host: os::host_chain(platform),
            user: os::user_chain(platform),
            kernel: os::kernel_chain(platform),
            uptime: os::uptime_chain(platform),
            host_info: os::host_info_chain(platform),
            bios: os::bios_chain(platform),
            processes: os::processes_chain(platform),
            cpu_name: cpu::name_chain(platform),
            cpu_usage: cpu::usage_chain(platform),
            gpu: gpu::chain(platform),
            gpu_temp: gpu::temp_chain(platform),
            shell: session::shell_chain(platform),
            terminal: terminal::chain(platform),
            locale: session::locale_chain(platform),
            users: session::users_chain(platform),
            de: desktop::de_chain(platform),
            wm: desktop::wm_chain(platform),
            theme: desktop::gtk_chain(platform, GtkSetting::Theme),
            icons: desktop::gtk_chain(platform, GtkSetting::Icons),
            font: desktop::gtk_chain(platform, GtkSetting::Font),
            cursor: desktop::gtk_chain(platform, GtkSetting::Cursor),
            resolution: desktop::resolution_chain(platform),
            login_manager: desktop::login_manager_chain(platform),
            brightness: desktop::brightness_chain(platform),
            memory: memory::chain(platform),
            swap: memory::swap_chain(platform),
            volumes: disk::volumes_chain(platform),
            physical_disks: disk::physical_chain(platform),
            network: network::interfaces_chain(platform),
            wifi: network::wifi_chain(platform),
            battery: power::battery_chain(platform),
            power_adapter: power::adapter_chain(platform),
        }
    }
}

/// A module's fully built result, applied to the snapshot in one write.
struct Update {
    unknown: bool,
    apply: Box<dyn FnOnce(&mut Snapshot) + Send>,
}

impl Update {
    fn new(unknown: bool, apply: impl FnOnce(&mut Snapshot) + Send + 'static) -> Self {
        Self {
            unknown,
            apply: Box::new(apply),
        }
    }

    fn text(value: String, field: fn(&mut Snapshot) -> &mut String) -> Self {
        Self::new(value == UNKNOWN, move |s| *field(s) = value)
    }

    fn record<T: Send + 'static>(
        value: Option<T>,
        field: fn(&mut Snapshot) -> &mut Option<T>,
    ) -> Self {
        Self::new(value.is_none(), move |s| *field(s) = value)
    }

    fn list<T: Send + 'static>(
        value: Option<Vec<T>>,
        field: fn(&mut Snapshot) -> &mut Vec<T>,
    ) -> Self {
        let value = value.unwrap_or_default();
        Self::new(value.is_empty(), move |s| *field(s) = value)
    }
}

struct Inner {
    modules: BTreeSet<Module>,
    host: HostContext,
    facts: Facts,
    snapshot: RwLock<Snapshot>,
    settings: CollectorSettings,
    metrics: Option<Arc<Metrics>>,
    http: reqwest::Client,
}

/// Owns the snapshot and runs the active modules against it.
#[derive(Clone)]
pub struct Collector {
    inner: Arc<Inner>,
}

impl Collector {
    /// Builds the collector without collecting anything.
    pub fn new(settings: CollectorSettings, metrics: Option<Arc<Metrics>>) -> Self {
        let host = HostContext::new(&settings);
        Self::with_host(settings, host, metrics)
    }

    pub fn with_host(
        settings: CollectorSettings,
        host: HostContext,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("netfetch/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.public_ip_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            inner: Arc::new(Inner {
                modules: settings.active_modules.clone(),
                facts: Facts::new(host.platform),
                host,
                snapshot: RwLock::new(Snapshot::default()),
                settings,
                metrics,
                http,
            }),
        }
    }

    /// Builds the collector and runs the static pass.
    pub async fn start(settings: CollectorSettings, metrics: Option<Arc<Metrics>>) -> Self {
        let collector = Self::new(settings, metrics);
        collector.collect_static().await;
        collector
    }

    pub fn modules(&self) -> &BTreeSet<Module> {
        &self.inner.modules
    }

    pub async fn collect_static(&self) {
        self.collect_pass("static", true).await;
    }

    /// Re-runs every active time-varying module, overwriting its fields.
    pub async fn collect_dynamic(&self) {
        self.collect_pass("dynamic", false).await;
    }

    /// A copy of the current aggregate; later collections never touch it.
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.snapshot.read().await.clone()
    }

    async fn collect_pass(&self, pass: &'static str, stable: bool) {
        let started = Instant::now();
        let modules: Vec<Module> = self
            .inner
            .modules
            .iter()
            .copied()
            .filter(|m| m.is_static() == stable)
            .collect();
        for module in &modules {
            self.run_module(*module).await;
        }
        if let Some(metrics) = &self.inner.metrics {
            metrics.observe_pass(pass);
        }
        info!(
            pass,
            modules = modules.len(),
            elapsed = %humantime::format_duration(truncate_millis(started.elapsed())),
            "collection pass finished"
        );
    }

    async fn run_module(&self, module: Module) {
        let started = Instant::now();
        let update = match module {
            Module::Packages => self.census().await,
            Module::PublicIp => self.public_ip().await,
            _ => {
                let inner = self.inner.clone();
                match tokio::task::spawn_blocking(move || compute(&inner, module)).await {
                    Ok(update) => update,
                    Err(err) => {
                        warn!(module = %module, error = %err, "module task failed");
                        return;
                    }
                }
            }
        };

        let unknown = update.unknown;
        {
            let mut snapshot = self.inner.snapshot.write().await;
            (update.apply)(&mut snapshot);
        }

        let elapsed = started.elapsed();
        debug!(module = %module, ?elapsed, unknown, "module collected");
        if let Some(metrics) = &self.inner.metrics {
            metrics.observe_module(module.as_str(), elapsed, unknown);
        }
    }

    async fn census(&self) -> Update {
        let host = &self.inner.host;
        let (summary, reports) =
            packages::count_packages(host.platform, &host.env, self.inner.settings.census_timeout)
                .await;
        if let Some(metrics) = &self.inner.metrics {
            for report in reports.iter().filter(|r| r.error.is_none()) {
                metrics.set_census_packages(report.manager, report.count);
            }
        }
        Update::text(summary, |s| &mut s.packages)
    }

    async fn public_ip(&self) -> Update {
        let settings = &self.inner.settings;
        let ip = network::public_ip(&self.inner.http, &settings.public_ip_services).await;
        Update::text(ip.unwrap_or_else(|| UNKNOWN.to_string()), |s| &mut s.public_ip)
    }
}

fn truncate_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}

fn compute(inner: &Inner, module: Module) -> Update {
    let host = &inner.host;
    let f = &inner.facts;
    match module {
        Module::Os => Update::record(f.os.resolve(host), |s| &mut s.os),
        Module::Host => Update::text(f.host.resolve_or_unknown(host), |s| &mut s.host),
        Module::User => Update::text(f.user.resolve_or_unknown(host), |s| &mut s.user),
        Module::Kernel => Update::text(f.kernel.resolve_or_unknown(host), |s| &mut s.kernel),
        Module::HostInfo => Update::record(f.host_info.resolve(host), |s| &mut s.host_info),
        Module::Bios => Update::record(f.bios.resolve(host), |s| &mut s.bios),
        Module::Cpu => Update::record(cpu::collect(host, &f.cpu_name), |s| &mut s.cpu),
        Module::Gpu => {
            let name = f.gpu.resolve_or_unknown(host);
            let temp = f.gpu_temp.resolve(host).unwrap_or(0);
            Update::new(name == UNKNOWN, move |s| {
                s.gpu = name;
                s.gpu_temp = temp;
            })
        }
        Module::Shell => Update::text(f.shell.resolve_or_unknown(host), |s| &mut s.shell),
        Module::Terminal => Update::text(f.terminal.resolve_or_unknown(host), |s| &mut s.terminal),
        Module::De => Update::text(f.de.resolve_or_unknown(host), |s| &mut s.de),
        Module::Wm => {
            let wm = f.wm.resolve_or_unknown(host);
            let theme = desktop::wm_theme(host, &wm).unwrap_or_else(|| UNKNOWN.to_string());
            Update::new(wm == UNKNOWN, move |s| {
                s.wm = wm;
                s.wm_theme = theme;
            })
        }
        Module::Theme => Update::text(f.theme.resolve_or_unknown(host), |s| &mut s.theme),
        Module::Icons => Update::text(f.icons.resolve_or_unknown(host), |s| &mut s.icons),
        Module::Font => Update::text(f.font.resolve_or_unknown(host), |s| &mut s.font),
        Module::Cursor => Update::text(f.cursor.resolve_or_unknown(host), |s| &mut s.cursor),
        Module::Locale => Update::text(f.locale.resolve_or_unknown(host), |s| &mut s.locale),
        Module::LoginManager => {
            Update::text(f.login_manager.resolve_or_unknown(host), |s| &mut s.login_manager)
        }
        Module::Resolution => {
            Update::text(f.resolution.resolve_or_unknown(host), |s| &mut s.resolution)
        }
        Module::Uptime => {
            let uptime = f
                .uptime
                .resolve(host)
                .map(os::format_uptime)
                .unwrap_or_else(|| UNKNOWN.to_string());
            Update::text(uptime, |s| &mut s.uptime)
        }
        Module::Memory => {
            let memory = f.memory.resolve(host);
            let swap = f.swap.resolve(host);
            Update::new(memory.is_none(), move |s| {
                s.memory = memory;
                s.swap = swap;
            })
        }
        Module::Disk => {
            let volumes = f.volumes.resolve(host).unwrap_or_default();
            let physical = f.physical_disks.resolve(host).unwrap_or_default();
            let primary = disk::primary(&volumes).cloned();
            Update::new(volumes.is_empty(), move |s| {
                s.disk = primary;
                s.disks = volumes;
                s.physical_disks = physical;
            })
        }
        Module::Network => {
            let network = f.network.resolve(host);
            let local_ip: Vec<String> = network
                .iter()
                .flat_map(|n| n.interfaces.iter().map(|i| i.ip.clone()))
                .collect();
            Update::new(network.is_none(), move |s| {
                s.network = network;
                s.local_ip = local_ip;
            })
        }
        Module::Battery => Update::record(f.battery.resolve(host), |s| &mut s.battery),
        Module::PowerAdapter => {
            Update::record(f.power_adapter.resolve(host), |s| &mut s.power_adapter)
        }
        Module::Wifi => Update::record(f.wifi.resolve(host), |s| &mut s.wifi),
        Module::Users => Update::list(f.users.resolve(host), |s| &mut s.users),
        Module::Brightness => Update::record(f.brightness.resolve(host), |s| &mut s.brightness),
        Module::Processes => {
            let count = f.processes.resolve(host).unwrap_or(0);
            Update::new(count == 0, move |s| s.processes = count)
        }
        Module::CpuUsage => {
            let usage = f.cpu_usage.resolve(host);
            Update::new(usage.is_none(), move |s| s.cpu_usage = usage.unwrap_or(0.0))
        }
        Module::Datetime => Update::text(session::datetime_now(), |s| &mut s.datetime),
        Module::Packages | Module::PublicIp => {
            // collected asynchronously in run_module
            Update::new(true, |_| {})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_for(modules: &[Module]) -> CollectorSettings {
        CollectorSettings {
            active_modules: modules.iter().copied().collect(),
            ..CollectorSettings::default()
        }
    }

    #[test]
    fn module_names_round_trip() {
        for module in Module::ALL {
            assert_eq!(module.as_str().parse::<Module>().unwrap(), module);
        }
        assert_eq!(" CPU ".parse::<Module>().unwrap(), Module::Cpu);
        assert!("gpu_fans".parse::<Module>().is_err());
    }

    #[test]
    fn unknown_module_names_are_ignored() {
        let set = Module::activation_set(["cpu", "teleport", "battery", "cpu", ""]);
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![Module::Cpu, Module::Battery]);
    }

    #[test]
    fn stability_classes_split_the_registry() {
        let dynamic: Vec<&str> = Module::ALL
            .into_iter()
            .filter(|m| !m.is_static())
            .map(Module::as_str)
            .collect();
        assert_eq!(
            dynamic,
            vec![
                "uptime",
                "memory",
                "disk",
                "network",
                "battery",
                "power_adapter",
                "wifi",
                "users",
                "brightness",
                "processes",
                "cpu_usage",
                "public_ip",
                "datetime"
            ]
        );
        assert!(Module::Packages.is_static());
        assert!(Module::Terminal.is_static());
    }

    #[tokio::test]
    async fn inactive_modules_stay_empty() {
        let collector = Collector::with_host(
            settings_for(&[Module::Kernel, Module::Datetime]),
            HostContext::for_tests(),
            None,
        );
        collector.collect_static().await;
        let snapshot = collector.snapshot().await;
        assert!(!snapshot.kernel.is_empty());
        assert!(snapshot.datetime.is_empty());
        assert!(snapshot.host.is_empty());
        assert!(snapshot.cpu.is_none());

        collector.collect_dynamic().await;
        assert!(!collector.snapshot().await.datetime.is_empty());
    }

    #[tokio::test]
    async fn dynamic_collection_is_idempotent() {
        let collector = Collector::with_host(
            settings_for(&[
                Module::Battery,
                Module::PowerAdapter,
                Module::Brightness,
                Module::Users,
            ]),
            HostContext::for_tests(),
            None,
        );
        collector.collect_dynamic().await;
        let first = serde_json::to_vec(&collector.snapshot().await).unwrap();
        collector.collect_dynamic().await;
        let second = serde_json::to_vec(&collector.snapshot().await).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn held_snapshot_is_isolated_from_later_writes() {
        let collector = Collector::with_host(
            settings_for(&[Module::Datetime]),
            HostContext::for_tests(),
            None,
        );
        let before = collector.snapshot().await;

        let writer = {
            let collector = collector.clone();
            tokio::spawn(async move { collector.collect_dynamic().await })
        };
        writer.await.unwrap();

        assert!(before.datetime.is_empty());
        assert!(!collector.snapshot().await.datetime.is_empty());
    }

    #[tokio::test]
    async fn metrics_see_each_module() {
        let metrics = Metrics::new().unwrap();
        let collector = Collector::with_host(
            settings_for(&[Module::Datetime]),
            HostContext::for_tests(),
            Some(metrics.clone()),
        );
        collector.collect_dynamic().await;
        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("netfetch_module_collect_seconds{module=\"datetime\"}"));
        assert!(text.contains("netfetch_collect_passes_total{pass=\"dynamic\"} 1"));
    }

    #[test]
    fn host_context_prefers_config_dir_override() {
        let host = HostContext::for_tests()
            .with_env(Environment::from_pairs([("XDG_CONFIG_HOME", "/xdg")]));
        assert_eq!(host.desktop_config_dir(), Some(PathBuf::from("/xdg")));
        let host = host.with_desktop_config_dir("/override");
        assert_eq!(host.desktop_config_dir(), Some(PathBuf::from("/override")));
    }
}
