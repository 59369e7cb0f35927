use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Telemetry about the collector itself; the snapshot is served over JSON.
pub struct Metrics {
    registry: Registry,
    started: Instant,
    pub netfetch_module_collect_seconds: GaugeVec,
    pub netfetch_module_unknown: GaugeVec,
    pub netfetch_census_packages: GaugeVec,
    pub netfetch_collect_passes_total: CounterVec,
    pub netfetch_scrape_count_total: Counter,
    pub netfetch_last_collect_timestamp_seconds: Gauge,
    pub netfetch_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let netfetch_module_collect_seconds = GaugeVec::new(
            opts!(
                "netfetch_module_collect_seconds",
                "Duration of the last run of each module in seconds"
            ),
            &["module"],
        )?;
        let netfetch_module_unknown = GaugeVec::new(
            opts!(
                "netfetch_module_unknown",
                "1 when the module's last result was unknown, else 0"
            ),
            &["module"],
        )?;
        let netfetch_census_packages = GaugeVec::new(
            opts!(
                "netfetch_census_packages",
                "Installed package count reported by each package manager"
            ),
            &["manager"],
        )?;
        let netfetch_collect_passes_total = CounterVec::new(
            opts!(
                "netfetch_collect_passes_total",
                "Completed collection passes by kind"
            ),
            &["pass"],
        )?;
        let netfetch_scrape_count_total = Counter::with_opts(opts!(
            "netfetch_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let netfetch_last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "netfetch_last_collect_timestamp_seconds",
            "Unix time of the last completed collection pass"
        ))?;
        let netfetch_uptime_seconds =
            Gauge::with_opts(opts!("netfetch_uptime_seconds", "Daemon uptime in seconds"))?;

        register(&registry, &netfetch_module_collect_seconds)?;
        register(&registry, &netfetch_module_unknown)?;
        register(&registry, &netfetch_census_packages)?;
        register(&registry, &netfetch_collect_passes_total)?;
        register(&registry, &netfetch_scrape_count_total)?;
        register(&registry, &netfetch_last_collect_timestamp_seconds)?;
        register(&registry, &netfetch_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started: Instant::now(),
            netfetch_module_collect_seconds,
            netfetch_module_unknown,
            netfetch_census_packages,
            netfetch_collect_passes_total,
            netfetch_scrape_count_total,
            netfetch_last_collect_timestamp_seconds,
            netfetch_uptime_seconds,
        }))
    }

    pub fn observe_module(&self, module: &str, elapsed: Duration, unknown: bool) {
        self.netfetch_module_collect_seconds
            .with_label_values(&[module])
            .set(elapsed.as_secs_f64());
        self.netfetch_module_unknown
            .with_label_values(&[module])
            .set(if unknown { 1.0 } else { 0.0 });
    }

    pub fn observe_pass(&self, pass: &str) {
        self.netfetch_collect_passes_total
            .with_label_values(&[pass])
            .inc();
        self.netfetch_last_collect_timestamp_seconds
            .set(now_unix() as f64);
    }

    pub fn set_census_packages(&self, manager: &str, count: usize) {
        self.netfetch_census_packages
            .with_label_values(&[manager])
            .set(count as f64);
    }

    pub fn inc_scrape_count(&self) {
        self.netfetch_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.netfetch_uptime_seconds
            .set(self.started.elapsed().as_secs_f64().floor());
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_observations_are_labelled() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_module("gpu", Duration::from_millis(250), true);
        metrics.observe_module("cpu", Duration::from_millis(10), false);
        metrics.set_census_packages("dpkg", 1834);
        metrics.observe_pass("static");
        metrics.inc_scrape_count();

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("netfetch_module_collect_seconds{module=\"gpu\"} 0.25"));
        assert!(text.contains("netfetch_module_unknown{module=\"gpu\"} 1"));
        assert!(text.contains("netfetch_module_unknown{module=\"cpu\"} 0"));
        assert!(text.contains("netfetch_census_packages{manager=\"dpkg\"} 1834"));
        assert!(text.contains("netfetch_collect_passes_total{pass=\"static\"} 1"));
        assert!(text.contains("netfetch_scrape_count_total 1"));
        assert!(!text.contains("netfetch_last_collect_timestamp_seconds 0\n"));
    }
}
