use crate::collectors::HostContext;
use tracing::debug;

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Bsd,
    Other,
}

impl Platform {
    pub const fn current() -> Self {
        if cfg!(target_os = "linux") || cfg!(target_os = "android") {
            Self::Linux
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(any(
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            Self::Bsd
        } else {
            Self::Other
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "macos",
            Self::Windows => "windows",
            Self::Bsd => "bsd",
            Self::Other => "other",
        }
    }

    pub const fn is_unix_like(self) -> bool {
        matches!(self, Self::Linux | Self::MacOs | Self::Bsd)
    }
}

type Probe<T> = Box<dyn Fn(&HostContext) -> Option<T> + Send + Sync>;

struct Step<T> {
    source: &'static str,
    probe: Probe<T>,
}

/// Ordered detection strategies for one fact. The first strategy that yields
/// a value wins; later ones are never invoked.
pub struct Chain<T> {
    fact: &'static str,
    steps: Vec<Step<T>>,
}

impl<T> Chain<T> {
    pub fn new(fact: &'static str) -> Self {
        Self {
            fact,
            steps: Vec::new(),
        }
    }

    pub fn step<F>(mut self, source: &'static str, probe: F) -> Self
    where
        F: Fn(&HostContext) -> Option<T> + Send + Sync + 'static,
    {
        self.steps.push(Step {
            source,
            probe: Box::new(probe),
        });
        self
    }

    /// Adds the strategy only when `enabled`; used to build per-platform tables.
    pub fn step_if<F>(self, enabled: bool, source: &'static str, probe: F) -> Self
    where
        F: Fn(&HostContext) -> Option<T> + Send + Sync + 'static,
    {
        if enabled {
            self.step(source, probe)
        } else {
            self
        }
    }

    #[cfg(test)]
    pub fn fact(&self) -> &'static str {
        self.fact
    }

    #[cfg(test)]
    pub fn sources(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.source).collect()
    }

    pub fn resolve(&self, host: &HostContext) -> Option<T> {
        for step in &self.steps {
            if let Some(value) = (step.probe)(host) {
                debug!(fact = self.fact, source = step.source, "fact resolved");
                return Some(value);
            }
        }
        debug!(fact = self.fact, tried = self.steps.len(), "fact unknown");
        None
    }
}

impl Chain<String> {
    pub fn resolve_or_unknown(&self, host: &HostContext) -> String {
        self.resolve(host).unwrap_or_else(|| UNKNOWN.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn spy(
        counter: &Arc<AtomicUsize>,
        value: Option<&'static str>,
    ) -> impl Fn(&HostContext) -> Option<String> + Send + Sync + 'static {
        let counter = counter.clone();
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            value.map(str::to_string)
        }
    }

    #[test]
    fn first_success_short_circuits() {
        let host = HostContext::for_tests();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new("spy")
            .step("first", spy(&first, Some("one")))
            .step("second", spy(&second, Some("two")));

        assert_eq!(chain.resolve(&host).as_deref(), Some("one"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn falls_through_to_later_strategy() {
        let host = HostContext::for_tests();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new("spy")
            .step("first", spy(&first, None))
            .step("second", spy(&second, Some("two")));

        assert_eq!(chain.resolve(&host).as_deref(), Some("two"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exhausted_chain_yields_unknown() {
        let host = HostContext::for_tests();
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new("spy")
            .step("a", spy(&calls, None))
            .step("b", spy(&calls, None))
            .step("c", |_: &HostContext| {
                crate::collectors::probe::read_attr("/nonexistent/netfetch/attr")
            });

        assert_eq!(chain.resolve_or_unknown(&host), UNKNOWN);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disabled_steps_are_not_registered() {
        let chain: Chain<String> = Chain::new("gated")
            .step_if(false, "never", |_| Some("x".to_string()))
            .step_if(true, "always", |_| None);
        assert_eq!(chain.sources(), vec!["always"]);
        assert_eq!(chain.fact(), "gated");
    }
}
