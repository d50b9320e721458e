//! Frozen runtime configuration.
//!
//! A [`Config`] is built once, at startup, by [`Cli::into_config`] and never
//! mutated afterwards; it is shared across every worker thread behind an
//! `Arc`. SIGHUP is intentionally not handled anywhere in this crate because
//! there is nothing a running worker could safely reload.

mod cli;

pub use cli::Cli;

use regex::RegexSet;

use crate::error::ConfigError;

/// Which elevation mechanism the Boost Engine uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Deadline,
    FixedPriority,
}

/// Which orchestration strategy the Scheduler runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Power,
    Adaptive,
    Aggressive,
}

/// Which Runqueue Source backend is selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Auto-detect: try the textual debugfs/procfs source first, then the
    /// tracepoint source. Selection happens once, at startup; see
    /// `DESIGN.md` for why there is no mid-run fallback.
    Auto,
    Text,
    Tracepoint,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub cpus: Vec<u32>,
    pub threshold_secs: u64,
    pub granularity_secs: u64,
    pub boost_duration_secs: u64,
    pub deadline_runtime_ns: u64,
    pub deadline_period_ns: u64,
    pub fixed_priority: i32,
    pub strategy: Strategy,
    pub force_fixed_priority: bool,
    pub log_only: bool,
    pub idle_gate_enabled: bool,
    pub ignore_comm: RegexSetConfig,
    pub ignore_tgid_name: RegexSetConfig,
    pub source: SourceKind,
    pub pidfile: std::path::PathBuf,
    pub foreground: bool,
}

/// A compiled [`RegexSet`] plus the patterns it was built from, so
/// `Config: Debug` stays readable and the set can be re-derived in tests
/// without re-parsing from the CLI.
#[derive(Clone)]
pub struct RegexSetConfig {
    patterns: Vec<String>,
    set: RegexSet,
}

impl RegexSetConfig {
    pub fn compile(patterns: Vec<String>, field: &'static str) -> Result<Self, ConfigError> {
        let set = RegexSet::new(&patterns).map_err(|source| ConfigError::InvalidPattern {
            field,
            source,
        })?;
        Ok(Self { patterns, set })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: RegexSet::empty(),
        }
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.set.is_match(haystack)
    }
}

impl std::fmt::Debug for RegexSetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.patterns.iter()).finish()
    }
}

impl Config {
    /// Cross-field validation shared by [`Cli::into_config`] and by tests
    /// that build a `Config` directly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deadline_runtime_ns == 0 {
            return Err(ConfigError::ZeroRuntime);
        }
        if self.deadline_runtime_ns > self.deadline_period_ns {
            return Err(ConfigError::RuntimeExceedsPeriod {
                runtime: self.deadline_runtime_ns,
                period: self.deadline_period_ns,
            });
        }
        if self.strategy == Strategy::Power && self.force_fixed_priority {
            return Err(ConfigError::PowerRequiresDeadline);
        }
        Ok(())
    }
}

/// Parses a CPU-list specification of the form `0-3,8,10-11` into a sorted,
/// deduplicated vector, the same syntax `/sys/devices/system/cpu/online`
/// uses.
pub fn parse_cpu_list(spec: &str) -> Result<Vec<u32>, ConfigError> {
    let mut cpus = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u32 = lo
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidCpuSet(spec.to_string()))?;
            let hi: u32 = hi
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidCpuSet(spec.to_string()))?;
            if lo > hi {
                return Err(ConfigError::InvalidCpuSet(spec.to_string()));
            }
            cpus.extend(lo..=hi);
        } else {
            let cpu: u32 = part
                .parse()
                .map_err(|_| ConfigError::InvalidCpuSet(spec.to_string()))?;
            cpus.push(cpu);
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ranges_and_singletons() {
        assert_eq!(parse_cpu_list("0-3,8,10-11").unwrap(), vec![0, 1, 2, 3, 8, 10, 11]);
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(parse_cpu_list("5-2").is_err());
    }

    #[test]
    fn dedups_overlapping_ranges() {
        assert_eq!(parse_cpu_list("0-2,1-3").unwrap(), vec![0, 1, 2, 3]);
    }

    fn base_config() -> Config {
        Config {
            cpus: vec![0],
            threshold_secs: 5,
            granularity_secs: 1,
            boost_duration_secs: 3,
            deadline_runtime_ns: 20_000,
            deadline_period_ns: 1_000_000_000,
            fixed_priority: 98,
            strategy: Strategy::Power,
            force_fixed_priority: false,
            log_only: false,
            idle_gate_enabled: true,
            ignore_comm: RegexSetConfig::empty(),
            ignore_tgid_name: RegexSetConfig::empty(),
            source: SourceKind::Auto,
            pidfile: "/var/run/stalld.pid".into(),
            foreground: false,
        }
    }

    #[test]
    fn runtime_greater_than_period_is_rejected() {
        let mut cfg = base_config();
        cfg.deadline_runtime_ns = cfg.deadline_period_ns + 1;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::RuntimeExceedsPeriod { .. })
        ));
    }

    #[test]
    fn zero_runtime_is_rejected() {
        let mut cfg = base_config();
        cfg.deadline_runtime_ns = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroRuntime)));
    }

    #[test]
    fn runtime_equal_to_period_is_legal() {
        let mut cfg = base_config();
        cfg.deadline_runtime_ns = cfg.deadline_period_ns;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn power_strategy_with_forced_fixed_priority_is_rejected() {
        let mut cfg = base_config();
        cfg.force_fixed_priority = true;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::PowerRequiresDeadline)
        ));
    }

    #[test]
    fn ignore_comm_matches_compiled_pattern() {
        let set = RegexSetConfig::compile(vec!["^ksoftirqd/".to_string()], "ignore-comm").unwrap();
        assert!(set.is_match("ksoftirqd/3"));
        assert!(!set.is_match("my-thread"));
    }
}
