//! Command-line parsing. Out of the core's hard design (spec §1), but every
//! complete daemon in this corpus carries a `clap`-derived flag surface, so
//! this module exists to produce a frozen [`Config`] and nothing else: it
//! holds no retained state and is never touched again after `main` calls
//! [`Cli::into_config`].

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use super::{Config, RegexSetConfig, SourceKind, Strategy};
use crate::error::ConfigError;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StrategyArg {
    Power,
    Adaptive,
    Aggressive,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Power => Strategy::Power,
            StrategyArg::Adaptive => Strategy::Adaptive,
            StrategyArg::Aggressive => Strategy::Aggressive,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SourceArg {
    Auto,
    Text,
    Tracepoint,
}

impl From<SourceArg> for SourceKind {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::Auto => SourceKind::Auto,
            SourceArg::Text => SourceKind::Text,
            SourceArg::Tracepoint => SourceKind::Tracepoint,
        }
    }
}

/// Starvation-avoidance daemon: boosts runnable threads starved of CPU time.
#[derive(Parser, Debug)]
#[command(name = "stalld", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Comma-separated CPU list/ranges to monitor, e.g. "0-3,8". Defaults to
    /// all online CPUs.
    #[arg(long)]
    pub cpus: Option<String>,

    /// Seconds a runnable thread may go without a context-switch before it
    /// is considered starved.
    #[arg(long, default_value_t = 30)]
    pub threshold: u64,

    /// Seconds between monitoring cycles.
    #[arg(short = 'g', long, default_value_t = 5)]
    pub granularity: u64,

    /// Seconds a boosted thread is kept elevated.
    #[arg(long, default_value_t = 3)]
    pub boost_duration: u64,

    /// Deadline-scheduling runtime per period, in nanoseconds.
    #[arg(long, default_value_t = 20_000)]
    pub runtime: u64,

    /// Deadline-scheduling period, in nanoseconds.
    #[arg(long, default_value_t = 1_000_000_000)]
    pub period: u64,

    /// Fixed (FIFO) priority used when deadline scheduling is unavailable.
    #[arg(long, default_value_t = 98)]
    pub fifo_priority: i32,

    /// Orchestration strategy.
    #[arg(long, value_enum, default_value_t = StrategyArg::Adaptive)]
    pub strategy: StrategyArg,

    /// Force the fixed-priority elevation method even if deadline
    /// scheduling is available.
    #[arg(long)]
    pub force_fifo: bool,

    /// Detect and log starvation, but never change scheduling attributes.
    #[arg(long)]
    pub log_only: bool,

    /// Disable the per-CPU idle-time pre-filter.
    #[arg(long)]
    pub no_idle_gate: bool,

    /// Regular expression(s) of thread names to never boost. May repeat.
    #[arg(long = "ignore-comm")]
    pub ignore_comm: Vec<String>,

    /// Regular expression(s) of process names to never boost. May repeat.
    #[arg(long = "ignore-process")]
    pub ignore_tgid_name: Vec<String>,

    /// Runqueue source backend.
    #[arg(long, value_enum, default_value_t = SourceArg::Auto)]
    pub source: SourceArg,

    /// Pidfile / single-instance lock path.
    #[arg(long, default_value = "/var/run/stalld.pid")]
    pub pidfile: PathBuf,

    /// Stay attached to the controlling terminal instead of daemonizing.
    #[arg(short, long)]
    pub foreground: bool,
}

impl Cli {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let cpus = match self.cpus {
            Some(spec) => super::parse_cpu_list(&spec)?,
            None => crate::procfs::online_cpus().map_err(ConfigError::CpuListUnreadable)?,
        };

        let strategy: Strategy = self.strategy.into();

        let config = Config {
            cpus,
            threshold_secs: self.threshold,
            granularity_secs: self.granularity,
            boost_duration_secs: self.boost_duration,
            deadline_runtime_ns: self.runtime,
            deadline_period_ns: self.period,
            fixed_priority: self.fifo_priority,
            strategy,
            force_fixed_priority: self.force_fifo,
            log_only: self.log_only,
            idle_gate_enabled: !self.no_idle_gate,
            ignore_comm: RegexSetConfig::compile(self.ignore_comm, "ignore-comm")?,
            ignore_tgid_name: RegexSetConfig::compile(self.ignore_tgid_name, "ignore-process")?,
            source: self.source.into(),
            pidfile: self.pidfile,
            foreground: self.foreground,
        };

        config.validate()?;
        Ok(config)
    }

    /// Maps the verbosity counter to a `tracing` filter directive.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn defaults_parse_cleanly() {
        let cli = Cli::parse_from(["stalld", "--cpus", "0-1"]);
        let cfg = cli.into_config().unwrap();
        assert_eq!(cfg.cpus, vec![0, 1]);
        assert_eq!(cfg.threshold_secs, 30);
        assert_eq!(cfg.strategy, Strategy::Adaptive);
    }

    #[test]
    fn force_fifo_with_power_strategy_is_rejected_at_validation() {
        let cli = Cli::parse_from([
            "stalld",
            "--cpus",
            "0",
            "--strategy",
            "power",
            "--force-fifo",
        ]);
        assert!(matches!(
            cli.into_config(),
            Err(ConfigError::PowerRequiresDeadline)
        ));
    }

    #[test]
    fn runtime_over_period_is_rejected_at_validation() {
        let cli = Cli::parse_from([
            "stalld", "--cpus", "0", "--runtime", "2000", "--period", "1000",
        ]);
        assert!(matches!(
            cli.into_config(),
            Err(ConfigError::RuntimeExceedsPeriod { .. })
        ));
    }
}
